//! Hidden-layer activation functions.

use std::str::FromStr;

use serde::Serialize;

/// Elementwise nonlinearity applied after every hidden affine layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Tanh,
    Relu,
    Sigmoid,
}

impl Activation {
    #[inline]
    pub fn value(self, z: f64) -> f64 {
        match self {
            Activation::Tanh => z.tanh(),
            Activation::Relu => z.max(0.0),
            Activation::Sigmoid => sigmoid(z),
        }
    }

    #[inline]
    pub fn derivative(self, z: f64) -> f64 {
        match self {
            Activation::Tanh => {
                let t = z.tanh();
                1.0 - t * t
            }
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
        }
    }

    /// Second derivative; zero almost everywhere for ReLU.
    #[inline]
    pub fn second_derivative(self, z: f64) -> f64 {
        match self {
            Activation::Tanh => {
                let t = z.tanh();
                -2.0 * t * (1.0 - t * t)
            }
            Activation::Relu => 0.0,
            Activation::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s) * (1.0 - 2.0 * s)
            }
        }
    }
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            "sigmoid" => Ok(Activation::Sigmoid),
            other => Err(format!("unknown activation `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn central(f: impl Fn(f64) -> f64, z: f64) -> f64 {
        let h = 1e-5;
        (f(z + h) - f(z - h)) / (2.0 * h)
    }

    #[test]
    fn derivatives_match_finite_differences() {
        for act in [Activation::Tanh, Activation::Sigmoid] {
            for &z in &[-2.0, -0.3, 0.0, 0.7, 1.9] {
                let d = central(|v| act.value(v), z);
                assert!((act.derivative(z) - d).abs() < 1e-8, "{act:?} first at {z}");
                let dd = central(|v| act.derivative(v), z);
                assert!(
                    (act.second_derivative(z) - dd).abs() < 1e-7,
                    "{act:?} second at {z}"
                );
            }
        }
    }

    #[test]
    fn relu_is_piecewise_linear() {
        let act = Activation::Relu;
        assert_eq!(act.value(-1.0), 0.0);
        assert_eq!(act.value(2.5), 2.5);
        assert_eq!(act.derivative(-1.0), 0.0);
        assert_eq!(act.derivative(2.5), 1.0);
        assert_eq!(act.second_derivative(2.5), 0.0);
    }

    #[test]
    fn parses_names() {
        assert_eq!("TANH".parse::<Activation>().unwrap(), Activation::Tanh);
        assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Relu);
        assert!("gelu".parse::<Activation>().is_err());
    }
}
