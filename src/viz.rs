//! SVG diagnostics: learned functions, posterior predictive bands and
//! training snapshots.

use std::fs;
use std::path::Path;

use ndarray::{Array2, Axis};
use plotters::coord::Shift;
use plotters::prelude::*;
use serde::Serialize;

use crate::bayes::PredictiveSummary;
use crate::error::{LunaError, Result};
use crate::logging;
use crate::luna::ObjectiveBuilder;
use crate::model::Nlm;

/// Default directory for plot files.
pub const DEFAULT_OUTPUT_DIR: &str = "scratch";

const POSTERIOR_SAMPLES: usize = 100;
const PREDICTIVE_SAMPLES: usize = 100;

#[derive(Serialize)]
struct PlotLog<'a> {
    kind: &'a str,
    path: String,
}

fn plot_err<E: std::fmt::Display>(err: E) -> LunaError {
    LunaError::Plot(err.to_string())
}

fn prepare(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn written(kind: &str, path: &Path) {
    logging::record(
        "plot_written",
        &PlotLog {
            kind,
            path: path.display().to_string(),
        },
    );
}

/// Padded `(min, max)` over the finite values, never an empty range.
fn bounds(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return (-1.0, 1.0);
    }
    let pad = ((hi - lo) * 0.05).max(1e-3);
    (lo - pad, hi + pad)
}

fn check_row(context: &'static str, values: &Array2<f64>, len: usize) -> Result<()> {
    if values.nrows() != 1 || values.ncols() != len {
        return Err(LunaError::shape(context, &[1, len], values.shape()));
    }
    Ok(())
}

/// Training data plus every learned function. `y_pred` is `(heads, m)` over `x_test`.
pub fn plot_regression<P: AsRef<Path>>(
    path: P,
    x_train: &Array2<f64>,
    y_train: &Array2<f64>,
    x_test: &Array2<f64>,
    y_pred: &Array2<f64>,
) -> Result<()> {
    let path = path.as_ref();
    check_row("plot_regression y_train", y_train, x_train.ncols())?;
    if y_pred.ncols() != x_test.ncols() {
        return Err(LunaError::shape(
            "plot_regression y_pred",
            &[y_pred.nrows(), x_test.ncols()],
            y_pred.shape(),
        ));
    }
    prepare(path)?;

    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let (x_lo, x_hi) = bounds(x_train.iter().chain(x_test.iter()).copied());
    let (y_lo, y_hi) = bounds(y_train.iter().chain(y_pred.iter()).copied());
    let mut chart = ChartBuilder::on(&root)
        .caption("Learned functions", ("sans-serif", 20).into_font().color(&BLACK))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(plot_err)?;
    chart.configure_mesh().draw().map_err(plot_err)?;

    for (head, outputs) in y_pred.axis_iter(Axis(0)).enumerate() {
        let series = chart
            .draw_series(LineSeries::new(
                x_test.iter().zip(outputs.iter()).map(|(&x, &y)| (x, y)),
                RED.mix(0.7).stroke_width(2),
            ))
            .map_err(plot_err)?;
        if head == 0 {
            series
                .label("learned function")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
        }
    }
    chart
        .draw_series(
            x_train
                .iter()
                .zip(y_train.iter())
                .map(|(&x, &y)| Circle::new((x, y), 3, BLACK.filled())),
        )
        .map_err(plot_err)?;
    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    written("regression", path);
    Ok(())
}

/// Draws data, predictive mean and 95% band into an existing area.
///
/// `samples` is `(n_samples, m)` over `x_test`.
pub fn plot_predictive(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    title: &str,
    x_train: &Array2<f64>,
    y_train: &Array2<f64>,
    x_test: &Array2<f64>,
    samples: &Array2<f64>,
) -> Result<()> {
    check_row("plot_predictive y_train", y_train, x_train.ncols())?;
    if samples.ncols() != x_test.ncols() {
        return Err(LunaError::shape(
            "plot_predictive samples",
            &[samples.nrows(), x_test.ncols()],
            samples.shape(),
        ));
    }
    let summary = PredictiveSummary::from_samples(samples);
    let xs: Vec<f64> = x_test.iter().copied().collect();

    let (x_lo, x_hi) = bounds(x_train.iter().chain(xs.iter()).copied());
    let (y_lo, y_hi) = bounds(
        y_train
            .iter()
            .copied()
            .chain(summary.lower.iter().copied())
            .chain(summary.upper.iter().copied()),
    );
    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 16).into_font().color(&BLACK))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(plot_err)?;
    chart.configure_mesh().draw().map_err(plot_err)?;

    let band: Vec<(f64, f64)> = xs
        .iter()
        .zip(&summary.upper)
        .map(|(&x, &y)| (x, y))
        .chain(xs.iter().zip(&summary.lower).rev().map(|(&x, &y)| (x, y)))
        .collect();
    chart
        .draw_series(std::iter::once(Polygon::new(band, BLUE.mix(0.2).filled())))
        .map_err(plot_err)?
        .label("95% predictive interval")
        .legend(|(x, y)| Rectangle::new([(x, y - 4), (x + 20, y + 4)], BLUE.mix(0.2).filled()));
    chart
        .draw_series(LineSeries::new(
            xs.iter().zip(&summary.mean).map(|(&x, &y)| (x, y)),
            BLUE.stroke_width(2),
        ))
        .map_err(plot_err)?
        .label("predictive mean")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    chart
        .draw_series(
            x_train
                .iter()
                .zip(y_train.iter())
                .map(|(&x, &y)| Circle::new((x, y), 3, BLACK.filled())),
        )
        .map_err(plot_err)?;
    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;
    Ok(())
}

/// Single-panel posterior predictive plot written to `path`.
pub fn plot_posterior_predictive<P: AsRef<Path>>(
    path: P,
    x_train: &Array2<f64>,
    y_train: &Array2<f64>,
    x_test: &Array2<f64>,
    samples: &Array2<f64>,
) -> Result<()> {
    let path = path.as_ref();
    prepare(path)?;
    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    plot_predictive(&root, "Posterior predictive", x_train, y_train, x_test, samples)?;
    root.present().map_err(plot_err)?;
    written("posterior_predictive", path);
    Ok(())
}

/// One row per entry of `iterations`: every auxiliary head on the left, the
/// posterior predictive from that iteration's features on the right.
pub fn luna_snapshots<B: ObjectiveBuilder, P: AsRef<Path>>(
    model: &mut Nlm<B>,
    iterations: &[usize],
    x_test: &Array2<f64>,
    x_train: &Array2<f64>,
    y_train: &Array2<f64>,
    path: P,
) -> Result<()> {
    if iterations.is_empty() {
        return Err(LunaError::InvalidConfig(
            "luna_snapshots needs at least one iteration".into(),
        ));
    }
    let path = path.as_ref();

    // Compute everything first so a bad iteration leaves no partial file.
    let mut panels = Vec::with_capacity(iterations.len());
    for &iteration in iterations {
        let heads = model.auxiliary_outputs_at(iteration, x_test)?;
        let predictives = model.predictives_at(
            iteration,
            x_train,
            y_train,
            x_test,
            POSTERIOR_SAMPLES,
            PREDICTIVE_SAMPLES,
        )?;
        panels.push((iteration, heads, predictives.samples));
    }

    prepare(path)?;
    let height = 300 * iterations.len() as u32;
    let root = SVGBackend::new(path, (1000, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let areas = root.split_evenly((iterations.len(), 2));

    let (x_lo, x_hi) = bounds(x_test.iter().chain(x_train.iter()).copied());
    for ((iteration, heads, samples), pair) in panels.iter().zip(areas.chunks(2)) {
        let (y_lo, y_hi) = bounds(heads.iter().chain(y_train.iter()).copied());
        let mut chart = ChartBuilder::on(&pair[0])
            .caption(
                format!("Iter = {iteration}"),
                ("sans-serif", 16).into_font().color(&BLACK),
            )
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
            .map_err(plot_err)?;
        chart.configure_mesh().draw().map_err(plot_err)?;
        for outputs in heads.axis_iter(Axis(0)) {
            chart
                .draw_series(LineSeries::new(
                    x_test.iter().zip(outputs.iter()).map(|(&x, &y)| (x, y)),
                    BLUE.mix(0.4).stroke_width(1),
                ))
                .map_err(plot_err)?;
        }
        plot_predictive(&pair[1], "", x_train, y_train, x_test, samples)?;
    }

    root.present().map_err(plot_err)?;
    written("luna_snapshots", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::luna::MseObjectiveBuilder;
    use crate::model::ModelConfig;
    use crate::neural::{Architecture, OptimizerConfig};

    fn line_data() -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let x_train = Array2::from_shape_fn((1, 10), |(_, n)| -1.0 + 0.2 * n as f64);
        let y_train = x_train.mapv(|x| 2.0 * x);
        let x_test = Array2::from_shape_fn((1, 15), |(_, n)| -1.5 + 0.2 * n as f64);
        (x_train, y_train, x_test)
    }

    fn assert_svg(path: &Path) {
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.contains("<svg"));
    }

    #[test]
    fn bounds_handle_degenerate_input() {
        assert_eq!(bounds(Vec::new()), (-1.0, 1.0));
        let (lo, hi) = bounds(vec![2.0, 2.0, f64::NAN]);
        assert!(lo < 2.0 && hi > 2.0);
    }

    #[test]
    fn regression_plot_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fit.svg");
        let (x_train, y_train, x_test) = line_data();
        let y_pred = Array2::from_shape_fn((2, 15), |(h, n)| x_test[[0, n]] * (1.5 + h as f64));
        plot_regression(&path, &x_train, &y_train, &x_test, &y_pred).unwrap();
        assert_svg(&path);
    }

    #[test]
    fn regression_plot_rejects_misaligned_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let (x_train, y_train, x_test) = line_data();
        let y_pred = Array2::zeros((2, 4));
        let result = plot_regression(dir.path().join("bad.svg"), &x_train, &y_train, &x_test, &y_pred);
        assert!(matches!(result, Err(LunaError::ShapeMismatch { .. })));
    }

    #[test]
    fn posterior_predictive_plot_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictive.svg");
        let (x_train, y_train, x_test) = line_data();
        let samples = Array2::from_shape_fn((50, 15), |(s, n)| {
            2.0 * x_test[[0, n]] + (s as f64 - 25.0) * 0.01
        });
        plot_posterior_predictive(&path, &x_train, &y_train, &x_test, &samples).unwrap();
        assert_svg(&path);
    }

    #[test]
    fn snapshots_cover_requested_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.svg");
        let (x_train, y_train, x_test) = line_data();
        let config = ModelConfig {
            y_noise_variance: 0.1,
            ..ModelConfig::default()
        };
        let mut model =
            Nlm::new(Architecture::new(4, 1, 1, 2), config, MseObjectiveBuilder, 5).unwrap();
        let optimizer = OptimizerConfig {
            max_iteration: 20,
            ..OptimizerConfig::default()
        };
        model.fit(&x_train, &y_train, &optimizer).unwrap();

        luna_snapshots(&mut model, &[0, 19], &x_test, &x_train, &y_train, &path).unwrap();
        assert_svg(&path);

        let missing = dir.path().join("missing.svg");
        assert!(luna_snapshots(&mut model, &[20], &x_test, &x_train, &y_train, &missing).is_err());
        assert!(!missing.exists());
    }
}
