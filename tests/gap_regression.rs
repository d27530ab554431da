use luna_core::luna::{cos_sim_sq, Analytic, FiniteDifference, JacobianEstimator};
use luna_core::{
    default_generating_function, generate_data, luna_snapshots, plot_posterior_predictive,
    plot_regression, Architecture, GapDataConfig, JacobianKind, Luna, LunaConfig, OptimizerConfig,
    OptimizerKind,
};
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn gap_config(arch: Architecture) -> LunaConfig {
    let mut config = LunaConfig::with_architecture(arch);
    config.data.training_sample_size = 40;
    config.data.gap_size = 4.0;
    config.data.region_size = 2.0;
    config.data.boundary_size = 1.0;
    config.data.y_noise_variance = 1.0;
    config.model.y_noise_variance = 1.0;
    config.optimizer = OptimizerConfig {
        kind: OptimizerKind::Adam,
        step_size: 0.01,
        max_iteration: 300,
        random_restarts: 1,
        log_every: 100,
        ..OptimizerConfig::default()
    };
    config
}

/// Squared cosine between the two heads' input Jacobians on `x`.
fn head_similarity(model: &Luna, estimator: &dyn JacobianEstimator, x: &Array2<f64>) -> f64 {
    let weights = model.weights().unwrap().clone();
    let estimate = estimator
        .estimate(model.network(), &weights, x, &mut StdRng::seed_from_u64(9))
        .unwrap();
    let head_a: Vec<f64> = estimate.jacobian.index_axis(Axis(1), 0).iter().copied().collect();
    let head_b: Vec<f64> = estimate.jacobian.index_axis(Axis(1), 1).iter().copied().collect();
    cos_sim_sq(ArrayView1::from(&head_a[..]), ArrayView1::from(&head_b[..])).unwrap()
}

#[test]
fn two_head_model_trains_on_gap_data() {
    let config = gap_config(Architecture::new(20, 1, 1, 2));
    let data = generate_data(
        config.data.seed,
        &config.data.gap_data(),
        default_generating_function,
    )
    .unwrap();

    let mut model = Luna::from_config(&config).unwrap();
    let report = model
        .train(&data.x_train, &data.y_train, &config.optimizer, 100)
        .unwrap();
    assert!(report.final_value.is_finite());
    assert!(report.final_terms.fit.is_finite());

    // Held-out boundary region, compared with always predicting zero.
    let boundary = data.select_test(&data.boundary_mask());
    assert!(boundary.ncols() > 0);
    let truth = boundary.mapv(default_generating_function);
    let outputs = model.auxiliary_outputs(&boundary).unwrap();
    let mse = (&outputs - &truth).mapv(|r| r * r).mean().unwrap();
    let zero_mse = truth.mapv(|y| y * y).mean().unwrap();
    assert!(mse < 0.6 * zero_mse, "boundary mse {mse}, zero predictor {zero_mse}");

    // A positive similarity_param rewards similarity, so the heads agree.
    let similarity = head_similarity(&model, &FiniteDifference::default(), &data.x_train);
    assert!(similarity > 0.9, "cos² {similarity}");

    let predictives = model.predict(&data.x_test, 200).unwrap();
    assert_eq!(predictives.samples.dim(), (200, data.x_test.ncols()));
    assert!(predictives.samples.iter().all(|v| v.is_finite()));
}

fn trained_head_similarity(similarity_param: f64) -> f64 {
    let mut config = gap_config(Architecture::new(20, 1, 1, 2));
    config.model.jacobian = JacobianKind::Analytic;
    config.model.similarity_param = similarity_param;
    config.optimizer.max_iteration = 500;
    let data_config = GapDataConfig {
        number_of_points: 20,
        noise_variance: 0.0,
        region_size: 1.0,
        gap_size: 1.0,
        boundary_size: 0.5,
    };
    let data = generate_data(0, &data_config, default_generating_function).unwrap();

    let mut model = Luna::from_config(&config).unwrap();
    let report = model
        .fit(&data.x_train, &data.y_train, &config.optimizer)
        .unwrap();
    assert!(report.final_terms.fit.is_finite());
    head_similarity(&model, &Analytic, &data.x_train)
}

#[test]
fn negative_similarity_param_diversifies_heads() {
    let baseline = trained_head_similarity(0.0);
    let diverse = trained_head_similarity(-100.0);
    assert!(diverse < 0.25, "cos² {diverse}");
    assert!(diverse < baseline, "cos² {diverse} vs unpenalized {baseline}");
}

#[test]
fn fit_term_decreases_with_fixed_step_on_noiseless_data() {
    let mut config = gap_config(Architecture::new(10, 1, 1, 2));
    config.model.similarity_param = 0.0;
    config.optimizer = OptimizerConfig {
        kind: OptimizerKind::Sgd,
        step_size: 1e-3,
        mass: 0.9,
        max_iteration: 400,
        random_restarts: 1,
        log_every: 1000,
    };
    let data_config = GapDataConfig {
        number_of_points: 20,
        noise_variance: 0.0,
        region_size: 1.0,
        gap_size: 1.0,
        boundary_size: 0.5,
    };
    let data = generate_data(0, &data_config, default_generating_function).unwrap();

    let mut model = Luna::from_config(&config).unwrap();
    model
        .fit(&data.x_train, &data.y_train, &config.optimizer)
        .unwrap();

    let trace = model.objective_trace();
    assert_eq!(trace.len(), 400);
    let early: f64 = trace[..20].iter().map(|r| r.terms.fit).sum::<f64>() / 20.0;
    let late: f64 = trace[380..].iter().map(|r| r.terms.fit).sum::<f64>() / 20.0;
    assert!(late < early, "fit went from {early} to {late}");
}

#[test]
fn configured_run_writes_all_plots() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("luna.toml");
    std::fs::write(
        &config_path,
        format!(
            "[architecture]\nwidth = 8\nhidden_layers = 1\ninput_dim = 1\noutput_dim = 2\n\
             [model]\njacobian = \"analytic\"\nsimilarity_param = 0.5\n\
             [optimizer]\nmax_iteration = 30\n\
             [output]\ndirectory = \"{}\"\n",
            dir.path().join("plots").display()
        ),
    )
    .unwrap();

    let config = LunaConfig::load_from_file(&config_path).unwrap();
    assert_eq!(config.model.jacobian, JacobianKind::Analytic);
    let data = generate_data(
        config.data.seed,
        &config.data.gap_data(),
        default_generating_function,
    )
    .unwrap();

    let mut model = Luna::from_config(&config).unwrap();
    model
        .train(&data.x_train, &data.y_train, &config.optimizer, 50)
        .unwrap();

    let out = std::path::Path::new(&config.output.directory);
    let heads = model.auxiliary_outputs(&data.x_test).unwrap();
    plot_regression(out.join("fit.svg"), &data.x_train, &data.y_train, &data.x_test, &heads)
        .unwrap();
    let predictives = model.predict(&data.x_test, 100).unwrap();
    plot_posterior_predictive(
        out.join("predictive.svg"),
        &data.x_train,
        &data.y_train,
        &data.x_test,
        &predictives.samples,
    )
    .unwrap();
    luna_snapshots(
        &mut model,
        &[0, 15, 29],
        &data.x_test,
        &data.x_train,
        &data.y_train,
        out.join("training.svg"),
    )
    .unwrap();

    for name in ["fit.svg", "predictive.svg", "training.svg"] {
        assert!(out.join(name).exists(), "{name} missing");
    }
}
