//! Integration tests for the resample-eval CLI and library.
//!
//! These tests verify end-to-end functionality including:
//! - Resampling several models on shared partitions and comparing them
//! - Tuning a grid and refitting the winner
//! - Experiment configurations driving the CLI

#![allow(clippy::unwrap_used)]
#![allow(clippy::float_cmp)]
#![allow(clippy::cast_precision_loss)]

use resample_eval::{
    Column, Dataset, ExperimentConfig, Factor, KnnModel, Metric, Model, ModelError, NullModel,
    ParamGrid, ParamSet, ParamValue, Partitioner, Response, ResponseType, ResampleControl,
    ResampleReport, ResampleRunner, Resamples, RunnerConfig, RunnerError, Surv, TestConfig,
    TuneConfig, Tuner,
};
use std::path::Path;
use std::process::Command;

/// Two classes separated along `x`
fn two_class(n: usize) -> Dataset {
    let labels: Vec<&str> = (0..n).map(|i| if i < n / 2 { "a" } else { "b" }).collect();
    let x: Vec<f64> = (0..n).map(|i| i as f64 + 0.3 * ((i * 7) % 5) as f64).collect();
    Dataset::builder("y", Response::Factor(Factor::from_labels(&labels).unwrap()))
        .predictor("x", Column::Numeric(x))
        .build()
        .unwrap()
}

fn two_class_json(n: usize) -> serde_json::Value {
    let labels: Vec<&str> = (0..n).map(|i| if i < n / 2 { "a" } else { "b" }).collect();
    let x: Vec<f64> = (0..n).map(|i| i as f64 + 0.3 * ((i * 7) % 5) as f64).collect();
    serde_json::json!({
        "response": "y",
        "response_type": "binary",
        "columns": [
            {"name": "y", "values": labels},
            {"name": "x", "values": x}
        ]
    })
}

fn write_experiment(dir: &Path, extra: &str) -> std::path::PathBuf {
    std::fs::write(
        dir.join("data.json"),
        serde_json::to_string(&two_class_json(40)).unwrap(),
    )
    .unwrap();
    let yaml = format!(
        "title: Two Classes\ndata: data.json\ncontrol:\n  method: cross_validation\n  folds: 5\n  repeats: 2\n  seed: 3\n  strata: y\n{extra}"
    );
    let path = dir.join("experiment.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

fn sequential() -> ResampleRunner {
    ResampleRunner::with_config(RunnerConfig::sequential())
}

// ============================================================================
// Library workflows
// ============================================================================

#[test]
fn test_knn_beats_null_model() {
    let data = two_class(60);
    let control = ResampleControl::cross_validation(10, 3).unwrap().with_seed(11);
    let runner = ResampleRunner::new();

    let knn = runner
        .run(&data, &KnnModel::new(3).unwrap(), &control, &[Metric::Accuracy, Metric::Kappa])
        .unwrap();
    let null = runner
        .run(&data, &NullModel::new(), &control, &[Metric::Accuracy, Metric::Kappa])
        .unwrap();
    let resamples = Resamples::new(vec![knn, null]).unwrap();

    let summary = resamples.summary();
    let accuracy = |model: &str| {
        summary
            .iter()
            .find(|s| s.model == model && s.metric == Metric::Accuracy)
            .unwrap()
            .mean
    };
    assert!(accuracy("knn") > 0.9);
    assert!(accuracy("knn") > accuracy("null"));

    let tests = resamples.paired_tests(&TestConfig::default()).unwrap();
    let test = tests.iter().find(|t| t.metric == Metric::Accuracy).unwrap();
    assert_eq!(test.n, 30);
    assert!(test.estimate > 0.3);
    assert!(test.p_adjusted < 0.001);
}

#[test]
fn test_binary_defaults_include_roc_auc() {
    let data = two_class(40);
    assert_eq!(data.response_type(), ResponseType::Binary);
    let control = ResampleControl::bootstrap(5).unwrap();
    let result = sequential()
        .run(&data, &KnnModel::new(5).unwrap(), &control, &[])
        .unwrap();
    assert!(result.metrics.contains(&Metric::RocAuc));
    assert!(result.metrics.contains(&Metric::Sensitivity));
    assert_eq!(result.n_partitions(), 5);
}

#[test]
fn test_survival_resampling() {
    let n = 45;
    let time: Vec<f64> = (0..n).map(|i| (i + 1) as f64).collect();
    let event: Vec<bool> = (0..n).map(|i| i % 3 != 0).collect();
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let data = Dataset::builder("time", Response::Survival(Surv::new(time, event).unwrap()))
        .predictor("x", Column::Numeric(x))
        .build()
        .unwrap();
    let control = ResampleControl::cross_validation(3, 1)
        .unwrap()
        .with_times(vec![10.0, 20.0])
        .unwrap();

    let result = sequential()
        .run(&data, &KnnModel::new(5).unwrap(), &control, &[])
        .unwrap();
    assert_eq!(result.metrics, vec![Metric::Cindex, Metric::Brier]);
    for metric in [Metric::Cindex, Metric::Brier] {
        let values = result.values(metric).unwrap();
        assert!(values.iter().all(Option::is_some), "{metric} missing");
    }
}

#[test]
fn test_survival_brier_skipped_without_times() {
    let time: Vec<f64> = (1..=12).map(f64::from).collect();
    let event = vec![true; 12];
    let data = Dataset::builder("time", Response::Survival(Surv::new(time, event).unwrap()))
        .build()
        .unwrap();
    let control = ResampleControl::cross_validation(3, 1).unwrap();
    let result = sequential()
        .run(&data, &NullModel::new(), &control, &[Metric::Cindex, Metric::Brier])
        .unwrap();
    assert_eq!(result.metrics, vec![Metric::Cindex]);
}

#[test]
fn test_failure_names_first_failing_partition_in_parallel() {
    struct FailsWithoutRowThree;

    impl Model for FailsWithoutRowThree {
        fn label(&self) -> &str {
            "fragile"
        }

        fn supports(&self, kind: ResponseType) -> bool {
            kind == ResponseType::Numeric
        }

        fn fit(&self, data: &Dataset) -> Result<Box<dyn resample_eval::FittedModel>, ModelError> {
            let Response::Numeric(y) = data.response() else {
                return Err(ModelError::Fit("numeric only".to_string()));
            };
            if !y.contains(&3.0) {
                return Err(ModelError::Fit("row 3 held out".to_string()));
            }
            NullModel::new().fit(data)
        }
    }

    let data = Dataset::builder("y", Response::Numeric((0..40).map(f64::from).collect()))
        .build()
        .unwrap();
    let control = ResampleControl::cross_validation(4, 3).unwrap().with_seed(5);
    let runner = ResampleRunner::with_config(RunnerConfig::default().with_threads(4));

    let expected = Partitioner::new(&control, &data)
        .unwrap()
        .iter()
        .find(|p| p.test.contains(&3))
        .unwrap()
        .id;
    assert_eq!(expected.repeat, 0);

    for _ in 0..5 {
        let err = runner
            .run(&data, &FailsWithoutRowThree, &control, &[])
            .unwrap_err();
        match err {
            RunnerError::Partition { id, .. } => assert_eq!(id, expected),
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[test]
fn test_tune_knn_grid_and_report() {
    let data = two_class(50);
    let grid = ParamGrid::new()
        .with_param("k", vec![ParamValue::Int(1), ParamValue::Int(5), ParamValue::Int(25)])
        .unwrap();
    let factory = |params: &ParamSet| -> Result<Box<dyn Model>, ModelError> {
        Ok(Box::new(KnnModel::from_params(params)?))
    };
    let control = ResampleControl::cross_validation(5, 2).unwrap();
    let config = TuneConfig::default().with_metrics(vec![Metric::Accuracy, Metric::Kappa]);

    let result = Tuner::new()
        .tune(&data, &factory, &grid, &control, &config)
        .unwrap();
    assert_eq!(result.selection, Metric::Accuracy);
    assert!(result.maximize);
    assert_eq!(result.scores.len(), 3);
    let best = result.best_score().unwrap();
    assert!(result.scores.iter().all(|s| s.mean.unwrap() <= best));

    // grid points are paired with each other
    let report = ResampleReport::build("grid", &result.resamples, &TestConfig::default()).unwrap();
    assert_eq!(report.comparisons.len(), 3 * 2);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_experiment_config_round_trip_to_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_experiment(
        dir.path(),
        "metrics: [accuracy]\nrunner:\n  sequential: true\nmodels:\n  - kind: null_model\n  - label: knn3\n    kind: knn\n    k: 3\n",
    );
    let config = ExperimentConfig::load(&path).unwrap();
    let data = config.load_dataset().unwrap();
    let runner = ResampleRunner::with_config(config.runner.runner_config());

    let mut resamples = Resamples::default();
    for model in config.build_models().unwrap() {
        resamples
            .push(runner.run(&data, model.as_ref(), &config.control, &config.metrics).unwrap())
            .unwrap();
    }
    assert_eq!(resamples.labels(), vec!["null", "knn3"]);
    assert_eq!(resamples.fingerprint().unwrap().seed, 3);
    let report = ResampleReport::build(&config.title, &resamples, &config.tests).unwrap();
    assert!(report.to_markdown().contains("# Two Classes"));
}

// ============================================================================
// CLI
// ============================================================================

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_resample-eval"))
}

#[test]
fn test_cli_help_lists_commands() {
    let output = cli().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["resample", "tune", "partitions"] {
        assert!(stdout.contains(command), "help should list {command}");
    }
}

#[test]
fn test_cli_resample_markdown_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_experiment(
        dir.path(),
        "models:\n  - kind: null_model\n  - label: knn5\n    kind: knn\n",
    );
    let report_path = dir.path().join("report.md");

    let output = cli()
        .args(["resample", "--config"])
        .arg(&path)
        .arg("--output")
        .arg(&report_path)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = std::fs::read_to_string(&report_path).unwrap();
    assert!(report.contains("# Two Classes"));
    assert!(report.contains("## Paired Comparisons"));
    assert!(report.contains("knn5 - null") || report.contains("null - knn5"));
}

#[test]
fn test_cli_resample_json_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_experiment(dir.path(), "metrics: [accuracy, kappa]\nmodels:\n  - kind: knn\n");

    let output = cli()
        .args(["resample", "--format", "json", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["metadata"]["partitions"], 10);
    assert_eq!(report["summary"].as_array().unwrap().len(), 2);
    assert!(report["comparisons"].as_array().unwrap().is_empty());
}

#[test]
fn test_cli_tune_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_experiment(
        dir.path(),
        "metrics: [accuracy]\ntune:\n  kind: knn\n  grid:\n    k: [1, 3, 5]\n",
    );

    let output = cli()
        .args(["tune", "--format", "json", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["selection"], "accuracy");
    assert_eq!(report["scores"].as_array().unwrap().len(), 3);
    assert!(report["best"].as_u64().unwrap() < 3);
}

#[test]
fn test_cli_partitions_cross_validation() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.json");
    std::fs::write(&data, serde_json::to_string(&two_class_json(40)).unwrap()).unwrap();

    let output = cli()
        .args(["partitions", "--method", "cv", "--folds", "4", "--data"])
        .arg(&data)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("cross_validation(4 folds x 1)"));
    assert!(stdout.contains("1.4"));
    assert!(!stdout.contains("1.5"));
}

#[test]
fn test_cli_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = dir.path().join("*.yaml");
    let output = cli()
        .args(["resample", "--config"])
        .arg(&pattern)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no experiment configuration matches"));
}

#[test]
fn test_cli_invalid_folds_fails() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.json");
    std::fs::write(&data, serde_json::to_string(&two_class_json(10)).unwrap()).unwrap();

    let output = cli()
        .args(["partitions", "--folds", "1", "--data"])
        .arg(&data)
        .output()
        .unwrap();
    assert!(!output.status.success());
}
