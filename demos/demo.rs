//! Demo: resample-eval library in action

#![allow(clippy::cast_precision_loss)]

use resample_eval::{
    Column, Dataset, Factor, KnnModel, Metric, Model, ModelError, NullModel, ParamGrid, ParamSet,
    ParamValue, ResampleControl, ResampleReport, ResampleRunner, Resamples, Response, TestConfig,
    TuneConfig, Tuner,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Resample Eval Demo ===\n");

    // 1. A three-class problem with one informative and one noisy predictor
    let n = 150;
    let species: Vec<&str> = (0..n)
        .map(|i| ["setosa", "versicolor", "virginica"][i / 50])
        .collect();
    let petal: Vec<f64> = (0..n)
        .map(|i| (i / 50) as f64 * 1.5 + ((i * 7) % 10) as f64 / 8.0)
        .collect();
    let sepal: Vec<f64> = (0..n).map(|i| ((i * 13) % 17) as f64 / 4.0).collect();
    let data = Dataset::builder("species", Response::Factor(Factor::from_labels(&species)?))
        .predictor("petal", Column::Numeric(petal))
        .predictor("sepal", Column::Numeric(sepal))
        .build()?;
    println!("1. Dataset: {} rows, response {}", data.n_rows(), data.response_type());

    // 2. Stratified 10-fold cross-validation, repeated 3 times
    let control = ResampleControl::cross_validation(10, 3)?
        .with_seed(2024)
        .with_strata("species");
    let metrics = [Metric::Accuracy, Metric::Kappa, Metric::Brier];
    let runner = ResampleRunner::new();

    let mut resamples = Resamples::default();
    for model in [
        Box::new(NullModel::new()) as Box<dyn Model>,
        Box::new(KnnModel::new(1)?.with_label("knn1")),
        Box::new(KnnModel::new(9)?.with_label("knn9")),
    ] {
        resamples.push(runner.run(&data, model.as_ref(), &control, &metrics)?)?;
    }
    println!("2. Resampled {} models under {}\n", resamples.len(), control.fingerprint());

    // 3. Summary and paired comparisons
    let report = ResampleReport::build("Demo", &resamples, &TestConfig::default())?;
    println!("{}", report.to_markdown());

    // 4. Tune k on the same partitions
    let grid = ParamGrid::new().with_param("k", (1..=15).step_by(2).map(ParamValue::Int).collect())?;
    let factory = |params: &ParamSet| -> Result<Box<dyn Model>, ModelError> {
        Ok(Box::new(KnnModel::from_params(params)?))
    };
    let tuned = Tuner::with_runner(runner).tune(
        &data,
        &factory,
        &grid,
        &control,
        &TuneConfig::default().with_metrics(metrics.to_vec()),
    )?;
    println!("4. Grid search over k ({} points)", tuned.scores.len());
    for (i, score) in tuned.scores.iter().enumerate() {
        let marker = if i == tuned.best { " <- selected" } else { "" };
        println!(
            "   {:<8} {} = {:.4}{marker}",
            score.params.to_string(),
            tuned.selection,
            score.mean.unwrap_or(f64::NAN)
        );
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}
