//! # Resample Eval
//!
//! Resampling-based performance estimation for pluggable statistical models.
//!
//! A model is fit on the training side of every partition of a dataset and
//! scored on the held-out side. The per-partition scores estimate how the
//! model performs on new data, and because every model is resampled on the
//! same partitions their scores can be compared pairwise.
//!
//! ## Architecture
//!
//! ```text
//! Dataset + ResampleControl
//!        ↓
//! Partitioner (bootstrap | k-fold | out-of-bootstrap | split | train)
//!        ↓
//! ResampleRunner (fit → predict → score, sequential or parallel)
//!        ↓
//! ModelResamples (one record per partition)
//!        ↓
//! Resamples (summary, diff, paired t-tests)   Tuner (grid search, refit)
//!        ↓
//! Report (markdown | JSON)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use resample_eval::{Dataset, KnnModel, NullModel, ResampleControl, ResampleRunner, Resamples, TestConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = Dataset::load("iris.json")?;
//! let control = ResampleControl::cross_validation(10, 5)?.with_seed(1);
//! let runner = ResampleRunner::new();
//!
//! let knn = runner.run(&data, &KnnModel::new(5)?, &control, &[])?;
//! let null = runner.run(&data, &NullModel::new(), &control, &[])?;
//!
//! let resamples = Resamples::new(vec![knn, null])?;
//! for test in resamples.paired_tests(&TestConfig::default())? {
//!     println!("{} - {} {}: p = {:.4}", test.model_a, test.model_b, test.metric, test.p_adjusted);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod dataset;
pub mod metrics;
pub mod model;
pub mod models;
pub mod partition;
pub mod report;
pub mod resamples;
pub mod runner;
pub mod stats;
pub mod tune;

pub use config::{ConfigError, ExperimentConfig, ModelKind, ModelSpec, RunnerSettings, TuneSpec};
pub use control::{ControlError, ControlFingerprint, CutoffIndex, ResampleControl, ResampleMethod};
pub use dataset::{
    Column, Dataset, DatasetBuilder, DatasetError, Factor, NumericMatrix, Response, ResponseType,
    Schema, Surv,
};
pub use metrics::{default_metrics, Metric, MetricError, MetricOptions};
pub use model::{
    FittedModel, Model, ModelError, ModelFactory, ParamSet, ParamValue, PredictMode,
    PredictOptions, Prediction,
};
pub use models::{KnnModel, NullModel, WeightScheme};
pub use partition::{Partition, PartitionError, PartitionId, Partitioner};
pub use report::{ReportMetadata, ResampleReport, TuneReport};
pub use resamples::{
    compare, MetricSummary, PairedComparison, Resamples, ResamplesError, TestConfig,
};
pub use runner::{
    CycleError, Executor, ModelResamples, PartitionScores, ResampleRunner, RunnerConfig,
    RunnerError,
};
pub use stats::{PValueAdjust, StatsError, TTest};
pub use tune::{GridScore, ParamGrid, TuneConfig, TuneError, TuneResult, Tuner};
