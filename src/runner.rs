//! Resampling execution engine.
//!
//! Fits a model on the training rows of every partition, predicts the test
//! rows and scores the predictions with the selected metrics. Cycles are
//! independent and run on an explicit executor; results are always returned
//! in partition order.

use crate::control::{ControlFingerprint, ResampleControl};
use crate::dataset::{Dataset, ResponseType};
use crate::metrics::{default_metrics, Metric, MetricError, MetricOptions};
use crate::model::{Model, ModelError, PredictOptions};
use crate::partition::{Partition, PartitionError, PartitionId, Partitioner};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur while resampling a model
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Partitioning failed: {0}")]
    Partitioning(#[from] PartitionError),

    #[error("Model '{model}' does not support {kind} responses")]
    UnsupportedResponse { model: String, kind: ResponseType },

    #[error("None of the requested metrics applies to {0} responses")]
    NoApplicableMetrics(ResponseType),

    #[error("Resample {id} failed: {source}")]
    Partition {
        id: PartitionId,
        source: CycleError,
    },

    #[error("Resampling timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(String),
}

/// Failure inside a single resampling cycle
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("fit failed: {0}")]
    Fit(ModelError),

    #[error("prediction failed: {0}")]
    Predict(ModelError),

    #[error("{0}")]
    Metric(#[from] MetricError),
}

/// Where resampling cycles run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Executor {
    /// One cycle after another on the calling thread
    Sequential,
    /// A dedicated rayon pool; `None` uses one thread per core
    Parallel { threads: Option<usize> },
}

impl Default for Executor {
    fn default() -> Self {
        Self::Parallel { threads: None }
    }
}

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunnerConfig {
    pub executor: Executor,
    /// Wall-clock budget for a whole run, checked before each cycle starts.
    /// Cycles not started in time fail; a cycle already running is never
    /// interrupted, so a slow fit can finish past the deadline.
    pub timeout: Option<Duration>,
}

impl RunnerConfig {
    #[must_use]
    pub const fn sequential() -> Self {
        Self {
            executor: Executor::Sequential,
            timeout: None,
        }
    }

    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.executor = Executor::Parallel {
            threads: Some(threads),
        };
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Metric values of one partition, aligned with [`ModelResamples::metrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionScores {
    pub id: PartitionId,
    pub train_size: usize,
    pub test_size: usize,
    /// `None` marks a metric that could not be computed for this partition
    pub values: Vec<Option<f64>>,
}

/// Resampled performance of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResamples {
    pub label: String,
    pub fingerprint: ControlFingerprint,
    pub metrics: Vec<Metric>,
    /// Sorted by partition id
    pub records: Vec<PartitionScores>,
}

impl ModelResamples {
    /// Per-partition values of one metric, in partition order
    #[must_use]
    pub fn values(&self, metric: Metric) -> Option<Vec<Option<f64>>> {
        let column = self.metrics.iter().position(|&m| m == metric)?;
        Some(self.records.iter().map(|r| r.values[column]).collect())
    }

    /// Partition ids in order
    #[must_use]
    pub fn ids(&self) -> Vec<PartitionId> {
        self.records.iter().map(|r| r.id).collect()
    }

    #[must_use]
    pub fn n_partitions(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Runs models through resampling partitions
#[derive(Debug, Clone, Default)]
pub struct ResampleRunner {
    config: RunnerConfig,
}

/// Inputs shared by every cycle of a run
struct CycleContext<'a> {
    data: &'a Dataset,
    model: &'a dyn Model,
    metrics: &'a [Metric],
    metric_options: MetricOptions,
    predict_options: PredictOptions,
    deadline: Option<Instant>,
    timeout: Duration,
    /// Lowest partition index that has failed so far
    first_failure: AtomicUsize,
}

impl ResampleRunner {
    /// Create a runner with the default (parallel) configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Resample `model` on `data` under `control`
    ///
    /// An empty `metrics` slice selects the defaults for the response type.
    /// Metrics that do not apply to the response type are skipped.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::Partition` naming the first partition (in
    /// partition order) whose fit, prediction or scoring failed, or a setup
    /// error before any cycle runs.
    pub fn run(
        &self,
        data: &Dataset,
        model: &dyn Model,
        control: &ResampleControl,
        metrics: &[Metric],
    ) -> Result<ModelResamples, RunnerError> {
        let kind = data.response_type();
        if !model.supports(kind) {
            return Err(RunnerError::UnsupportedResponse {
                model: model.label().to_string(),
                kind,
            });
        }

        let metric_options = MetricOptions::from_control(control);
        let selected = select_metrics(kind, metrics, &metric_options)?;
        let partitioner = Partitioner::new(control, data)?;

        tracing::info!(
            model = model.label(),
            method = %control.method(),
            partitions = partitioner.len(),
            metrics = selected.len(),
            "Starting resampling"
        );
        let start = Instant::now();

        let context = CycleContext {
            data,
            model,
            metrics: &selected,
            metric_options,
            predict_options: PredictOptions::new(kind, control.times()),
            deadline: self.config.timeout.map(|t| start + t),
            timeout: self.config.timeout.unwrap_or_default(),
            first_failure: AtomicUsize::new(usize::MAX),
        };

        let outcomes = self.execute(&partitioner, &context)?;
        drop(context);

        let mut records = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Some(Ok(scores)) => records.push(scores),
                Some(Err(error)) => {
                    tracing::warn!(model = model.label(), error = %error, "Resampling aborted");
                    return Err(error);
                }
                None => {}
            }
        }
        records.sort_by_key(|r| r.id);

        tracing::info!(
            model = model.label(),
            partitions = records.len(),
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Resampling finished"
        );

        Ok(ModelResamples {
            label: model.label().to_string(),
            fingerprint: control.fingerprint(),
            metrics: selected,
            records,
        })
    }

    /// Run every cycle on the configured executor; outcomes are in
    /// partition order, `None` for cycles skipped after an earlier failure
    fn execute(
        &self,
        partitioner: &Partitioner,
        context: &CycleContext<'_>,
    ) -> Result<Vec<Option<Result<PartitionScores, RunnerError>>>, RunnerError> {
        let cycle = |i: usize| {
            partitioner
                .partition(i)
                .and_then(|partition| run_cycle(i, &partition, context))
        };

        match self.config.executor {
            Executor::Sequential => Ok((0..partitioner.len()).map(cycle).collect()),
            Executor::Parallel { threads } => {
                let mut builder = rayon::ThreadPoolBuilder::new();
                if let Some(threads) = threads {
                    builder = builder.num_threads(threads);
                }
                let pool = builder
                    .build()
                    .map_err(|e| RunnerError::ThreadPool(e.to_string()))?;
                Ok(pool.install(|| (0..partitioner.len()).into_par_iter().map(cycle).collect()))
            }
        }
    }
}

/// Resolve the metrics to compute, in request order without duplicates
fn select_metrics(
    kind: ResponseType,
    requested: &[Metric],
    options: &MetricOptions,
) -> Result<Vec<Metric>, RunnerError> {
    let requested = if requested.is_empty() {
        default_metrics(kind)
    } else {
        requested.to_vec()
    };

    let mut selected = Vec::with_capacity(requested.len());
    for metric in requested {
        if !metric.is_available(kind, options) {
            tracing::debug!(metric = %metric, kind = %kind, "Skipping metric not available for response");
        } else if !selected.contains(&metric) {
            selected.push(metric);
        }
    }

    if selected.is_empty() {
        return Err(RunnerError::NoApplicableMetrics(kind));
    }
    Ok(selected)
}

/// One fit/predict/score cycle; `None` if an earlier partition already failed
fn run_cycle(
    index: usize,
    partition: &Partition,
    context: &CycleContext<'_>,
) -> Option<Result<PartitionScores, RunnerError>> {
    if index > context.first_failure.load(Ordering::SeqCst) {
        return None;
    }
    let outcome = score_partition(partition, context);
    if outcome.is_err() {
        context.first_failure.fetch_min(index, Ordering::SeqCst);
    }
    Some(outcome)
}

fn score_partition(
    partition: &Partition,
    context: &CycleContext<'_>,
) -> Result<PartitionScores, RunnerError> {
    if context.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        return Err(RunnerError::Timeout(context.timeout));
    }

    let id = partition.id;
    let fail = |source: CycleError| RunnerError::Partition { id, source };

    if partition.test.is_empty() {
        tracing::warn!(partition = %id, "Empty test set; recording missing values");
        return Ok(PartitionScores {
            id,
            train_size: partition.train.len(),
            test_size: 0,
            values: vec![None; context.metrics.len()],
        });
    }

    tracing::debug!(
        partition = %id,
        train = partition.train.len(),
        test = partition.test.len(),
        "Fitting resample"
    );

    let train = context.data.subset(&partition.train);
    let test = context.data.subset(&partition.test);
    let fitted = context
        .model
        .fit(&train)
        .map_err(|e| fail(CycleError::Fit(e)))?;
    let prediction = fitted
        .predict(&test, &context.predict_options)
        .map_err(|e| fail(CycleError::Predict(e)))?;

    let values = context
        .metrics
        .iter()
        .map(|metric| {
            metric
                .compute(test.response(), &prediction, &context.metric_options)
                .map(|value| value.filter(|v| v.is_finite()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| fail(CycleError::Metric(e)))?;

    Ok(PartitionScores {
        id,
        train_size: partition.train.len(),
        test_size: partition.test.len(),
        values,
    })
}
