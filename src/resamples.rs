//! Aggregation and comparison of resampled performance.
//!
//! A [`Resamples`] holds the per-partition metric records of one or more
//! models generated under the same resampling control, so that partition
//! `i` of every model was trained and tested on the same rows. That pairing
//! is what makes differences and paired t-tests meaningful.

use crate::control::ControlFingerprint;
use crate::metrics::Metric;
use crate::partition::PartitionId;
use crate::runner::{ModelResamples, PartitionScores};
use crate::stats::{adjust_p_values, mean, paired_t_test, quantile, sorted, std_dev, PValueAdjust, StatsError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors raised while aggregating or comparing resamples
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResamplesError {
    #[error("Model '{label}' was resampled under {found}, expected {expected}")]
    IncompatibleControl {
        label: String,
        expected: String,
        found: String,
    },

    #[error("Duplicate model label: {0}")]
    DuplicateModel(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Resamples cannot be paired: {0}")]
    Pairing(String),

    #[error("Metric '{metric}' has {found} paired observations, at least 2 are required")]
    InsufficientPairs { metric: Metric, found: usize },

    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),
}

/// Descriptive statistics of one metric of one model across partitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub model: String,
    pub metric: Metric,
    /// Non-missing values
    pub count: usize,
    pub missing: usize,
    pub mean: f64,
    pub sd: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

/// Paired t-test of one metric between two models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedComparison {
    pub model_a: String,
    pub model_b: String,
    pub metric: Metric,
    /// Mean of `a - b`
    pub estimate: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    /// P-value after multiple-comparison adjustment
    pub p_adjusted: f64,
    /// Paired observations used
    pub n: usize,
}

/// Paired test settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub adjust: PValueAdjust,
}

const fn default_confidence() -> f64 {
    0.95
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            adjust: PValueAdjust::Holm,
        }
    }
}

impl TestConfig {
    #[must_use]
    pub const fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub const fn with_adjust(mut self, adjust: PValueAdjust) -> Self {
        self.adjust = adjust;
        self
    }
}

/// Resampled performance of several models under one control
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resamples {
    models: Vec<ModelResamples>,
}

impl Resamples {
    /// Collect models, checking they share one control and unique labels
    ///
    /// # Errors
    ///
    /// Returns `ResamplesError::IncompatibleControl` if fingerprints differ
    /// or `ResamplesError::DuplicateModel` if a label repeats.
    pub fn new(models: Vec<ModelResamples>) -> Result<Self, ResamplesError> {
        let mut resamples = Self::default();
        for model in models {
            resamples.push(model)?;
        }
        Ok(resamples)
    }

    /// Add one model
    ///
    /// # Errors
    ///
    /// Same conditions as [`Resamples::new`].
    pub fn push(&mut self, model: ModelResamples) -> Result<(), ResamplesError> {
        if let Some(first) = self.models.first() {
            if first.fingerprint != model.fingerprint {
                return Err(ResamplesError::IncompatibleControl {
                    label: model.label,
                    expected: first.fingerprint.to_string(),
                    found: model.fingerprint.to_string(),
                });
            }
        }
        if self.get(&model.label).is_some() {
            return Err(ResamplesError::DuplicateModel(model.label));
        }
        self.models.push(model);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&ModelResamples> {
        self.models.iter().find(|m| m.label == label)
    }

    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.label.as_str()).collect()
    }

    /// Metrics recorded by any model, in order of first appearance
    #[must_use]
    pub fn metrics(&self) -> Vec<Metric> {
        let mut metrics = Vec::new();
        for metric in self.models.iter().flat_map(|m| m.metrics.iter().copied()) {
            if !metrics.contains(&metric) {
                metrics.push(metric);
            }
        }
        metrics
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelResamples> {
        self.models.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Control shared by every model
    #[must_use]
    pub fn fingerprint(&self) -> Option<&ControlFingerprint> {
        self.models.first().map(|m| &m.fingerprint)
    }

    /// Per (model, metric) descriptive statistics over non-missing values
    #[must_use]
    pub fn summary(&self) -> Vec<MetricSummary> {
        let mut rows = Vec::new();
        for model in &self.models {
            for &metric in &model.metrics {
                let all = model.values(metric).unwrap_or_default();
                let values: Vec<f64> = all.iter().filter_map(|v| *v).collect();
                let ordered = sorted(&values);
                rows.push(MetricSummary {
                    model: model.label.clone(),
                    metric,
                    count: values.len(),
                    missing: all.len() - values.len(),
                    mean: mean(&values),
                    sd: std_dev(&values),
                    min: quantile(&ordered, 0.0),
                    q25: quantile(&ordered, 0.25),
                    median: quantile(&ordered, 0.5),
                    q75: quantile(&ordered, 0.75),
                    max: quantile(&ordered, 1.0),
                });
            }
        }
        rows
    }

    fn require(&self, label: &str) -> Result<&ModelResamples, ResamplesError> {
        self.get(label)
            .ok_or_else(|| ResamplesError::UnknownModel(label.to_string()))
    }

    /// Per-partition differences `a - b` for every shared metric
    ///
    /// # Errors
    ///
    /// Returns `ResamplesError::UnknownModel` for an unknown label or
    /// `ResamplesError::Pairing` if the partitions do not match 1:1.
    pub fn diff_pair(&self, a: &str, b: &str) -> Result<ModelResamples, ResamplesError> {
        difference(self.require(a)?, self.require(b)?)
    }

    /// Differences for every model pair `(i, j)` with `i < j`
    ///
    /// # Errors
    ///
    /// Returns `ResamplesError::Pairing` if any pair of models does not
    /// share the same partitions.
    pub fn diff(&self) -> Result<Self, ResamplesError> {
        let mut diffs = Vec::new();
        for (i, a) in self.models.iter().enumerate() {
            for b in &self.models[i + 1..] {
                diffs.push(difference(a, b)?);
            }
        }
        Self::new(diffs)
    }

    /// Paired t-tests of `a` against `b`, one per shared metric
    ///
    /// # Errors
    ///
    /// Returns `ResamplesError::Pairing` if the partitions do not match or
    /// `ResamplesError::InsufficientPairs` if a metric has fewer than two
    /// paired observations.
    pub fn paired_test(&self, a: &str, b: &str, config: &TestConfig) -> Result<Vec<PairedComparison>, ResamplesError> {
        compare(self.require(a)?, self.require(b)?, config)
    }

    /// Paired t-tests for every model pair and metric; p-values are
    /// adjusted across the model pairs of each metric
    ///
    /// # Errors
    ///
    /// Same conditions as [`Resamples::paired_test`].
    pub fn paired_tests(&self, config: &TestConfig) -> Result<Vec<PairedComparison>, ResamplesError> {
        let mut comparisons = Vec::new();
        for (i, a) in self.models.iter().enumerate() {
            for b in &self.models[i + 1..] {
                comparisons.extend(test_pair(a, b, config)?);
            }
        }
        adjust_by_metric(&mut comparisons, config.adjust);
        Ok(comparisons)
    }
}

/// Paired t-tests between two independently produced model resamples
///
/// # Errors
///
/// Returns `ResamplesError::Pairing` if the two were generated under
/// different controls or over different partitions, and
/// `ResamplesError::InsufficientPairs` when a metric has fewer than two
/// paired observations.
pub fn compare(a: &ModelResamples, b: &ModelResamples, config: &TestConfig) -> Result<Vec<PairedComparison>, ResamplesError> {
    if a.fingerprint != b.fingerprint {
        return Err(ResamplesError::Pairing(format!(
            "'{}' used {} but '{}' used {}",
            a.label, a.fingerprint, b.label, b.fingerprint
        )));
    }
    let mut comparisons = test_pair(a, b, config)?;
    adjust_by_metric(&mut comparisons, config.adjust);
    Ok(comparisons)
}

fn check_pairing(a: &ModelResamples, b: &ModelResamples) -> Result<(), ResamplesError> {
    let ids_a: Vec<PartitionId> = a.ids();
    let ids_b: Vec<PartitionId> = b.ids();
    if ids_a != ids_b {
        return Err(ResamplesError::Pairing(format!(
            "'{}' has {} partitions and '{}' has {}, or their ids differ",
            a.label,
            ids_a.len(),
            b.label,
            ids_b.len()
        )));
    }
    Ok(())
}

fn shared_metrics(a: &ModelResamples, b: &ModelResamples) -> Vec<Metric> {
    let in_b: HashSet<Metric> = b.metrics.iter().copied().collect();
    a.metrics.iter().copied().filter(|m| in_b.contains(m)).collect()
}

fn difference(a: &ModelResamples, b: &ModelResamples) -> Result<ModelResamples, ResamplesError> {
    check_pairing(a, b)?;
    let metrics = shared_metrics(a, b);
    let columns: Vec<(usize, usize)> = metrics
        .iter()
        .filter_map(|metric| {
            let i = a.metrics.iter().position(|m| m == metric)?;
            let j = b.metrics.iter().position(|m| m == metric)?;
            Some((i, j))
        })
        .collect();

    let records = a
        .records
        .iter()
        .zip(&b.records)
        .map(|(ra, rb)| PartitionScores {
            id: ra.id,
            train_size: ra.train_size,
            test_size: ra.test_size,
            values: columns
                .iter()
                .map(|&(i, j)| Some(ra.values[i]? - rb.values[j]?))
                .collect(),
        })
        .collect();

    Ok(ModelResamples {
        label: format!("{} - {}", a.label, b.label),
        fingerprint: a.fingerprint.clone(),
        metrics,
        records,
    })
}

/// Unadjusted tests; `p_adjusted` starts out equal to `p_value`
fn test_pair(a: &ModelResamples, b: &ModelResamples, config: &TestConfig) -> Result<Vec<PairedComparison>, ResamplesError> {
    let diff = difference(a, b)?;
    let mut comparisons = Vec::with_capacity(diff.metrics.len());
    for &metric in &diff.metrics {
        let values: Vec<f64> = diff
            .values(metric)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        if values.len() < 2 {
            return Err(ResamplesError::InsufficientPairs {
                metric,
                found: values.len(),
            });
        }
        let test = paired_t_test(&values, config.confidence)?;
        comparisons.push(PairedComparison {
            model_a: a.label.clone(),
            model_b: b.label.clone(),
            metric,
            estimate: test.estimate,
            ci_lower: test.ci_lower,
            ci_upper: test.ci_upper,
            t_statistic: test.t_statistic,
            degrees_of_freedom: test.degrees_of_freedom,
            p_value: test.p_value,
            p_adjusted: test.p_value,
            n: test.n,
        });
    }
    Ok(comparisons)
}

fn adjust_by_metric(comparisons: &mut [PairedComparison], method: PValueAdjust) {
    let mut seen = Vec::new();
    for metric in comparisons.iter().map(|c| c.metric) {
        if !seen.contains(&metric) {
            seen.push(metric);
        }
    }
    for metric in seen {
        let members: Vec<usize> = (0..comparisons.len())
            .filter(|&i| comparisons[i].metric == metric)
            .collect();
        let p: Vec<f64> = members.iter().map(|&i| comparisons[i].p_value).collect();
        for (&i, adjusted) in members.iter().zip(adjust_p_values(&p, method)) {
            comparisons[i].p_adjusted = adjusted;
        }
    }
}
