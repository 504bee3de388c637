//! Performance metric registry.
//!
//! Every [`Metric`] knows its name, its optimization direction and the
//! response types it applies to. [`Metric::compute`] scores one set of
//! predictions against the observed responses of a test set:
//! - Classification: accuracy, Cohen's kappa, weighted kappa, Brier score,
//!   cross-entropy, ROC AUC, sensitivity, specificity, cutoff index
//! - Regression: RMSE, MSE, MAE, R²
//! - Survival: Harrell's C-index, time-dependent (IPCW) Brier score

use crate::control::{CutoffIndex, ResampleControl};
use crate::dataset::{Factor, NumericMatrix, Response, ResponseType, Surv};
use crate::model::Prediction;
use crate::stats::{kaplan_meier, step_at, step_before};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Floor applied to probabilities before taking logs
const PROB_EPSILON: f64 = 1e-15;

/// Errors raised while computing a metric
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Metric '{metric}' is not available for {kind} responses")]
    Unavailable { metric: Metric, kind: ResponseType },

    #[error("Prediction does not match the observed response: {0}")]
    Mismatch(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
}

/// A named performance metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    Kappa,
    /// Linearly weighted kappa for ordered factors
    WeightedKappa,
    Brier,
    CrossEntropy,
    RocAuc,
    Sensitivity,
    Specificity,
    /// Sensitivity/specificity tradeoff selected by [`CutoffIndex`]
    CutoffIndex,
    Rmse,
    Mse,
    Mae,
    R2,
    /// Harrell's concordance index
    Cindex,
}

impl Metric {
    /// Every registered metric
    pub const ALL: [Self; 14] = [
        Self::Accuracy,
        Self::Kappa,
        Self::WeightedKappa,
        Self::Brier,
        Self::CrossEntropy,
        Self::RocAuc,
        Self::Sensitivity,
        Self::Specificity,
        Self::CutoffIndex,
        Self::Rmse,
        Self::Mse,
        Self::Mae,
        Self::R2,
        Self::Cindex,
    ];

    /// Registered name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Kappa => "kappa",
            Self::WeightedKappa => "weighted_kappa",
            Self::Brier => "brier",
            Self::CrossEntropy => "cross_entropy",
            Self::RocAuc => "roc_auc",
            Self::Sensitivity => "sensitivity",
            Self::Specificity => "specificity",
            Self::CutoffIndex => "cutoff_index",
            Self::Rmse => "rmse",
            Self::Mse => "mse",
            Self::Mae => "mae",
            Self::R2 => "r2",
            Self::Cindex => "cindex",
        }
    }

    /// Whether larger values are better
    #[must_use]
    pub const fn higher_is_better(self) -> bool {
        !matches!(
            self,
            Self::Brier | Self::CrossEntropy | Self::Rmse | Self::Mse | Self::Mae
        )
    }

    /// Whether this metric is defined for a response type
    #[must_use]
    pub const fn applies_to(self, kind: ResponseType) -> bool {
        let categorical = matches!(
            kind,
            ResponseType::Binary | ResponseType::Factor | ResponseType::Ordered
        );
        match self {
            Self::Accuracy | Self::Kappa | Self::CrossEntropy => categorical,
            Self::Brier => categorical || matches!(kind, ResponseType::Survival),
            Self::WeightedKappa => matches!(kind, ResponseType::Ordered),
            Self::RocAuc | Self::Sensitivity | Self::Specificity | Self::CutoffIndex => {
                matches!(kind, ResponseType::Binary)
            }
            Self::Rmse | Self::Mse | Self::Mae | Self::R2 => {
                matches!(kind, ResponseType::Numeric | ResponseType::Matrix)
            }
            Self::Cindex => matches!(kind, ResponseType::Survival),
        }
    }

    /// Whether this metric can be computed for a response type under the
    /// given options (survival Brier needs evaluation times)
    #[must_use]
    pub fn is_available(self, kind: ResponseType, options: &MetricOptions) -> bool {
        match (self, kind) {
            (Self::Brier, ResponseType::Survival) => !options.times.is_empty(),
            _ => self.applies_to(kind),
        }
    }

    /// Score predictions against observed responses
    ///
    /// Returns `Ok(None)` when the metric is mathematically undefined for
    /// this test set, e.g. ROC AUC when only one class is observed.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::Unavailable` if the metric does not apply to the
    /// response type, or `MetricError::Mismatch` if the prediction has the
    /// wrong kind or shape.
    pub fn compute(
        self,
        observed: &Response,
        predicted: &Prediction,
        options: &MetricOptions,
    ) -> Result<Option<f64>, MetricError> {
        let kind = observed.kind();
        if !self.is_available(kind, options) {
            return Err(MetricError::Unavailable { metric: self, kind });
        }
        if observed.len() != predicted.len() {
            return Err(MetricError::Mismatch(format!(
                "{} observed rows but {} predictions",
                observed.len(),
                predicted.len()
            )));
        }

        match (observed, predicted) {
            (Response::Factor(factor), Prediction::Probabilities { levels, probs }) => {
                check_levels(factor, levels, probs)?;
                Ok(self.classification(factor, probs, options))
            }
            (Response::Numeric(y), Prediction::Numeric(yhat)) => Ok(self.regression(y, yhat)),
            (Response::Matrix(y), Prediction::Matrix(yhat)) => self.multivariate(y, yhat),
            (
                Response::Survival(surv),
                Prediction::Survival {
                    times,
                    survival,
                    risk,
                },
            ) => self.survival(surv, times, survival, risk),
            _ => Err(MetricError::Mismatch(format!(
                "prediction kind does not fit a {kind} response"
            ))),
        }
    }

    fn classification(self, factor: &Factor, probs: &[Vec<f64>], options: &MetricOptions) -> Option<f64> {
        let observed = factor.codes();
        if observed.is_empty() {
            return None;
        }
        let k = factor.n_levels();
        let binary = k == 2 && !factor.is_ordered();
        let predicted = predicted_classes(probs, binary, options.cutoff);

        match self {
            Self::Accuracy => {
                let hits = observed.iter().zip(&predicted).filter(|(o, p)| o == p).count();
                Some(ratio(hits, observed.len()))
            }
            Self::Kappa => cohen_kappa(&confusion(observed, &predicted, k)),
            Self::WeightedKappa => weighted_kappa(&confusion(observed, &predicted, k)),
            Self::Brier => Some(classification_brier(observed, probs, binary)),
            Self::CrossEntropy => Some(cross_entropy(observed, probs)),
            Self::RocAuc => {
                let scores: Vec<f64> = probs.iter().map(|p| p[1]).collect();
                roc_auc(observed, &scores)
            }
            Self::Sensitivity => sensitivity(observed, &predicted),
            Self::Specificity => specificity(observed, &predicted),
            Self::CutoffIndex => {
                let sens = sensitivity(observed, &predicted)?;
                let spec = specificity(observed, &predicted)?;
                Some(match options.cutoff_index {
                    CutoffIndex::Youden => sens + spec - 1.0,
                    CutoffIndex::Weighted(w) => w * sens + (1.0 - w) * spec,
                })
            }
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn regression(self, observed: &[f64], predicted: &[f64]) -> Option<f64> {
        if observed.is_empty() {
            return None;
        }
        let n = observed.len() as f64;
        let sse: f64 = observed
            .iter()
            .zip(predicted)
            .map(|(y, yhat)| (y - yhat).powi(2))
            .sum();

        match self {
            Self::Mse => Some(sse / n),
            Self::Rmse => Some((sse / n).sqrt()),
            Self::Mae => Some(
                observed
                    .iter()
                    .zip(predicted)
                    .map(|(y, yhat)| (y - yhat).abs())
                    .sum::<f64>()
                    / n,
            ),
            Self::R2 => {
                let mean = observed.iter().sum::<f64>() / n;
                let sst: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
                (sst > 0.0).then(|| 1.0 - sse / sst)
            }
            _ => None,
        }
    }

    /// Column-wise regression metric averaged over response columns
    #[allow(clippy::cast_precision_loss)]
    fn multivariate(
        self,
        observed: &NumericMatrix,
        predicted: &NumericMatrix,
    ) -> Result<Option<f64>, MetricError> {
        if observed.ncols() != predicted.ncols() {
            return Err(MetricError::Mismatch(format!(
                "{} response columns but {} predicted columns",
                observed.ncols(),
                predicted.ncols()
            )));
        }
        let mut total = 0.0;
        for j in 0..observed.ncols() {
            match self.regression(&observed.column(j), &predicted.column(j)) {
                Some(value) => total += value,
                None => return Ok(None),
            }
        }
        Ok(Some(total / observed.ncols() as f64))
    }

    fn survival(
        self,
        observed: &Surv,
        times: &[f64],
        survival: &[Vec<f64>],
        risk: &[f64],
    ) -> Result<Option<f64>, MetricError> {
        match self {
            Self::Cindex => Ok(harrell_cindex(observed, risk)),
            Self::Brier => {
                if times.is_empty() {
                    return Err(MetricError::Mismatch(
                        "survival prediction carries no evaluation times".to_string(),
                    ));
                }
                if survival.len() != observed.len() || survival.iter().any(|s| s.len() != times.len()) {
                    return Err(MetricError::Mismatch(format!(
                        "survival curves must be {} rows of {} times",
                        observed.len(),
                        times.len()
                    )));
                }
                Ok(ipcw_brier(observed, times, survival))
            }
            _ => Ok(None),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "auc" => Ok(Self::RocAuc),
            "c_index" => Ok(Self::Cindex),
            "rsquared" | "r_squared" => Ok(Self::R2),
            other => Self::ALL
                .into_iter()
                .find(|m| m.name() == other)
                .ok_or_else(|| MetricError::UnknownMetric(s.to_string())),
        }
    }
}

/// Default metrics for a response type, in reporting order
#[must_use]
pub fn default_metrics(kind: ResponseType) -> Vec<Metric> {
    match kind {
        ResponseType::Binary => vec![
            Metric::Brier,
            Metric::Accuracy,
            Metric::Kappa,
            Metric::RocAuc,
            Metric::Sensitivity,
            Metric::Specificity,
        ],
        ResponseType::Factor => vec![Metric::Brier, Metric::Accuracy, Metric::Kappa],
        ResponseType::Ordered => vec![
            Metric::Brier,
            Metric::Accuracy,
            Metric::Kappa,
            Metric::WeightedKappa,
        ],
        ResponseType::Numeric | ResponseType::Matrix => vec![Metric::Rmse, Metric::R2, Metric::Mae],
        ResponseType::Survival => vec![Metric::Cindex, Metric::Brier],
    }
}

/// Settings shared by all metric computations of a run
#[derive(Debug, Clone, PartialEq)]
pub struct MetricOptions {
    /// Probability above which a binary case is predicted positive
    pub cutoff: f64,
    pub cutoff_index: CutoffIndex,
    /// Survival evaluation times
    pub times: Vec<f64>,
}

impl Default for MetricOptions {
    fn default() -> Self {
        Self {
            cutoff: 0.5,
            cutoff_index: CutoffIndex::Youden,
            times: Vec::new(),
        }
    }
}

impl MetricOptions {
    /// Options carried by a resampling control
    #[must_use]
    pub fn from_control(control: &ResampleControl) -> Self {
        Self {
            cutoff: control.cutoff(),
            cutoff_index: control.cutoff_index(),
            times: control.times().to_vec(),
        }
    }
}

// ============================================================================
// Classification helpers
// ============================================================================

fn check_levels(factor: &Factor, levels: &[String], probs: &[Vec<f64>]) -> Result<(), MetricError> {
    if levels != factor.levels() {
        return Err(MetricError::Mismatch(format!(
            "predicted levels {levels:?} differ from observed levels {:?}",
            factor.levels()
        )));
    }
    if probs.iter().any(|row| row.len() != levels.len()) {
        return Err(MetricError::Mismatch(format!(
            "every probability row needs {} entries",
            levels.len()
        )));
    }
    Ok(())
}

/// Binary: positive (code 1) when its probability exceeds the cutoff.
/// Otherwise the most probable level, ties to the first.
fn predicted_classes(probs: &[Vec<f64>], binary: bool, cutoff: f64) -> Vec<usize> {
    probs
        .iter()
        .map(|row| {
            if binary {
                usize::from(row[1] > cutoff)
            } else {
                let mut best = 0;
                for (k, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = k;
                    }
                }
                best
            }
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> f64 {
    num as f64 / den as f64
}

/// Counts indexed `[observed][predicted]`
#[allow(clippy::cast_precision_loss)]
fn confusion(observed: &[usize], predicted: &[usize], k: usize) -> Vec<Vec<f64>> {
    let mut table = vec![vec![0.0; k]; k];
    for (&o, &p) in observed.iter().zip(predicted) {
        table[o][p] += 1.0;
    }
    table
}

fn margins(table: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>, f64) {
    let rows: Vec<f64> = table.iter().map(|r| r.iter().sum()).collect();
    let cols: Vec<f64> = (0..table.len())
        .map(|j| table.iter().map(|r| r[j]).sum())
        .collect();
    let n = rows.iter().sum();
    (rows, cols, n)
}

fn cohen_kappa(table: &[Vec<f64>]) -> Option<f64> {
    let (rows, cols, n) = margins(table);
    let observed: f64 = (0..table.len()).map(|i| table[i][i]).sum::<f64>() / n;
    let expected: f64 = rows.iter().zip(&cols).map(|(r, c)| r * c).sum::<f64>() / (n * n);
    let denom = 1.0 - expected;
    (denom.abs() > f64::EPSILON).then(|| (observed - expected) / denom)
}

#[allow(clippy::cast_precision_loss)]
fn weighted_kappa(table: &[Vec<f64>]) -> Option<f64> {
    let k = table.len();
    if k < 2 {
        return None;
    }
    let (rows, cols, n) = margins(table);
    let weight = |i: usize, j: usize| i.abs_diff(j) as f64 / (k - 1) as f64;
    let mut disagreement = 0.0;
    let mut expected = 0.0;
    for i in 0..k {
        for j in 0..k {
            disagreement += weight(i, j) * table[i][j];
            expected += weight(i, j) * rows[i] * cols[j] / n;
        }
    }
    (expected > 0.0).then(|| 1.0 - disagreement / expected)
}

#[allow(clippy::cast_precision_loss)]
fn classification_brier(observed: &[usize], probs: &[Vec<f64>], binary: bool) -> f64 {
    let total: f64 = observed
        .iter()
        .zip(probs)
        .map(|(&o, row)| {
            if binary {
                (f64::from(u8::from(o == 1)) - row[1]).powi(2)
            } else {
                row.iter()
                    .enumerate()
                    .map(|(k, p)| (p - f64::from(u8::from(k == o))).powi(2))
                    .sum()
            }
        })
        .sum();
    total / observed.len() as f64
}

#[allow(clippy::cast_precision_loss)]
fn cross_entropy(observed: &[usize], probs: &[Vec<f64>]) -> f64 {
    let total: f64 = observed
        .iter()
        .zip(probs)
        .map(|(&o, row)| -row[o].clamp(PROB_EPSILON, 1.0).ln())
        .sum();
    total / observed.len() as f64
}

/// Mann-Whitney estimate of the area under the ROC curve, ties averaged
#[allow(clippy::cast_precision_loss)]
fn roc_auc(observed: &[usize], scores: &[f64]) -> Option<f64> {
    let n = scores.len();
    let positives = observed.iter().filter(|&&o| o == 1).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let average = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = average;
        }
        i = j + 1;
    }

    let rank_sum: f64 = (0..n).filter(|&i| observed[i] == 1).map(|i| ranks[i]).sum();
    let p = positives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

fn sensitivity(observed: &[usize], predicted: &[usize]) -> Option<f64> {
    rate_among(observed, predicted, 1)
}

fn specificity(observed: &[usize], predicted: &[usize]) -> Option<f64> {
    rate_among(observed, predicted, 0)
}

/// Fraction of rows observed as `class` that were predicted as `class`
fn rate_among(observed: &[usize], predicted: &[usize], class: usize) -> Option<f64> {
    let total = observed.iter().filter(|&&o| o == class).count();
    let hits = observed
        .iter()
        .zip(predicted)
        .filter(|(&o, &p)| o == class && p == class)
        .count();
    (total > 0).then(|| ratio(hits, total))
}

// ============================================================================
// Survival helpers
// ============================================================================

/// Harrell's C: pairs are comparable when the earlier time is an event
fn harrell_cindex(observed: &Surv, risk: &[f64]) -> Option<f64> {
    let time = observed.time();
    let event = observed.event();
    let mut comparable = 0.0;
    let mut concordant = 0.0;
    for i in 0..time.len() {
        if !event[i] {
            continue;
        }
        for j in 0..time.len() {
            if time[i] < time[j] {
                comparable += 1.0;
                if risk[i] > risk[j] {
                    concordant += 1.0;
                } else if risk[i] == risk[j] {
                    concordant += 0.5;
                }
            }
        }
    }
    (comparable > 0.0).then(|| concordant / comparable)
}

/// Brier score with inverse probability of censoring weights, averaged
/// over the evaluation times
#[allow(clippy::cast_precision_loss)]
fn ipcw_brier(observed: &Surv, times: &[f64], survival: &[Vec<f64>]) -> Option<f64> {
    let time = observed.time();
    let event = observed.event();
    if time.is_empty() {
        return None;
    }
    let censored: Vec<bool> = event.iter().map(|e| !e).collect();
    let censoring = kaplan_meier(time, &censored);
    let n = time.len() as f64;

    let mut total = 0.0;
    for (k, &t) in times.iter().enumerate() {
        let mut score = 0.0;
        for i in 0..time.len() {
            let s = survival[i][k];
            if time[i] <= t && event[i] {
                let g = step_before(&censoring, time[i]);
                if g > 0.0 {
                    score += s.powi(2) / g;
                }
            } else if time[i] > t {
                let g = step_at(&censoring, t);
                if g > 0.0 {
                    score += (1.0 - s).powi(2) / g;
                }
            }
        }
        total += score / n;
    }
    Some(total / times.len() as f64)
}
