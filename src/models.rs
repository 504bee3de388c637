//! Built-in model adapters.
//!
//! - [`NullModel`]: predicts the training distribution regardless of the
//!   predictors (class proportions, mean, column means, Kaplan-Meier curve)
//! - [`KnnModel`]: k-nearest neighbours on standardized design columns
//!
//! Both honour case weights and handle every response type.

use crate::dataset::{Dataset, NumericMatrix, Response, ResponseType};
use crate::model::{FittedModel, Model, ModelError, ParamSet, PredictOptions, Prediction};
use crate::stats::{kaplan_meier, step_at};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Added to neighbour distances before inverting them
const DISTANCE_EPSILON: f64 = 1e-10;

fn case_weights(data: &Dataset) -> Vec<f64> {
    data.weights()
        .map_or_else(|| vec![1.0; data.n_rows()], <[f64]>::to_vec)
}

fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    let total: f64 = weights.iter().sum();
    (total > 0.0).then(|| values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total)
}

/// Weighted share of each level; uniform when no weight is positive
#[allow(clippy::cast_precision_loss)]
fn level_shares(codes: impl Iterator<Item = (usize, f64)>, n_levels: usize) -> Vec<f64> {
    let mut shares = vec![0.0; n_levels];
    for (code, w) in codes {
        shares[code] += w;
    }
    let total: f64 = shares.iter().sum();
    if total > 0.0 {
        shares.iter_mut().for_each(|s| *s /= total);
    } else {
        shares.fill(1.0 / n_levels as f64);
    }
    shares
}

// ============================================================================
// Null model
// ============================================================================

/// Baseline that ignores the predictors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullModel {
    label: String,
}

impl Default for NullModel {
    fn default() -> Self {
        Self::new()
    }
}

impl NullModel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            label: "null".to_string(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Clone)]
enum NullEstimate {
    Probabilities { levels: Vec<String>, probs: Vec<f64> },
    Numeric(f64),
    Matrix(Vec<f64>),
    Survival(Vec<(f64, f64)>),
}

impl Model for NullModel {
    fn label(&self) -> &str {
        &self.label
    }

    fn supports(&self, _kind: ResponseType) -> bool {
        true
    }

    fn fit(&self, data: &Dataset) -> Result<Box<dyn FittedModel>, ModelError> {
        if data.n_rows() == 0 {
            return Err(ModelError::Fit("empty training set".to_string()));
        }
        let weights = case_weights(data);
        let no_weight = || ModelError::Fit("case weights sum to zero".to_string());

        let estimate = match data.response() {
            Response::Factor(factor) => NullEstimate::Probabilities {
                levels: factor.levels().to_vec(),
                probs: level_shares(
                    factor.codes().iter().copied().zip(weights.iter().copied()),
                    factor.n_levels(),
                ),
            },
            Response::Numeric(y) => NullEstimate::Numeric(weighted_mean(y, &weights).ok_or_else(no_weight)?),
            Response::Matrix(m) => NullEstimate::Matrix(
                (0..m.ncols())
                    .map(|j| weighted_mean(&m.column(j), &weights).ok_or_else(no_weight))
                    .collect::<Result<_, _>>()?,
            ),
            Response::Survival(s) => NullEstimate::Survival(kaplan_meier(s.time(), s.event())),
        };
        Ok(Box::new(FittedNull { estimate }))
    }
}

struct FittedNull {
    estimate: NullEstimate,
}

impl FittedModel for FittedNull {
    fn predict(&self, newdata: &Dataset, options: &PredictOptions) -> Result<Prediction, ModelError> {
        let n = newdata.n_rows();
        let prediction = match &self.estimate {
            NullEstimate::Probabilities { levels, probs } => Prediction::Probabilities {
                levels: levels.clone(),
                probs: vec![probs.clone(); n],
            },
            NullEstimate::Numeric(mean) => Prediction::Numeric(vec![*mean; n]),
            NullEstimate::Matrix(means) => Prediction::Matrix(NumericMatrix::new(means.len(), means.repeat(n))?),
            NullEstimate::Survival(curve) => {
                let row: Vec<f64> = options.times.iter().map(|&t| step_at(curve, t)).collect();
                Prediction::Survival {
                    times: options.times.clone(),
                    survival: vec![row; n],
                    risk: vec![0.0; n],
                }
            }
        };
        Ok(prediction)
    }
}

// ============================================================================
// k-nearest neighbours
// ============================================================================

/// How neighbours are weighted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    /// All neighbours count equally
    #[default]
    Uniform,
    /// Inverse distance
    Distance,
}

/// k-nearest neighbours for every response type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnnModel {
    label: String,
    k: usize,
    scheme: WeightScheme,
}

impl KnnModel {
    /// # Errors
    ///
    /// Returns `ModelError::InvalidParameter` if `k` is zero.
    pub fn new(k: usize) -> Result<Self, ModelError> {
        if k == 0 {
            return Err(ModelError::InvalidParameter {
                name: "k".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            label: "knn".to_string(),
            k,
            scheme: WeightScheme::Uniform,
        })
    }

    /// Build from hyper-parameters `k` (default 5) and `weights`
    /// (`uniform` or `distance`)
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidParameter` for a bad value.
    pub fn from_params(params: &ParamSet) -> Result<Self, ModelError> {
        let k = params.get_usize("k")?.unwrap_or(5);
        let scheme = match params.get_text("weights")? {
            None | Some("uniform") => WeightScheme::Uniform,
            Some("distance") => WeightScheme::Distance,
            Some(other) => {
                return Err(ModelError::InvalidParameter {
                    name: "weights".to_string(),
                    reason: format!("expected 'uniform' or 'distance', got '{other}'"),
                })
            }
        };
        Ok(Self::new(k)?.with_weights(scheme))
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_weights(mut self, scheme: WeightScheme) -> Self {
        self.scheme = scheme;
        self
    }

    #[must_use]
    pub const fn k(&self) -> usize {
        self.k
    }
}

impl Model for KnnModel {
    fn label(&self) -> &str {
        &self.label
    }

    fn supports(&self, _kind: ResponseType) -> bool {
        true
    }

    #[allow(clippy::cast_precision_loss)]
    fn fit(&self, data: &Dataset) -> Result<Box<dyn FittedModel>, ModelError> {
        let n = data.n_rows();
        if n == 0 {
            return Err(ModelError::Fit("empty training set".to_string()));
        }
        let width = data.design_width();
        let mut x = data.design_matrix();

        let mut center = vec![0.0; width];
        let mut scale = vec![1.0; width];
        for j in 0..width {
            let column: Vec<f64> = (0..n).map(|i| x[i * width + j]).collect();
            let mean = column.iter().sum::<f64>() / n as f64;
            let sd = (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
            center[j] = mean;
            if sd > 0.0 {
                scale[j] = sd;
            }
        }
        for (idx, value) in x.iter_mut().enumerate() {
            let j = idx % width.max(1);
            *value = (*value - center[j]) / scale[j];
        }

        Ok(Box::new(FittedKnn {
            k: self.k.min(n),
            scheme: self.scheme,
            width,
            center,
            scale,
            x,
            response: data.response().clone(),
            case_weights: case_weights(data),
        }))
    }
}

struct FittedKnn {
    k: usize,
    scheme: WeightScheme,
    width: usize,
    center: Vec<f64>,
    scale: Vec<f64>,
    /// Standardized training rows, row-major
    x: Vec<f64>,
    response: Response,
    case_weights: Vec<f64>,
}

/// Heap entry ordered by distance, then training row
#[derive(PartialEq)]
struct Neighbor {
    distance: f64,
    row: usize,
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.row.cmp(&other.row))
    }
}

impl FittedKnn {
    fn n_train(&self) -> usize {
        self.case_weights.len()
    }

    /// Nearest `k` training rows as `(row, weight)` pairs
    fn neighbors(&self, point: &[f64]) -> Vec<(usize, f64)> {
        let mut heap = BinaryHeap::with_capacity(self.k + 1);
        for row in 0..self.n_train() {
            let train = &self.x[row * self.width..(row + 1) * self.width];
            let distance = point
                .iter()
                .zip(train)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            let candidate = Neighbor { distance, row };
            if heap.len() < self.k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|top| candidate < *top) {
                heap.pop();
                heap.push(candidate);
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|n| {
                let scheme_weight = match self.scheme {
                    WeightScheme::Uniform => 1.0,
                    WeightScheme::Distance => 1.0 / (n.distance + DISTANCE_EPSILON),
                };
                (n.row, scheme_weight * self.case_weights[n.row])
            })
            .collect()
    }

    fn weighted_average(neighbors: &[(usize, f64)], value: impl Fn(usize) -> f64) -> f64 {
        let total: f64 = neighbors.iter().map(|(_, w)| w).sum();
        if total > 0.0 {
            neighbors.iter().map(|&(r, w)| w * value(r)).sum::<f64>() / total
        } else {
            #[allow(clippy::cast_precision_loss)]
            let n = neighbors.len() as f64;
            neighbors.iter().map(|&(r, _)| value(r)).sum::<f64>() / n
        }
    }
}

impl FittedModel for FittedKnn {
    #[allow(clippy::cast_precision_loss)]
    fn predict(&self, newdata: &Dataset, options: &PredictOptions) -> Result<Prediction, ModelError> {
        if newdata.design_width() != self.width {
            return Err(ModelError::Predict(format!(
                "expected {} design columns, got {}",
                self.width,
                newdata.design_width()
            )));
        }
        let n = newdata.n_rows();
        let design = newdata.design_matrix();
        let neighbor_sets: Vec<Vec<(usize, f64)>> = (0..n)
            .map(|i| {
                let point: Vec<f64> = design[i * self.width..(i + 1) * self.width]
                    .iter()
                    .enumerate()
                    .map(|(j, v)| (v - self.center[j]) / self.scale[j])
                    .collect();
                self.neighbors(&point)
            })
            .collect();

        let prediction = match &self.response {
            Response::Factor(factor) => Prediction::Probabilities {
                levels: factor.levels().to_vec(),
                probs: neighbor_sets
                    .iter()
                    .map(|set| {
                        level_shares(
                            set.iter().map(|&(r, w)| (factor.codes()[r], w)),
                            factor.n_levels(),
                        )
                    })
                    .collect(),
            },
            Response::Numeric(y) => Prediction::Numeric(
                neighbor_sets
                    .iter()
                    .map(|set| Self::weighted_average(set, |r| y[r]))
                    .collect(),
            ),
            Response::Matrix(m) => {
                let values = neighbor_sets
                    .iter()
                    .flat_map(|set| (0..m.ncols()).map(move |j| Self::weighted_average(set, |r| m.row(r)[j])))
                    .collect();
                Prediction::Matrix(NumericMatrix::new(m.ncols(), values)?)
            }
            Response::Survival(s) => {
                let mut survival = Vec::with_capacity(n);
                let mut risk = Vec::with_capacity(n);
                for set in &neighbor_sets {
                    let time: Vec<f64> = set.iter().map(|&(r, _)| s.time()[r]).collect();
                    let event: Vec<bool> = set.iter().map(|&(r, _)| s.event()[r]).collect();
                    let curve = kaplan_meier(&time, &event);
                    survival.push(options.times.iter().map(|&t| step_at(&curve, t)).collect());

                    // events per unit of follow-up among the neighbours
                    let exposure: f64 = time.iter().sum();
                    let events = event.iter().filter(|&&e| e).count() as f64;
                    risk.push(if exposure > 0.0 { events / exposure } else { 0.0 });
                }
                Prediction::Survival {
                    times: options.times.clone(),
                    survival,
                    risk,
                }
            }
        };
        Ok(prediction)
    }
}
