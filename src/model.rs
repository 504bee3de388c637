//! Model adapter contract.
//!
//! Every model back-end plugs into the engine through [`Model`] (fit on a
//! training set) and [`FittedModel`] (predict for new rows). The engine only
//! ever holds `&dyn Model` and `Box<dyn FittedModel>`.

use crate::dataset::{DatasetError, NumericMatrix, ResponseType};
use crate::Dataset;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by model adapters
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model '{model}' does not support {kind} responses")]
    Unsupported { model: String, kind: ResponseType },

    #[error("Fit failed: {0}")]
    Fit(String),

    #[error("Prediction failed: {0}")]
    Predict(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

/// Output a fitted model produces for one set of rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Prediction {
    /// Class probabilities: one row per case, one column per level
    Probabilities {
        levels: Vec<String>,
        probs: Vec<Vec<f64>>,
    },
    /// Numeric estimates
    Numeric(Vec<f64>),
    /// Multivariate numeric estimates
    Matrix(NumericMatrix),
    /// Survival probabilities at `times` plus a risk score (higher = earlier event)
    Survival {
        times: Vec<f64>,
        survival: Vec<Vec<f64>>,
        risk: Vec<f64>,
    },
}

impl Prediction {
    /// Number of predicted cases
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Probabilities { probs, .. } => probs.len(),
            Self::Numeric(v) => v.len(),
            Self::Matrix(m) => m.nrows(),
            Self::Survival { risk, .. } => risk.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output mode requested from a fitted model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictMode {
    /// Class probabilities for factor responses
    Probabilities,
    /// Numeric estimates for numeric and matrix responses
    Response,
    /// Survival curves and risk scores for survival responses
    Survival,
}

impl PredictMode {
    /// Mode appropriate to a response type
    #[must_use]
    pub const fn for_response(kind: ResponseType) -> Self {
        match kind {
            ResponseType::Binary | ResponseType::Factor | ResponseType::Ordered => {
                Self::Probabilities
            }
            ResponseType::Numeric | ResponseType::Matrix => Self::Response,
            ResponseType::Survival => Self::Survival,
        }
    }
}

/// Options passed to [`FittedModel::predict`]
#[derive(Debug, Clone, PartialEq)]
pub struct PredictOptions {
    pub mode: PredictMode,
    /// Survival evaluation times (empty: risk scores only)
    pub times: Vec<f64>,
}

impl PredictOptions {
    /// Options for a response type with the given evaluation times
    #[must_use]
    pub fn new(kind: ResponseType, times: &[f64]) -> Self {
        Self {
            mode: PredictMode::for_response(kind),
            times: times.to_vec(),
        }
    }
}

/// A model back-end: fits itself on a training dataset
pub trait Model: Send + Sync {
    /// Label identifying the model in results
    fn label(&self) -> &str;

    /// Whether this model can fit the given response type
    fn supports(&self, kind: ResponseType) -> bool;

    /// Fit on a training dataset; case weights are available via
    /// [`Dataset::weights`]
    ///
    /// # Errors
    ///
    /// Returns a `ModelError` if fitting fails.
    fn fit(&self, data: &Dataset) -> Result<Box<dyn FittedModel>, ModelError>;
}

/// Result of [`Model::fit`]
pub trait FittedModel: Send {
    /// Predict for the rows of `newdata`
    ///
    /// # Errors
    ///
    /// Returns a `ModelError` if prediction fails.
    fn predict(&self, newdata: &Dataset, options: &PredictOptions) -> Result<Prediction, ModelError>;
}

// ============================================================================
// Hyper-parameters
// ============================================================================

/// Value of a single hyper-parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// One concrete assignment of hyper-parameters, in grid order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamSet(pub Vec<(String, ParamValue)>);

impl ParamSet {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Non-negative integer parameter
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidParameter` if present but not a
    /// non-negative integer.
    pub fn get_usize(&self, name: &str) -> Result<Option<usize>, ModelError> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::Int(v)) => usize::try_from(*v).map(Some).map_err(|_| {
                ModelError::InvalidParameter {
                    name: name.to_string(),
                    reason: format!("expected a non-negative integer, got {v}"),
                }
            }),
            Some(other) => Err(ModelError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected an integer, got {other}"),
            }),
        }
    }

    /// Text parameter
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidParameter` if present but not text.
    pub fn get_text(&self, name: &str) -> Result<Option<&str>, ModelError> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::Text(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(ModelError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected text, got {other}"),
            }),
        }
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Builds a model for a hyper-parameter assignment
pub trait ModelFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns a `ModelError` if the parameters are invalid for this model.
    fn build(&self, params: &ParamSet) -> Result<Box<dyn Model>, ModelError>;
}

impl<F> ModelFactory for F
where
    F: Fn(&ParamSet) -> Result<Box<dyn Model>, ModelError> + Send + Sync,
{
    fn build(&self, params: &ParamSet) -> Result<Box<dyn Model>, ModelError> {
        self(params)
    }
}
