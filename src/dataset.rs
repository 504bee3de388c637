//! Tabular datasets with an explicit response/predictor schema.
//!
//! A [`Dataset`] owns its predictor columns, one designated [`Response`] and
//! optional case weights. All of them share one row count, checked when the
//! dataset is built. Resampling only ever reads a dataset and slices it with
//! [`Dataset::subset`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised while building or loading a dataset
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Column '{name}' has {found} rows, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Invalid factor: {0}")]
    InvalidFactor(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Case weights must be finite and non-negative")]
    InvalidWeights,

    #[error("Failed to read dataset file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse dataset JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Kind of response variable; selects metrics and prediction modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Two-level factor
    Binary,
    /// Unordered factor with more than two levels
    Factor,
    /// Ordered factor
    Ordered,
    /// Univariate numeric
    Numeric,
    /// Multivariate numeric
    Matrix,
    /// Right-censored survival time with event indicator
    Survival,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Binary => "binary",
            Self::Factor => "factor",
            Self::Ordered => "ordered",
            Self::Numeric => "numeric",
            Self::Matrix => "matrix",
            Self::Survival => "survival",
        };
        f.write_str(name)
    }
}

/// Categorical values stored as level codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    levels: Vec<String>,
    codes: Vec<usize>,
    ordered: bool,
}

impl Factor {
    /// Build a factor from explicit levels and codes
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::InvalidFactor` if there are no levels, levels
    /// repeat, or a code points past the last level.
    pub fn new(levels: Vec<String>, codes: Vec<usize>, ordered: bool) -> Result<Self, DatasetError> {
        if levels.is_empty() {
            return Err(DatasetError::InvalidFactor("no levels".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = levels.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(DatasetError::InvalidFactor(format!("duplicate level '{dup}'")));
        }
        if let Some(&code) = codes.iter().find(|&&c| c >= levels.len()) {
            return Err(DatasetError::InvalidFactor(format!(
                "code {code} out of range for {} levels",
                levels.len()
            )));
        }
        Ok(Self {
            levels,
            codes,
            ordered,
        })
    }

    /// Build an unordered factor from labels; levels are sorted
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::InvalidFactor` if `labels` is empty.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self, DatasetError> {
        let mut levels: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        levels.sort();
        levels.dedup();
        Self::with_levels(labels, levels, false)
    }

    /// Build a factor from labels with a given level order
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::InvalidFactor` if a label is not among `levels`.
    pub fn with_levels<S: AsRef<str>>(
        labels: &[S],
        levels: Vec<String>,
        ordered: bool,
    ) -> Result<Self, DatasetError> {
        let codes = labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                levels
                    .iter()
                    .position(|l| l == label)
                    .ok_or_else(|| DatasetError::InvalidFactor(format!("unknown level '{label}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(levels, codes, ordered)
    }

    /// Level names in code order
    #[must_use]
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Per-row level codes
    #[must_use]
    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        self.ordered
    }

    #[must_use]
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Number of rows at each level
    #[must_use]
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.levels.len()];
        for &code in &self.codes {
            counts[code] += 1;
        }
        counts
    }

    fn take(&self, indices: &[usize]) -> Self {
        Self {
            levels: self.levels.clone(),
            codes: indices.iter().map(|&i| self.codes[i]).collect(),
            ordered: self.ordered,
        }
    }
}

/// Row-major numeric matrix used for multivariate responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericMatrix {
    ncols: usize,
    values: Vec<f64>,
}

impl NumericMatrix {
    /// Create a matrix from row-major values
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::InvalidResponse` if `ncols` is zero or does not
    /// divide the number of values.
    pub fn new(ncols: usize, values: Vec<f64>) -> Result<Self, DatasetError> {
        if ncols == 0 || values.len() % ncols != 0 {
            return Err(DatasetError::InvalidResponse(format!(
                "{} values cannot form rows of {ncols} columns",
                values.len()
            )));
        }
        Ok(Self { ncols, values })
    }

    /// Create a matrix from equally long columns
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::InvalidResponse` if there are no columns or
    /// their lengths differ.
    pub fn from_columns(columns: &[Vec<f64>]) -> Result<Self, DatasetError> {
        let nrows = columns.first().map_or(0, Vec::len);
        if columns.is_empty() || columns.iter().any(|c| c.len() != nrows) {
            return Err(DatasetError::InvalidResponse(
                "matrix columns must be non-empty and equally long".to_string(),
            ));
        }
        let values = (0..nrows)
            .flat_map(|i| columns.iter().map(move |c| c[i]))
            .collect();
        Self::new(columns.len(), values)
    }

    #[must_use]
    pub const fn ncols(&self) -> usize {
        self.ncols
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.values.len() / self.ncols
    }

    /// One row as a slice
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.ncols..(i + 1) * self.ncols]
    }

    /// Copy of one column
    #[must_use]
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.nrows()).map(|i| self.values[i * self.ncols + j]).collect()
    }

    fn take(&self, indices: &[usize]) -> Self {
        Self {
            ncols: self.ncols,
            values: indices.iter().flat_map(|&i| self.row(i).iter().copied()).collect(),
        }
    }
}

/// Right-censored survival outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surv {
    time: Vec<f64>,
    event: Vec<bool>,
}

impl Surv {
    /// Pair follow-up times with event indicators (`true` = event observed)
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::InvalidResponse` on length mismatch or on
    /// negative or non-finite times.
    pub fn new(time: Vec<f64>, event: Vec<bool>) -> Result<Self, DatasetError> {
        if time.len() != event.len() {
            return Err(DatasetError::InvalidResponse(format!(
                "{} times but {} event indicators",
                time.len(),
                event.len()
            )));
        }
        if time.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(DatasetError::InvalidResponse(
                "survival times must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self { time, event })
    }

    #[must_use]
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    #[must_use]
    pub fn event(&self) -> &[bool] {
        &self.event
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    fn take(&self, indices: &[usize]) -> Self {
        Self {
            time: indices.iter().map(|&i| self.time[i]).collect(),
            event: indices.iter().map(|&i| self.event[i]).collect(),
        }
    }
}

/// Observed response values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Factor(Factor),
    Numeric(Vec<f64>),
    Matrix(NumericMatrix),
    Survival(Surv),
}

impl Response {
    /// Response type tag used for metric and prediction dispatch
    #[must_use]
    pub fn kind(&self) -> ResponseType {
        match self {
            Self::Factor(f) if f.is_ordered() => ResponseType::Ordered,
            Self::Factor(f) if f.n_levels() == 2 => ResponseType::Binary,
            Self::Factor(_) => ResponseType::Factor,
            Self::Numeric(_) => ResponseType::Numeric,
            Self::Matrix(_) => ResponseType::Matrix,
            Self::Survival(_) => ResponseType::Survival,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Factor(f) => f.len(),
            Self::Numeric(v) => v.len(),
            Self::Matrix(m) => m.nrows(),
            Self::Survival(s) => s.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, indices: &[usize]) -> Self {
        match self {
            Self::Factor(f) => Self::Factor(f.take(indices)),
            Self::Numeric(v) => Self::Numeric(indices.iter().map(|&i| v[i]).collect()),
            Self::Matrix(m) => Self::Matrix(m.take(indices)),
            Self::Survival(s) => Self::Survival(s.take(indices)),
        }
    }
}

/// Predictor column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Numeric(Vec<f64>),
    Factor(Factor),
}

impl Column {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Factor(f) => f.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of design-matrix columns this predictor expands to
    fn width(&self) -> usize {
        match self {
            Self::Numeric(_) => 1,
            Self::Factor(f) => f.n_levels(),
        }
    }

    fn take(&self, indices: &[usize]) -> Self {
        match self {
            Self::Numeric(v) => Self::Numeric(indices.iter().map(|&i| v[i]).collect()),
            Self::Factor(f) => Self::Factor(f.take(indices)),
        }
    }
}

/// Names of the response and predictor variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub response: String,
    pub predictors: Vec<String>,
}

/// Read-only table of predictors, response and optional case weights
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    schema: Schema,
    columns: Vec<Column>,
    response: Response,
    weights: Option<Vec<f64>>,
}

impl Dataset {
    /// Start building a dataset around its response
    #[must_use]
    pub fn builder(response_name: impl Into<String>, response: Response) -> DatasetBuilder {
        DatasetBuilder {
            response_name: response_name.into(),
            response,
            predictors: Vec::new(),
            weights: None,
        }
    }

    /// Load a dataset from a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse a dataset from its JSON representation
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the columns are inconsistent.
    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        let file: DataFile = serde_json::from_str(json)?;
        file.into_dataset()
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.response.len()
    }

    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub const fn response(&self) -> &Response {
        &self.response
    }

    #[must_use]
    pub fn response_type(&self) -> ResponseType {
        self.response.kind()
    }

    /// Case weights, if any
    #[must_use]
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    /// Predictor column by name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema
            .predictors
            .iter()
            .position(|p| p == name)
            .map(|i| &self.columns[i])
    }

    /// Iterate over `(name, column)` pairs in schema order
    pub fn predictors(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.schema
            .predictors
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    /// Rows selected by `indices`, repetitions allowed
    #[must_use]
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            response: self.response.take(indices),
            weights: self
                .weights
                .as_ref()
                .map(|w| indices.iter().map(|&i| w[i]).collect()),
        }
    }

    /// Number of columns in [`Dataset::design_matrix`]
    #[must_use]
    pub fn design_width(&self) -> usize {
        self.columns.iter().map(Column::width).sum()
    }

    /// Row-major numeric encoding of the predictors
    ///
    /// Numeric columns are copied; factors expand to one indicator column
    /// per level.
    #[must_use]
    pub fn design_matrix(&self) -> Vec<f64> {
        let width = self.design_width();
        let mut matrix = vec![0.0; self.n_rows() * width];
        let mut offset = 0;
        for column in &self.columns {
            match column {
                Column::Numeric(values) => {
                    for (i, v) in values.iter().enumerate() {
                        matrix[i * width + offset] = *v;
                    }
                }
                Column::Factor(factor) => {
                    for (i, &code) in factor.codes().iter().enumerate() {
                        matrix[i * width + offset + code] = 1.0;
                    }
                }
            }
            offset += column.width();
        }
        matrix
    }
}

/// Builder returned by [`Dataset::builder`]
#[derive(Debug)]
pub struct DatasetBuilder {
    response_name: String,
    response: Response,
    predictors: Vec<(String, Column)>,
    weights: Option<Vec<f64>>,
}

impl DatasetBuilder {
    /// Add a predictor column
    #[must_use]
    pub fn predictor(mut self, name: impl Into<String>, column: Column) -> Self {
        self.predictors.push((name.into(), column));
        self
    }

    /// Attach case weights
    #[must_use]
    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Validate and build the dataset
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names, row-count mismatches, or invalid weights.
    pub fn build(self) -> Result<Dataset, DatasetError> {
        let expected = self.response.len();
        let mut names = HashSet::new();
        names.insert(self.response_name.clone());

        for (name, column) in &self.predictors {
            if !names.insert(name.clone()) {
                return Err(DatasetError::DuplicateColumn(name.clone()));
            }
            if column.len() != expected {
                return Err(DatasetError::LengthMismatch {
                    name: name.clone(),
                    expected,
                    found: column.len(),
                });
            }
        }

        if let Some(weights) = &self.weights {
            if weights.len() != expected {
                return Err(DatasetError::LengthMismatch {
                    name: "(weights)".to_string(),
                    expected,
                    found: weights.len(),
                });
            }
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(DatasetError::InvalidWeights);
            }
        }

        let (predictors, columns) = self.predictors.into_iter().unzip();
        Ok(Dataset {
            schema: Schema {
                response: self.response_name,
                predictors,
            },
            columns,
            response: self.response,
            weights: self.weights,
        })
    }
}

// ============================================================================
// JSON file format
// ============================================================================

#[derive(Debug, Deserialize)]
struct DataFile {
    response: ResponseRef,
    #[serde(default)]
    response_type: Option<ResponseType>,
    /// Level order for factor responses
    #[serde(default)]
    levels: Option<Vec<String>>,
    /// Event indicator column for survival responses
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    weights: Option<String>,
    columns: Vec<ColumnSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseRef {
    Single(String),
    Multi(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct ColumnSpec {
    name: String,
    values: ColumnValues,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ColumnValues {
    Numeric(Vec<f64>),
    Flags(Vec<bool>),
    Text(Vec<String>),
}

impl ColumnValues {
    fn into_numbers(self, name: &str) -> Result<Vec<f64>, DatasetError> {
        match self {
            Self::Numeric(v) => Ok(v),
            Self::Flags(v) => Ok(v.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect()),
            Self::Text(_) => Err(DatasetError::InvalidResponse(format!(
                "column '{name}' must be numeric"
            ))),
        }
    }

    fn into_labels(self) -> Vec<String> {
        match self {
            Self::Numeric(v) => v.into_iter().map(|x| x.to_string()).collect(),
            Self::Flags(v) => v.into_iter().map(|b| b.to_string()).collect(),
            Self::Text(v) => v,
        }
    }
}

impl DataFile {
    fn into_dataset(self) -> Result<Dataset, DatasetError> {
        let mut columns = self.columns;
        let mut take = |name: &str| -> Result<ColumnValues, DatasetError> {
            let idx = columns
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| DatasetError::UnknownColumn(name.to_string()))?;
            Ok(columns.remove(idx).values)
        };

        let (response_name, response) = match self.response {
            ResponseRef::Multi(names) => {
                if !matches!(self.response_type, None | Some(ResponseType::Matrix)) {
                    return Err(DatasetError::InvalidResponse(
                        "a list of response columns requires response_type 'matrix'".to_string(),
                    ));
                }
                let values = names
                    .iter()
                    .map(|n| take(n)?.into_numbers(n))
                    .collect::<Result<Vec<_>, _>>()?;
                (names.join(","), Response::Matrix(NumericMatrix::from_columns(&values)?))
            }
            ResponseRef::Single(name) => {
                let values = take(&name)?;
                let response = match self.response_type {
                    Some(ResponseType::Survival) => {
                        let event_name = self.event.as_deref().ok_or_else(|| {
                            DatasetError::InvalidResponse(
                                "survival response requires an 'event' column".to_string(),
                            )
                        })?;
                        let event = take(event_name)?
                            .into_numbers(event_name)?
                            .into_iter()
                            .map(|e| e != 0.0)
                            .collect();
                        Response::Survival(Surv::new(values.into_numbers(&name)?, event)?)
                    }
                    Some(ResponseType::Numeric) => Response::Numeric(values.into_numbers(&name)?),
                    Some(ResponseType::Matrix) => Response::Matrix(NumericMatrix::new(
                        1,
                        values.into_numbers(&name)?,
                    )?),
                    Some(kind @ (ResponseType::Binary | ResponseType::Factor | ResponseType::Ordered)) => {
                        let labels = values.into_labels();
                        let ordered = kind == ResponseType::Ordered;
                        let factor = match self.levels {
                            Some(levels) => Factor::with_levels(&labels, levels, ordered)?,
                            None if ordered => {
                                return Err(DatasetError::InvalidResponse(
                                    "ordered response requires explicit 'levels'".to_string(),
                                ))
                            }
                            None => Factor::from_labels(&labels)?,
                        };
                        if kind == ResponseType::Binary && factor.n_levels() != 2 {
                            return Err(DatasetError::InvalidResponse(format!(
                                "binary response has {} levels",
                                factor.n_levels()
                            )));
                        }
                        Response::Factor(factor)
                    }
                    None => match values {
                        ColumnValues::Numeric(v) => Response::Numeric(v),
                        other => Response::Factor(Factor::from_labels(&other.into_labels())?),
                    },
                };
                (name, response)
            }
        };

        let weights = match self.weights.as_deref() {
            Some(name) => Some(take(name)?.into_numbers(name)?),
            None => None,
        };

        let mut builder = Dataset::builder(response_name, response);
        for spec in columns {
            let column = match spec.values {
                ColumnValues::Numeric(v) => Column::Numeric(v),
                other => Column::Factor(Factor::from_labels(&other.into_labels())?),
            };
            builder = builder.predictor(spec.name, column);
        }
        if let Some(weights) = weights {
            builder = builder.weights(weights);
        }
        builder.build()
    }
}
