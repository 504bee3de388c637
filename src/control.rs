//! Resampling control: which resampling method to run and with what settings.
//!
//! A [`ResampleControl`] is validated when it is built (or deserialized) and
//! never changes afterwards. Two sets of resampled results can only be
//! compared when their [`ControlFingerprint`]s match.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Invalid resampling configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("Number of folds must be at least 2, got {0}")]
    InvalidFolds(usize),

    #[error("Number of repeats must be at least 1, got {0}")]
    InvalidRepeats(usize),

    #[error("Number of bootstrap samples must be at least 1, got {0}")]
    InvalidSamples(usize),

    #[error("Training proportion must lie strictly between 0 and 1, got {0}")]
    InvalidProportion(f64),

    #[error("Classification cutoff must lie strictly between 0 and 1, got {0}")]
    InvalidCutoff(f64),

    #[error("Sensitivity weight must lie between 0 and 1, got {0}")]
    InvalidWeight(f64),

    #[error("Invalid survival evaluation times: {0}")]
    InvalidTimes(String),

    #[error("Stratification needs at least one break and a positive minimum bin size")]
    InvalidStrataBreaks,
}

/// Resampling method and its size parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ResampleMethod {
    /// Training sets drawn with replacement; every row is tested
    Bootstrap {
        #[serde(default = "default_samples")]
        samples: usize,
    },
    /// Repeated k-fold cross-validation
    CrossValidation {
        #[serde(default = "default_folds")]
        folds: usize,
        #[serde(default = "default_repeats")]
        repeats: usize,
    },
    /// Training sets drawn with replacement; rows never drawn are tested
    OutOfBootstrap {
        #[serde(default = "default_samples")]
        samples: usize,
    },
    /// Single training/test split
    Split {
        #[serde(default = "default_prop")]
        prop: f64,
    },
    /// Train and test on every row (apparent performance)
    Train,
}

const fn default_samples() -> usize {
    25
}
const fn default_folds() -> usize {
    10
}
const fn default_repeats() -> usize {
    1
}
const fn default_prop() -> f64 {
    2.0 / 3.0
}
const fn default_seed() -> u64 {
    42
}
const fn default_strata_breaks() -> usize {
    4
}
const fn default_strata_size_min() -> usize {
    20
}
const fn default_cutoff() -> f64 {
    0.5
}

impl ResampleMethod {
    /// Number of partitions this method produces
    #[must_use]
    pub const fn n_partitions(&self) -> usize {
        match self {
            Self::Bootstrap { samples } | Self::OutOfBootstrap { samples } => *samples,
            Self::CrossValidation { folds, repeats } => *folds * *repeats,
            Self::Split { .. } | Self::Train => 1,
        }
    }

    fn validate(&self) -> Result<(), ControlError> {
        match *self {
            Self::Bootstrap { samples } | Self::OutOfBootstrap { samples } if samples < 1 => {
                Err(ControlError::InvalidSamples(samples))
            }
            Self::CrossValidation { folds, .. } if folds < 2 => Err(ControlError::InvalidFolds(folds)),
            Self::CrossValidation { repeats, .. } if repeats < 1 => {
                Err(ControlError::InvalidRepeats(repeats))
            }
            Self::Split { prop } if !(prop > 0.0 && prop < 1.0) => {
                Err(ControlError::InvalidProportion(prop))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap { samples } => write!(f, "bootstrap({samples})"),
            Self::CrossValidation { folds, repeats } => {
                write!(f, "cross_validation({folds} folds x {repeats})")
            }
            Self::OutOfBootstrap { samples } => write!(f, "out_of_bootstrap({samples})"),
            Self::Split { prop } => write!(f, "split({prop:.3})"),
            Self::Train => f.write_str("train"),
        }
    }
}

/// Tradeoff between sensitivity and specificity for binary responses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CutoffIndex {
    /// Youden's J: sensitivity + specificity - 1
    #[default]
    Youden,
    /// `w * sensitivity + (1 - w) * specificity`
    Weighted(f64),
}

/// Immutable, validated resampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ControlSpec", into = "ControlSpec")]
pub struct ResampleControl {
    method: ResampleMethod,
    seed: u64,
    strata: Option<String>,
    strata_breaks: usize,
    strata_size_min: usize,
    times: Vec<f64>,
    cutoff: f64,
    cutoff_index: CutoffIndex,
}

impl Default for ResampleControl {
    fn default() -> Self {
        Self::from_method(ResampleMethod::CrossValidation {
            folds: default_folds(),
            repeats: default_repeats(),
        })
    }
}

impl ResampleControl {
    /// Validate a method and wrap it with default settings
    ///
    /// # Errors
    ///
    /// Returns a `ControlError` if the method parameters are out of range.
    pub fn new(method: ResampleMethod) -> Result<Self, ControlError> {
        method.validate()?;
        Ok(Self::from_method(method))
    }

    const fn from_method(method: ResampleMethod) -> Self {
        Self {
            method,
            seed: default_seed(),
            strata: None,
            strata_breaks: default_strata_breaks(),
            strata_size_min: default_strata_size_min(),
            times: Vec::new(),
            cutoff: default_cutoff(),
            cutoff_index: CutoffIndex::Youden,
        }
    }

    /// Simple bootstrap with `samples` resamples
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidSamples` if `samples` is zero.
    pub fn bootstrap(samples: usize) -> Result<Self, ControlError> {
        Self::new(ResampleMethod::Bootstrap { samples })
    }

    /// Repeated k-fold cross-validation
    ///
    /// # Errors
    ///
    /// Returns an error if `folds < 2` or `repeats < 1`.
    pub fn cross_validation(folds: usize, repeats: usize) -> Result<Self, ControlError> {
        Self::new(ResampleMethod::CrossValidation { folds, repeats })
    }

    /// Out-of-bootstrap with `samples` resamples
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidSamples` if `samples` is zero.
    pub fn out_of_bootstrap(samples: usize) -> Result<Self, ControlError> {
        Self::new(ResampleMethod::OutOfBootstrap { samples })
    }

    /// Single split with `prop` of the rows used for training
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidProportion` unless `0 < prop < 1`.
    pub fn split(prop: f64) -> Result<Self, ControlError> {
        Self::new(ResampleMethod::Split { prop })
    }

    /// Training-set (apparent) performance
    #[must_use]
    pub const fn train() -> Self {
        Self::from_method(ResampleMethod::Train)
    }

    /// Set the random seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Stratify partitions by the named column (or the response)
    #[must_use]
    pub fn with_strata(mut self, column: impl Into<String>) -> Self {
        self.strata = Some(column.into());
        self
    }

    /// Quantile bins for numeric strata and the minimum rows per bin
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidStrataBreaks` if either value is zero.
    pub fn with_strata_breaks(mut self, breaks: usize, size_min: usize) -> Result<Self, ControlError> {
        if breaks == 0 || size_min == 0 {
            return Err(ControlError::InvalidStrataBreaks);
        }
        self.strata_breaks = breaks;
        self.strata_size_min = size_min;
        Ok(self)
    }

    /// Follow-up times at which survival predictions are evaluated
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidTimes` unless the times are positive,
    /// finite and strictly increasing.
    pub fn with_times(mut self, times: Vec<f64>) -> Result<Self, ControlError> {
        validate_times(&times)?;
        self.times = times;
        Ok(self)
    }

    /// Probability cutoff for binary class predictions
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidCutoff` unless `0 < cutoff < 1`.
    pub fn with_cutoff(mut self, cutoff: f64) -> Result<Self, ControlError> {
        validate_cutoff(cutoff)?;
        self.cutoff = cutoff;
        Ok(self)
    }

    /// Sensitivity/specificity tradeoff used by the `cutoff_index` metric
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidWeight` for a weight outside `[0, 1]`.
    pub fn with_cutoff_index(mut self, index: CutoffIndex) -> Result<Self, ControlError> {
        validate_cutoff_index(index)?;
        self.cutoff_index = index;
        Ok(self)
    }

    #[must_use]
    pub const fn method(&self) -> &ResampleMethod {
        &self.method
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn strata(&self) -> Option<&str> {
        self.strata.as_deref()
    }

    #[must_use]
    pub const fn strata_breaks(&self) -> usize {
        self.strata_breaks
    }

    #[must_use]
    pub const fn strata_size_min(&self) -> usize {
        self.strata_size_min
    }

    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[must_use]
    pub const fn cutoff(&self) -> f64 {
        self.cutoff
    }

    #[must_use]
    pub const fn cutoff_index(&self) -> CutoffIndex {
        self.cutoff_index
    }

    /// Number of partitions this control produces
    #[must_use]
    pub const fn n_partitions(&self) -> usize {
        self.method.n_partitions()
    }

    /// Identity of the partitions this control generates
    #[must_use]
    pub fn fingerprint(&self) -> ControlFingerprint {
        let bins = self
            .strata
            .as_ref()
            .map(|_| (self.strata_breaks, self.strata_size_min));
        ControlFingerprint {
            method: self.method.clone(),
            seed: self.seed,
            strata: self.strata.clone(),
            strata_breaks: bins.map(|(breaks, _)| breaks),
            strata_size_min: bins.map(|(_, size_min)| size_min),
        }
    }
}

fn validate_times(times: &[f64]) -> Result<(), ControlError> {
    if times.iter().any(|t| !t.is_finite() || *t <= 0.0) {
        return Err(ControlError::InvalidTimes(
            "times must be positive and finite".to_string(),
        ));
    }
    if times.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ControlError::InvalidTimes(
            "times must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

fn validate_cutoff(cutoff: f64) -> Result<(), ControlError> {
    if cutoff > 0.0 && cutoff < 1.0 {
        Ok(())
    } else {
        Err(ControlError::InvalidCutoff(cutoff))
    }
}

fn validate_cutoff_index(index: CutoffIndex) -> Result<(), ControlError> {
    match index {
        CutoffIndex::Weighted(w) if !(0.0..=1.0).contains(&w) => Err(ControlError::InvalidWeight(w)),
        _ => Ok(()),
    }
}

/// What two resampling runs must share for their partitions to pair up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFingerprint {
    pub method: ResampleMethod,
    pub seed: u64,
    pub strata: Option<String>,
    /// Quantile bin settings; only set for stratified controls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strata_breaks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strata_size_min: Option<usize>,
}

impl fmt::Display for ControlFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} seed={}", self.method, self.seed)?;
        if let Some(strata) = &self.strata {
            write!(f, " strata={strata}")?;
        }
        if let (Some(breaks), Some(size_min)) = (self.strata_breaks, self.strata_size_min) {
            write!(f, " breaks={breaks} min={size_min}")?;
        }
        Ok(())
    }
}

/// Serialized form of [`ResampleControl`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ControlSpec {
    #[serde(flatten)]
    method: ResampleMethod,
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    strata: Option<String>,
    #[serde(default = "default_strata_breaks")]
    strata_breaks: usize,
    #[serde(default = "default_strata_size_min")]
    strata_size_min: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    times: Vec<f64>,
    #[serde(default = "default_cutoff")]
    cutoff: f64,
    #[serde(default)]
    cutoff_index: CutoffIndex,
}

impl TryFrom<ControlSpec> for ResampleControl {
    type Error = ControlError;

    fn try_from(spec: ControlSpec) -> Result<Self, Self::Error> {
        let mut control = Self::new(spec.method)?
            .with_seed(spec.seed)
            .with_strata_breaks(spec.strata_breaks, spec.strata_size_min)?
            .with_times(spec.times)?
            .with_cutoff(spec.cutoff)?
            .with_cutoff_index(spec.cutoff_index)?;
        control.strata = spec.strata;
        Ok(control)
    }
}

impl From<ResampleControl> for ControlSpec {
    fn from(control: ResampleControl) -> Self {
        Self {
            method: control.method,
            seed: control.seed,
            strata: control.strata,
            strata_breaks: control.strata_breaks,
            strata_size_min: control.strata_size_min,
            times: control.times,
            cutoff: control.cutoff,
            cutoff_index: control.cutoff_index,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ten_fold_cv() {
        let control = ResampleControl::default();
        assert_eq!(
            control.method(),
            &ResampleMethod::CrossValidation { folds: 10, repeats: 1 }
        );
        assert_eq!(control.seed(), 42);
        assert_eq!(control.n_partitions(), 10);
        assert_eq!(control.cutoff(), 0.5);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert_eq!(
            ResampleControl::cross_validation(1, 1).unwrap_err(),
            ControlError::InvalidFolds(1)
        );
        assert_eq!(
            ResampleControl::cross_validation(5, 0).unwrap_err(),
            ControlError::InvalidRepeats(0)
        );
        assert_eq!(
            ResampleControl::bootstrap(0).unwrap_err(),
            ControlError::InvalidSamples(0)
        );
        assert!(ResampleControl::split(0.0).is_err());
        assert!(ResampleControl::split(1.0).is_err());
        assert!(ResampleControl::split(f64::NAN).is_err());
        assert!(ResampleControl::split(0.7).is_ok());
    }

    #[test]
    fn test_extras_validated() {
        let control = ResampleControl::train();
        assert!(control.clone().with_cutoff(1.2).is_err());
        assert!(control.clone().with_times(vec![2.0, 1.0]).is_err());
        assert!(control.clone().with_times(vec![0.0, 1.0]).is_err());
        assert!(control
            .clone()
            .with_cutoff_index(CutoffIndex::Weighted(1.5))
            .is_err());
        assert!(control.clone().with_strata_breaks(0, 10).is_err());
        let ok = control.with_times(vec![1.0, 5.0]).unwrap();
        assert_eq!(ok.times(), &[1.0, 5.0]);
    }

    #[test]
    fn test_partition_counts() {
        assert_eq!(ResampleControl::cross_validation(5, 3).unwrap().n_partitions(), 15);
        assert_eq!(ResampleControl::bootstrap(7).unwrap().n_partitions(), 7);
        assert_eq!(ResampleControl::split(0.5).unwrap().n_partitions(), 1);
        assert_eq!(ResampleControl::train().n_partitions(), 1);
    }

    #[test]
    fn test_fingerprint_includes_seed_and_method() {
        let a = ResampleControl::cross_validation(5, 1).unwrap();
        let b = ResampleControl::cross_validation(10, 1).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), a.clone().with_seed(7).fingerprint());
        // Metric options do not change the partitions
        let c = a.clone().with_cutoff(0.3).unwrap();
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_includes_strata_bins() {
        let plain = ResampleControl::cross_validation(5, 1).unwrap();
        // Bin settings only matter once rows are stratified
        let unstratified = plain.clone().with_strata_breaks(2, 20).unwrap();
        assert_eq!(plain.fingerprint(), unstratified.fingerprint());

        let stratified = plain.with_strata("y");
        let coarse = stratified.clone().with_strata_breaks(2, 20).unwrap();
        assert_ne!(stratified.fingerprint(), coarse.fingerprint());
        assert_eq!(stratified.fingerprint().strata_breaks, Some(4));
        assert_eq!(coarse.fingerprint().strata_breaks, Some(2));
        assert_eq!(
            stratified.fingerprint().to_string(),
            "cross_validation(5 folds x 1) seed=42 strata=y breaks=4 min=20"
        );

        let sparse = stratified.clone().with_strata_breaks(4, 10).unwrap();
        assert_ne!(stratified.fingerprint(), sparse.fingerprint());
    }

    #[test]
    fn test_yaml_deserialization_with_defaults() {
        let yaml = "method: cross_validation\nfolds: 5\nstrata: y\n";
        let control: ResampleControl = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            control.method(),
            &ResampleMethod::CrossValidation { folds: 5, repeats: 1 }
        );
        assert_eq!(control.strata(), Some("y"));
        assert_eq!(control.seed(), 42);
    }

    #[test]
    fn test_yaml_deserialization_validates() {
        let yaml = "method: cross_validation\nfolds: 1\n";
        assert!(serde_yaml::from_str::<ResampleControl>(yaml).is_err());
        let yaml = "method: bootstrap\nsamples: 10\ncutoff_index: !weighted 0.8\n";
        let control: ResampleControl = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(control.cutoff_index(), CutoffIndex::Weighted(0.8));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let control = ResampleControl::out_of_bootstrap(20)
            .unwrap()
            .with_seed(9)
            .with_times(vec![1.0, 2.0])
            .unwrap();
        let yaml = serde_yaml::to_string(&control).unwrap();
        let parsed: ResampleControl = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(control, parsed);
    }
}
