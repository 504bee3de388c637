//! Experiment configuration loaded from YAML.
//!
//! An experiment names a dataset, a resampling control, the metrics to
//! compute and either a list of models to compare or a grid to tune.

use crate::control::{ControlError, ResampleControl};
use crate::dataset::{Dataset, DatasetError};
use crate::metrics::Metric;
use crate::model::{Model, ModelError, ParamSet, ParamValue};
use crate::models::{KnnModel, NullModel};
use crate::resamples::TestConfig;
use crate::runner::RunnerConfig;
use crate::tune::{ParamGrid, TuneConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid resampling control: {0}")]
    Control(#[from] ControlError),

    #[error("Invalid model '{label}': {source}")]
    Model { label: String, source: ModelError },

    #[error("Failed to load dataset: {0}")]
    Dataset(#[from] DatasetError),
}

/// Model implementations that can be named in a configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Predicts the training distribution, ignoring predictors
    NullModel,
    /// k-nearest neighbours on standardized predictors
    Knn,
}

impl ModelKind {
    /// Build a model of this kind from hyper-parameters
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidParameter` for parameters the kind does
    /// not accept or values out of range.
    pub fn build(self, params: &ParamSet) -> Result<Box<dyn Model>, ModelError> {
        match self {
            Self::NullModel => {
                if let Some((name, _)) = params.0.first() {
                    return Err(ModelError::InvalidParameter {
                        name: name.clone(),
                        reason: "the null model takes no parameters".to_string(),
                    });
                }
                Ok(Box::new(NullModel::new()))
            }
            Self::Knn => Ok(Box::new(KnnModel::from_params(params)?)),
        }
    }

    fn build_labelled(self, label: &str, params: &ParamSet) -> Result<Box<dyn Model>, ModelError> {
        match self {
            Self::NullModel => {
                self.build(params)?;
                Ok(Box::new(NullModel::new().with_label(label)))
            }
            Self::Knn => Ok(Box::new(KnnModel::from_params(params)?.with_label(label))),
        }
    }
}

/// One model entry under `models:`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    /// Display label; defaults to the kind's own label
    #[serde(default)]
    pub label: Option<String>,
    pub kind: ModelKind,
    /// Remaining keys are hyper-parameters, e.g. `k: 5`
    #[serde(flatten)]
    pub params: BTreeMap<String, ParamValue>,
}

impl ModelSpec {
    #[must_use]
    pub fn param_set(&self) -> ParamSet {
        ParamSet(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Build the configured model
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Model` if the parameters are invalid.
    pub fn build(&self) -> Result<Box<dyn Model>, ConfigError> {
        let params = self.param_set();
        let built = match &self.label {
            Some(label) => self.kind.build_labelled(label, &params),
            None => self.kind.build(&params),
        };
        built.map_err(|source| ConfigError::Model {
            label: self.label.clone().unwrap_or_else(|| format!("{:?}", self.kind)),
            source,
        })
    }
}

/// Execution settings under `runner:`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunnerSettings {
    /// Worker threads; omitted uses one per core
    #[serde(default)]
    pub threads: Option<usize>,
    /// Evaluate partitions one at a time on the calling thread
    #[serde(default)]
    pub sequential: bool,
    /// Deadline for a whole resampling run in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RunnerSettings {
    #[must_use]
    pub fn runner_config(&self) -> RunnerConfig {
        let mut config = if self.sequential {
            RunnerConfig::sequential()
        } else {
            RunnerConfig::default()
        };
        if let (false, Some(threads)) = (self.sequential, self.threads) {
            config = config.with_threads(threads);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        config
    }
}

/// Grid search settings under `tune:`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TuneSpec {
    pub kind: ModelKind,
    #[serde(default)]
    pub grid: ParamGrid,
    /// Selection metric; defaults to the first evaluated metric
    #[serde(default)]
    pub metric: Option<Metric>,
    #[serde(default)]
    pub maximize: Option<bool>,
    /// Evaluate only this many randomly chosen grid points
    #[serde(default)]
    pub sample: Option<usize>,
}

impl TuneSpec {
    #[must_use]
    pub fn tune_config(&self, metrics: &[Metric]) -> TuneConfig {
        TuneConfig {
            metrics: metrics.to_vec(),
            selection: self.metric,
            maximize: self.maximize,
        }
    }

    /// Grid points to evaluate, honouring `sample`
    #[must_use]
    pub fn points(&self, seed: u64) -> Vec<ParamSet> {
        match self.sample {
            Some(n) => self.grid.sample(n, seed),
            None => self.grid.points(),
        }
    }
}

/// A complete resampling experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    #[serde(default = "default_title")]
    pub title: String,
    /// Dataset file (JSON); relative paths resolve against the config file
    pub data: PathBuf,
    #[serde(default)]
    pub control: ResampleControl,
    /// Metrics to compute; empty uses the response type's defaults
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub tests: TestConfig,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub tune: Option<TuneSpec>,
}

fn default_title() -> String {
    "Resampling Report".to_string()
}

impl ExperimentConfig {
    /// Load an experiment from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if config.data.is_relative() {
            if let Some(dir) = path.parent() {
                config.data = dir.join(&config.data);
            }
        }
        Ok(config)
    }

    /// Parse an experiment from YAML
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load every experiment matching a glob pattern (e.g. `experiments/*.yaml`)
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid or a file cannot be loaded.
    pub fn load_glob(pattern: &str) -> Result<Vec<(PathBuf, Self)>, ConfigError> {
        let paths = glob::glob(pattern).map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

        let mut configs = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| ConfigError::IoError(std::io::Error::other(format!("Glob error: {e}"))))?;
            let config = Self::load(&path)?;
            configs.push((path, config));
        }
        Ok(configs)
    }

    /// Read the configured dataset
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dataset` if the file is missing or malformed.
    pub fn load_dataset(&self) -> Result<Dataset, ConfigError> {
        Ok(Dataset::load(&self.data)?)
    }

    /// Build every model under `models:`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` if no models are configured, or
    /// `ConfigError::Model` for an invalid entry.
    pub fn build_models(&self) -> Result<Vec<Box<dyn Model>>, ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::MissingField("models".to_string()));
        }
        self.models.iter().map(ModelSpec::build).collect()
    }

    /// The `tune:` section
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingField` if the section is absent.
    pub fn tune_spec(&self) -> Result<&TuneSpec, ConfigError> {
        self.tune
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("tune".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::control::ResampleMethod;
    use crate::runner::Executor;
    use crate::stats::PValueAdjust;

    const FULL: &str = r"
title: Iris
data: iris.json
control:
  method: cross_validation
  folds: 5
  repeats: 2
  seed: 7
  strata: Species
metrics: [accuracy, kappa]
runner:
  threads: 4
  timeout_ms: 60000
tests:
  confidence: 0.9
  adjust: bonferroni
models:
  - label: baseline
    kind: null_model
  - label: knn5
    kind: knn
    k: 5
    weights: distance
tune:
  kind: knn
  grid:
    k: [1, 3, 5, 7]
    weights: [uniform, distance]
  metric: accuracy
";

    // ==========================================================================
    // Parsing
    // ==========================================================================

    #[test]
    fn test_parse_full_experiment() {
        let config = ExperimentConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.title, "Iris");
        assert_eq!(config.data, PathBuf::from("iris.json"));
        assert_eq!(
            config.control.method(),
            &ResampleMethod::CrossValidation { folds: 5, repeats: 2 }
        );
        assert_eq!(config.control.seed(), 7);
        assert_eq!(config.control.strata(), Some("Species"));
        assert_eq!(config.metrics, vec![Metric::Accuracy, Metric::Kappa]);
        assert_eq!(config.tests.adjust, PValueAdjust::Bonferroni);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[1].param_set().get_usize("k").unwrap(), Some(5));

        let tune = config.tune_spec().unwrap();
        assert_eq!(tune.kind, ModelKind::Knn);
        assert_eq!(tune.grid.len(), 8);
        assert_eq!(tune.points(0)[1].to_string(), "k=1, weights=distance");
        assert_eq!(tune.tune_config(&config.metrics).selection, Some(Metric::Accuracy));
    }

    #[test]
    fn test_minimal_experiment_defaults() {
        let config = ExperimentConfig::from_yaml("data: d.json\nmodels:\n  - kind: knn\n").unwrap();
        assert_eq!(config.title, "Resampling Report");
        assert_eq!(config.control, ResampleControl::default());
        assert!(config.metrics.is_empty());
        assert_eq!(config.runner, RunnerSettings::default());
        assert_eq!(config.tests, TestConfig::default());
        assert!(matches!(config.tune_spec(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_invalid_control_rejected() {
        let yaml = "data: d.json\ncontrol:\n  method: cross_validation\n  folds: 1\n";
        assert!(matches!(
            ExperimentConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_unknown_model_kind_rejected() {
        let yaml = "data: d.json\nmodels:\n  - kind: forest\n";
        assert!(ExperimentConfig::from_yaml(yaml).is_err());
    }

    // ==========================================================================
    // Building
    // ==========================================================================

    #[test]
    fn test_build_models_with_labels() {
        let config = ExperimentConfig::from_yaml(FULL).unwrap();
        let models = config.build_models().unwrap();
        let labels: Vec<&str> = models.iter().map(|m| m.label()).collect();
        assert_eq!(labels, vec!["baseline", "knn5"]);
    }

    #[test]
    fn test_build_models_requires_entries() {
        let config = ExperimentConfig::from_yaml("data: d.json\n").unwrap();
        assert!(matches!(
            config.build_models(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_null_model_rejects_parameters() {
        let yaml = "data: d.json\nmodels:\n  - label: base\n    kind: null_model\n    k: 3\n";
        let config = ExperimentConfig::from_yaml(yaml).unwrap();
        let err = config.build_models().err().expect("expected build_models to fail");
        assert!(matches!(err, ConfigError::Model { ref label, .. } if label == "base"));
    }

    #[test]
    fn test_knn_invalid_k() {
        let yaml = "data: d.json\nmodels:\n  - kind: knn\n    k: 0\n";
        let config = ExperimentConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.build_models(),
            Err(ConfigError::Model { .. })
        ));
    }

    #[test]
    fn test_runner_settings() {
        let settings = RunnerSettings {
            threads: Some(3),
            sequential: false,
            timeout_ms: Some(250),
        };
        let config = settings.runner_config();
        assert_eq!(config.executor, Executor::Parallel { threads: Some(3) });
        assert_eq!(config.timeout, Some(Duration::from_millis(250)));

        let sequential = RunnerSettings {
            threads: Some(3),
            sequential: true,
            timeout_ms: None,
        };
        assert_eq!(sequential.runner_config().executor, Executor::Sequential);
    }

    // ==========================================================================
    // Files
    // ==========================================================================

    #[test]
    fn test_load_resolves_data_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.yaml");
        std::fs::write(&path, "data: data/d.json\nmodels:\n  - kind: null_model\n").unwrap();
        let config = ExperimentConfig::load(&path).unwrap();
        assert_eq!(config.data, dir.path().join("data/d.json"));
    }

    #[test]
    fn test_load_glob() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.yaml", "b.yaml"] {
            std::fs::write(dir.path().join(name), "data: d.json\n").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let pattern = format!("{}/*.yaml", dir.path().display());
        let configs = ExperimentConfig::load_glob(&pattern).unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs[0].0.ends_with("a.yaml"));
    }

    #[test]
    fn test_load_glob_invalid_pattern() {
        assert!(matches!(
            ExperimentConfig::load_glob("[invalid"),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_load_dataset_missing_file() {
        let config = ExperimentConfig::from_yaml("data: /nonexistent/data.json\n").unwrap();
        assert!(matches!(
            config.load_dataset(),
            Err(ConfigError::Dataset(_))
        ));
    }
}
