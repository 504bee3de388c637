//! Hyper-parameter tuning over a grid.
//!
//! Every grid point is resampled under the same control, so all points are
//! scored on identical partitions. The point with the best mean selection
//! metric wins and is refit on the full dataset.

use crate::control::ResampleControl;
use crate::dataset::Dataset;
use crate::metrics::Metric;
use crate::model::{FittedModel, ModelError, ModelFactory, ParamSet, ParamValue};
use crate::resamples::{Resamples, ResamplesError};
use crate::runner::{ResampleRunner, RunnerError};
use crate::stats::mean;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Errors raised while tuning
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Parameter grid has no points")]
    EmptyGrid,

    #[error("Grid parameter '{0}' has no candidate values")]
    EmptyParameter(String),

    #[error("Grid parameter '{0}' appears twice")]
    DuplicateParameter(String),

    #[error("Selection metric '{0}' was not evaluated")]
    UnknownSelection(Metric),

    #[error("No grid point has a finite mean {0}")]
    NoFiniteScore(Metric),

    #[error("Grid point {point} ({params}) could not be built: {source}")]
    Build {
        point: usize,
        params: String,
        source: ModelError,
    },

    #[error("Grid point {point} ({params}) failed: {source}")]
    Point {
        point: usize,
        params: String,
        source: RunnerError,
    },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Resamples error: {0}")]
    Resamples(#[from] ResamplesError),
}

/// Candidate values per hyper-parameter, in declaration order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamGrid {
    params: Vec<(String, Vec<ParamValue>)>,
}

impl ParamGrid {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter and its candidate values
    ///
    /// # Errors
    ///
    /// Returns `TuneError::EmptyParameter` for an empty value list or
    /// `TuneError::DuplicateParameter` if the name is already present.
    pub fn with_param(mut self, name: impl Into<String>, values: Vec<ParamValue>) -> Result<Self, TuneError> {
        let name = name.into();
        if values.is_empty() {
            return Err(TuneError::EmptyParameter(name));
        }
        if self.params.iter().any(|(n, _)| *n == name) {
            return Err(TuneError::DuplicateParameter(name));
        }
        self.params.push((name, values));
        Ok(self)
    }

    /// Parameter names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(n, _)| n.as_str())
    }

    /// Number of points; a grid without parameters has one empty point
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.iter().map(|(_, v)| v.len()).product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point `i` of the cartesian product, last parameter varying fastest
    #[must_use]
    pub fn point(&self, mut i: usize) -> Option<ParamSet> {
        if i >= self.len() {
            return None;
        }
        let mut assignment = Vec::with_capacity(self.params.len());
        for (name, values) in self.params.iter().rev() {
            assignment.push((name.clone(), values[i % values.len()].clone()));
            i /= values.len();
        }
        assignment.reverse();
        Some(ParamSet(assignment))
    }

    /// Every point in enumeration order
    #[must_use]
    pub fn points(&self) -> Vec<ParamSet> {
        (0..self.len()).filter_map(|i| self.point(i)).collect()
    }

    /// `n` distinct points drawn at random, kept in enumeration order
    #[must_use]
    pub fn sample(&self, n: usize, seed: u64) -> Vec<ParamSet> {
        let total = self.len();
        if n >= total {
            return self.points();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut picked = rand::seq::index::sample(&mut rng, total, n).into_vec();
        picked.sort_unstable();
        picked.into_iter().filter_map(|i| self.point(i)).collect()
    }
}

impl Serialize for ParamGrid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (name, values) in &self.params {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParamGrid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GridVisitor;

        impl<'de> Visitor<'de> for GridVisitor {
            type Value = ParamGrid;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map from parameter names to lists of values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ParamGrid, A::Error> {
                let mut grid = ParamGrid::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<ParamValue>>()? {
                    grid = grid.with_param(name, values).map_err(serde::de::Error::custom)?;
                }
                Ok(grid)
            }
        }

        deserializer.deserialize_map(GridVisitor)
    }
}

/// What to evaluate and how to pick the winner
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TuneConfig {
    /// Metrics to evaluate; empty selects the response type's defaults
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// Selection metric; defaults to the first evaluated metric
    #[serde(default)]
    pub selection: Option<Metric>,
    /// Overrides the selection metric's natural direction
    #[serde(default)]
    pub maximize: Option<bool>,
}

impl TuneConfig {
    #[must_use]
    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub const fn with_selection(mut self, metric: Metric) -> Self {
        self.selection = Some(metric);
        self
    }

    #[must_use]
    pub const fn with_maximize(mut self, maximize: bool) -> Self {
        self.maximize = Some(maximize);
        self
    }
}

/// Mean selection metric of one grid point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridScore {
    pub label: String,
    pub params: ParamSet,
    /// `None` when no partition produced a finite value
    pub mean: Option<f64>,
}

/// Outcome of [`Tuner::tune`]
pub struct TuneResult {
    /// Per-point resamples, labelled in grid order
    pub resamples: Resamples,
    pub scores: Vec<GridScore>,
    pub selection: Metric,
    pub maximize: bool,
    /// Index of the winning point in `scores`
    pub best: usize,
    /// Winning model refit on the full dataset
    pub model: Box<dyn FittedModel>,
}

impl TuneResult {
    #[must_use]
    pub fn best_params(&self) -> &ParamSet {
        &self.scores[self.best].params
    }

    #[must_use]
    pub fn best_score(&self) -> Option<f64> {
        self.scores[self.best].mean
    }
}

impl fmt::Debug for TuneResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TuneResult")
            .field("resamples", &self.resamples)
            .field("scores", &self.scores)
            .field("selection", &self.selection)
            .field("maximize", &self.maximize)
            .field("best", &self.best)
            .finish_non_exhaustive()
    }
}

/// Grid-search driver on top of [`ResampleRunner`]
#[derive(Debug, Clone, Default)]
pub struct Tuner {
    runner: ResampleRunner,
}

impl Tuner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_runner(runner: ResampleRunner) -> Self {
        Self { runner }
    }

    /// Resample every point of `grid` and refit the best one
    ///
    /// # Errors
    ///
    /// Returns `TuneError::Build` if a point's model cannot be built,
    /// `TuneError::Point` if resampling a point fails, or a
    /// selection/model error as described on [`TuneError`].
    pub fn tune(
        &self,
        data: &Dataset,
        factory: &dyn ModelFactory,
        grid: &ParamGrid,
        control: &ResampleControl,
        config: &TuneConfig,
    ) -> Result<TuneResult, TuneError> {
        self.tune_points(data, factory, &grid.points(), control, config)
    }

    /// Like [`Tuner::tune`] for an explicit list of points, e.g. from
    /// [`ParamGrid::sample`]
    ///
    /// # Errors
    ///
    /// Returns `TuneError::EmptyGrid` for an empty list, otherwise as
    /// [`Tuner::tune`].
    pub fn tune_points(
        &self,
        data: &Dataset,
        factory: &dyn ModelFactory,
        points: &[ParamSet],
        control: &ResampleControl,
        config: &TuneConfig,
    ) -> Result<TuneResult, TuneError> {
        if points.is_empty() {
            return Err(TuneError::EmptyGrid);
        }
        tracing::info!(points = points.len(), method = %control.method(), "Starting grid search");

        let mut results = Vec::with_capacity(points.len());
        for (i, params) in points.iter().enumerate() {
            let model = factory.build(params).map_err(|source| TuneError::Build {
                point: i + 1,
                params: params.to_string(),
                source,
            })?;
            tracing::debug!(point = i + 1, params = %params, "Resampling grid point");
            let result = self
                .runner
                .run(data, model.as_ref(), control, &config.metrics)
                .map_err(|source| TuneError::Point {
                    point: i + 1,
                    params: params.to_string(),
                    source,
                })?;
            let label = format!("{} #{}", result.label, i + 1);
            results.push(result.with_label(label));
        }

        let evaluated = &results[0].metrics;
        let selection = config.selection.unwrap_or(evaluated[0]);
        if !evaluated.contains(&selection) {
            return Err(TuneError::UnknownSelection(selection));
        }
        let maximize = config.maximize.unwrap_or_else(|| selection.higher_is_better());

        let scores: Vec<GridScore> = results
            .iter()
            .zip(points)
            .map(|(result, params)| {
                let values: Vec<f64> = result
                    .values(selection)
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .collect();
                let mean = mean(&values);
                GridScore {
                    label: result.label.clone(),
                    params: params.clone(),
                    mean: mean.is_finite().then_some(mean),
                }
            })
            .collect();

        let best = select_best(&scores, maximize).ok_or(TuneError::NoFiniteScore(selection))?;
        tracing::info!(
            selection = %selection,
            params = %scores[best].params,
            score = scores[best].mean.unwrap_or(f64::NAN),
            "Selected grid point"
        );

        let model = factory.build(&scores[best].params)?.fit(data)?;

        Ok(TuneResult {
            resamples: Resamples::new(results)?,
            scores,
            selection,
            maximize,
            best,
            model,
        })
    }
}

/// Index of the best finite score; ties keep the earliest point
fn select_best(scores: &[GridScore], maximize: bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.iter().enumerate() {
        let Some(value) = score.mean else { continue };
        let better = match best {
            None => true,
            Some((_, current)) if maximize => value > current,
            Some((_, current)) => value < current,
        };
        if better {
            best = Some((i, value));
        }
    }
    best.map(|(i, _)| i)
}
