//! Resampling partitions: the training/testing row sets of each iteration.
//!
//! Every partition is generated on demand from the control seed. The random
//! stream is chosen per repeat (cross-validation) or per draw (bootstrap),
//! so partition `i` is the same whether it is produced alone, in sequence or
//! on another thread.

use crate::control::{ResampleControl, ResampleMethod};
use crate::dataset::{Column, Dataset, Response};
use crate::stats::{quantile, sorted};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while preparing partitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Dataset has no rows")]
    EmptyDataset,

    #[error("Cannot make {folds} folds from {rows} rows")]
    TooFewRows { rows: usize, folds: usize },

    #[error("Unknown stratification column: {0}")]
    UnknownStrata(String),

    #[error("Column '{0}' cannot be used for stratification")]
    Unstratifiable(String),
}

/// Position of a partition within its resampling run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId {
    /// Repeat number (cross-validation); zero for other methods
    pub repeat: usize,
    /// Fold within the repeat, or bootstrap draw number
    pub index: usize,
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.repeat + 1, self.index + 1)
    }
}

/// One training/testing split of the dataset rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub id: PartitionId,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Generates the partitions described by a [`ResampleControl`]
#[derive(Debug, Clone)]
pub struct Partitioner {
    method: ResampleMethod,
    seed: u64,
    n_rows: usize,
    /// Row indices of each stratum; a single group when not stratified
    strata: Vec<Vec<usize>>,
}

impl Partitioner {
    /// Prepare partitioning of `dataset` under `control`
    ///
    /// # Errors
    ///
    /// Returns an error for an empty dataset, fewer rows than folds, or an
    /// unknown or unusable stratification column.
    pub fn new(control: &ResampleControl, dataset: &Dataset) -> Result<Self, PartitionError> {
        let n_rows = dataset.n_rows();
        if n_rows == 0 {
            return Err(PartitionError::EmptyDataset);
        }
        if let ResampleMethod::CrossValidation { folds, .. } = control.method() {
            if n_rows < *folds {
                return Err(PartitionError::TooFewRows {
                    rows: n_rows,
                    folds: *folds,
                });
            }
        }

        let strata = match control.strata() {
            Some(name) => group_rows(&strata_labels(
                dataset,
                name,
                control.strata_breaks(),
                control.strata_size_min(),
            )?),
            None => vec![(0..n_rows).collect()],
        };

        Ok(Self {
            method: control.method().clone(),
            seed: control.seed(),
            n_rows,
            strata,
        })
    }

    /// Total number of partitions
    #[must_use]
    pub const fn len(&self) -> usize {
        self.method.n_partitions()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of strata rows are grouped into
    #[must_use]
    pub fn n_strata(&self) -> usize {
        self.strata.len()
    }

    /// Generate partition `i` (in `0..len()`)
    #[must_use]
    pub fn partition(&self, i: usize) -> Option<Partition> {
        if i >= self.len() {
            return None;
        }
        let partition = match self.method {
            ResampleMethod::CrossValidation { folds, .. } => self.fold(i / folds, i % folds, folds),
            ResampleMethod::Bootstrap { .. } => self.bootstrap(i, false),
            ResampleMethod::OutOfBootstrap { .. } => self.bootstrap(i, true),
            ResampleMethod::Split { prop } => self.split(prop),
            ResampleMethod::Train => Partition {
                id: PartitionId { repeat: 0, index: 0 },
                train: (0..self.n_rows).collect(),
                test: (0..self.n_rows).collect(),
            },
        };
        Some(partition)
    }

    /// Iterate over all partitions in order
    pub fn iter(&self) -> impl Iterator<Item = Partition> + '_ {
        (0..self.len()).filter_map(move |i| self.partition(i))
    }

    fn rng(&self, stream: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(stream as u64);
        rng
    }

    /// Fold label of every row for one repeat
    ///
    /// Rows are shuffled within their stratum and dealt to folds with a
    /// counter that carries across strata, so fold sizes differ by at most
    /// one and each stratum is spread evenly.
    fn fold_labels(&self, repeat: usize, folds: usize) -> Vec<usize> {
        let mut rng = self.rng(repeat);
        let mut labels = vec![0; self.n_rows];
        let mut counter = 0;
        for group in &self.strata {
            let mut rows = group.clone();
            rows.shuffle(&mut rng);
            for row in rows {
                labels[row] = counter % folds;
                counter += 1;
            }
        }
        let mut relabel: Vec<usize> = (0..folds).collect();
        relabel.shuffle(&mut rng);
        labels.iter().map(|&l| relabel[l]).collect()
    }

    fn fold(&self, repeat: usize, fold: usize, folds: usize) -> Partition {
        let labels = self.fold_labels(repeat, folds);
        let (test, train): (Vec<usize>, Vec<usize>) = (0..self.n_rows).partition(|&i| labels[i] == fold);
        Partition {
            id: PartitionId { repeat, index: fold },
            train,
            test,
        }
    }

    fn bootstrap(&self, draw: usize, out_of_bag: bool) -> Partition {
        let mut rng = self.rng(draw);
        let mut train = Vec::with_capacity(self.n_rows);
        for group in &self.strata {
            for _ in 0..group.len() {
                train.push(group[rng.gen_range(0..group.len())]);
            }
        }
        train.sort_unstable();

        let test = if out_of_bag {
            let mut drawn = vec![false; self.n_rows];
            for &row in &train {
                drawn[row] = true;
            }
            (0..self.n_rows).filter(|&i| !drawn[i]).collect()
        } else {
            (0..self.n_rows).collect()
        };

        Partition {
            id: PartitionId {
                repeat: 0,
                index: draw,
            },
            train,
            test,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn split(&self, prop: f64) -> Partition {
        let mut rng = self.rng(0);
        let mut train = Vec::new();
        let mut test = Vec::new();
        for group in &self.strata {
            let mut rows = group.clone();
            rows.shuffle(&mut rng);
            let n_train = ((rows.len() as f64 * prop).round() as usize).min(rows.len());
            train.extend_from_slice(&rows[..n_train]);
            test.extend_from_slice(&rows[n_train..]);
        }
        train.sort_unstable();
        test.sort_unstable();
        Partition {
            id: PartitionId { repeat: 0, index: 0 },
            train,
            test,
        }
    }
}

/// Per-row stratum labels for the named column or response
///
/// Factors stratify by level, survival responses by event status, and
/// numeric values by quantile bins. The number of bins is reduced so each
/// holds at least `size_min` rows; with fewer than two bins all rows share
/// one stratum.
///
/// # Errors
///
/// Returns an error if the column does not exist or is a matrix response.
pub fn strata_labels(
    dataset: &Dataset,
    name: &str,
    breaks: usize,
    size_min: usize,
) -> Result<Vec<usize>, PartitionError> {
    if name == dataset.schema().response {
        return match dataset.response() {
            Response::Factor(f) => Ok(f.codes().to_vec()),
            Response::Numeric(v) => Ok(quantile_bins(v, breaks, size_min)),
            Response::Survival(s) => Ok(s.event().iter().map(|&e| usize::from(e)).collect()),
            Response::Matrix(_) => Err(PartitionError::Unstratifiable(name.to_string())),
        };
    }
    match dataset.column(name) {
        Some(Column::Factor(f)) => Ok(f.codes().to_vec()),
        Some(Column::Numeric(v)) => Ok(quantile_bins(v, breaks, size_min)),
        None => Err(PartitionError::UnknownStrata(name.to_string())),
    }
}

#[allow(clippy::cast_precision_loss)]
fn quantile_bins(values: &[f64], breaks: usize, size_min: usize) -> Vec<usize> {
    let bins = breaks.min(values.len() / size_min.max(1));
    if bins < 2 {
        return vec![0; values.len()];
    }
    let ordered = sorted(values);
    let cuts: Vec<f64> = (1..bins)
        .map(|j| quantile(&ordered, j as f64 / bins as f64))
        .collect();
    values
        .iter()
        .map(|v| cuts.iter().filter(|&&c| *v > c).count())
        .collect()
}

fn group_rows(labels: &[usize]) -> Vec<Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(row);
    }
    groups.into_values().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::dataset::Factor;
    use std::collections::HashSet;

    fn numeric_data(n: usize) -> Dataset {
        let y: Vec<f64> = (0..n).map(|i| i as f64).collect();
        Dataset::builder("y", Response::Numeric(y.clone()))
            .predictor("x", Column::Numeric(y))
            .build()
            .unwrap()
    }

    fn class_data(n_a: usize, n_b: usize) -> Dataset {
        let labels: Vec<&str> = std::iter::repeat("a")
            .take(n_a)
            .chain(std::iter::repeat("b").take(n_b))
            .collect();
        Dataset::builder("class", Response::Factor(Factor::from_labels(&labels).unwrap()))
            .build()
            .unwrap()
    }

    // ========================================================================
    // Cross-validation
    // ========================================================================

    #[test]
    fn test_kfold_covers_each_row_once_per_repeat() {
        let data = numeric_data(103);
        let control = ResampleControl::cross_validation(5, 3).unwrap().with_seed(11);
        let partitioner = Partitioner::new(&control, &data).unwrap();
        let partitions: Vec<Partition> = partitioner.iter().collect();
        assert_eq!(partitions.len(), 15);

        for repeat in 0..3 {
            let mut seen: Vec<usize> = partitions
                .iter()
                .filter(|p| p.id.repeat == repeat)
                .flat_map(|p| p.test.clone())
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..103).collect::<Vec<_>>());
        }

        for p in &partitions {
            assert!(p.test.len() == 20 || p.test.len() == 21);
            assert_eq!(p.train.len() + p.test.len(), 103);
            let test: HashSet<_> = p.test.iter().collect();
            assert!(p.train.iter().all(|i| !test.contains(i)));
        }
    }

    #[test]
    fn test_repeats_differ() {
        let data = numeric_data(50);
        let control = ResampleControl::cross_validation(5, 2).unwrap();
        let partitioner = Partitioner::new(&control, &data).unwrap();
        let first = partitioner.partition(0).unwrap();
        let second_repeat = partitioner.partition(5).unwrap();
        assert_eq!(second_repeat.id, PartitionId { repeat: 1, index: 0 });
        assert_ne!(first.test, second_repeat.test);
    }

    #[test]
    fn test_kfold_too_few_rows() {
        let data = numeric_data(3);
        let control = ResampleControl::cross_validation(5, 1).unwrap();
        assert_eq!(
            Partitioner::new(&control, &data).unwrap_err(),
            PartitionError::TooFewRows { rows: 3, folds: 5 }
        );
    }

    #[test]
    fn test_stratified_kfold_balances_classes() {
        let data = class_data(50, 25);
        let control = ResampleControl::cross_validation(5, 1)
            .unwrap()
            .with_strata("class");
        let partitioner = Partitioner::new(&control, &data).unwrap();
        assert_eq!(partitioner.n_strata(), 2);
        for p in partitioner.iter() {
            let minority = p.test.iter().filter(|&&i| i >= 50).count();
            assert_eq!(p.test.len(), 15);
            assert_eq!(minority, 5);
        }
    }

    #[test]
    fn test_partition_is_reproducible_alone() {
        let data = numeric_data(40);
        let control = ResampleControl::cross_validation(4, 2).unwrap().with_seed(3);
        let a = Partitioner::new(&control, &data).unwrap();
        let b = Partitioner::new(&control, &data).unwrap();
        let sequential: Vec<Partition> = a.iter().collect();
        assert_eq!(b.partition(6).unwrap(), sequential[6]);
        assert!(a.partition(8).is_none());
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    #[test]
    fn test_bootstrap_sizes() {
        let data = numeric_data(100);
        let control = ResampleControl::bootstrap(10).unwrap();
        let partitions: Vec<Partition> = Partitioner::new(&control, &data).unwrap().iter().collect();
        assert_eq!(partitions.len(), 10);
        for p in &partitions {
            assert_eq!(p.train.len(), 100);
            assert_eq!(p.test, (0..100).collect::<Vec<_>>());
            let unique: HashSet<_> = p.train.iter().collect();
            assert!(unique.len() > 45 && unique.len() < 80, "unique = {}", unique.len());
        }
    }

    #[test]
    fn test_out_of_bootstrap_disjoint() {
        let data = numeric_data(60);
        let control = ResampleControl::out_of_bootstrap(20).unwrap();
        for p in Partitioner::new(&control, &data).unwrap().iter() {
            assert_eq!(p.train.len(), 60);
            let train: HashSet<_> = p.train.iter().collect();
            assert!(p.test.iter().all(|i| !train.contains(i)));
            assert_eq!(train.len() + p.test.len(), 60);
        }
    }

    #[test]
    fn test_stratified_bootstrap_keeps_stratum_sizes() {
        let data = class_data(30, 10);
        let control = ResampleControl::bootstrap(5).unwrap().with_strata("class");
        for p in Partitioner::new(&control, &data).unwrap().iter() {
            assert_eq!(p.train.iter().filter(|&&i| i >= 30).count(), 10);
        }
    }

    // ========================================================================
    // Split and train
    // ========================================================================

    #[test]
    fn test_split_proportion() {
        let data = numeric_data(90);
        let control = ResampleControl::split(2.0 / 3.0).unwrap();
        let partitioner = Partitioner::new(&control, &data).unwrap();
        assert_eq!(partitioner.len(), 1);
        let p = partitioner.partition(0).unwrap();
        assert_eq!(p.train.len(), 60);
        assert_eq!(p.test.len(), 30);
    }

    #[test]
    fn test_train_uses_all_rows() {
        let data = numeric_data(7);
        let p = Partitioner::new(&ResampleControl::train(), &data)
            .unwrap()
            .partition(0)
            .unwrap();
        assert_eq!(p.train, p.test);
        assert_eq!(p.train.len(), 7);
    }

    // ========================================================================
    // Strata
    // ========================================================================

    #[test]
    fn test_numeric_strata_quantile_bins() {
        let data = numeric_data(100);
        let labels = strata_labels(&data, "x", 4, 20).unwrap();
        let counts = labels.iter().fold(vec![0; 4], |mut acc, &l| {
            acc[l] += 1;
            acc
        });
        assert_eq!(counts, vec![25, 25, 25, 25]);
    }

    #[test]
    fn test_numeric_strata_collapse_when_small() {
        let data = numeric_data(30);
        let labels = strata_labels(&data, "y", 4, 20).unwrap();
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_unknown_strata() {
        let data = numeric_data(10);
        assert_eq!(
            strata_labels(&data, "missing", 4, 20).unwrap_err(),
            PartitionError::UnknownStrata("missing".to_string())
        );
    }
}
