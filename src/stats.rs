//! Descriptive statistics and paired significance testing.
//!
//! Implements the statistics used to summarize resampled performance:
//! - Mean, sample standard deviation and type-7 quantiles
//! - Paired t-test with Student's t confidence interval
//! - Bonferroni and Holm p-value adjustment

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::cmp::Ordering;
use thiserror::Error;

/// Errors from statistical computations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("At least {required} observations are required, got {found}")]
    InsufficientData { required: usize, found: usize },

    #[error("Confidence level must lie strictly between 0 and 1, got {0}")]
    InvalidConfidence(f64),

    #[error("Invalid t distribution: {0}")]
    Distribution(String),
}

/// Compute mean of samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Compute sample standard deviation (n - 1 denominator)
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return f64::NAN;
    }
    let m = mean(samples);
    let variance = samples.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Quantile with linear interpolation between order statistics
///
/// `sorted` must be ascending. Returns NaN for an empty slice.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn quantile(sorted: &[f64], prob: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * prob.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Copy of `samples` sorted ascending, NaN last
#[must_use]
pub fn sorted(samples: &[f64]) -> Vec<f64> {
    let mut values = samples.to_vec();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan())));
    values
}

/// Result of a paired t-test on per-partition differences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    /// Mean difference
    pub estimate: f64,
    /// Lower confidence bound
    pub ci_lower: f64,
    /// Upper confidence bound
    pub ci_upper: f64,
    /// t-statistic
    pub t_statistic: f64,
    /// Degrees of freedom
    pub degrees_of_freedom: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Number of paired observations
    pub n: usize,
}

/// Paired t-test on the differences between two matched samples
///
/// A zero-variance difference yields a degenerate test: the interval
/// collapses to the estimate and the p-value is 1 when the estimate is zero,
/// 0 otherwise.
///
/// # Errors
///
/// Returns `StatsError::InsufficientData` for fewer than two differences.
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(differences: &[f64], confidence: f64) -> Result<TTest, StatsError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(StatsError::InvalidConfidence(confidence));
    }
    let n = differences.len();
    if n < 2 {
        return Err(StatsError::InsufficientData {
            required: 2,
            found: n,
        });
    }

    let estimate = mean(differences);
    let sd = std_dev(differences);
    let df = (n - 1) as f64;

    if sd < f64::EPSILON {
        let null = estimate.abs() < f64::EPSILON;
        return Ok(TTest {
            estimate,
            ci_lower: estimate,
            ci_upper: estimate,
            t_statistic: if null { 0.0 } else { estimate.signum() * f64::INFINITY },
            degrees_of_freedom: df,
            p_value: if null { 1.0 } else { 0.0 },
            n,
        });
    }

    let se = sd / (n as f64).sqrt();
    let t_statistic = estimate / se;

    let t_dist =
        StudentsT::new(0.0, 1.0, df).map_err(|e| StatsError::Distribution(e.to_string()))?;
    let p_value = (2.0 * (1.0 - t_dist.cdf(t_statistic.abs()))).clamp(0.0, 1.0);
    let critical = t_dist.inverse_cdf(1.0 - (1.0 - confidence) / 2.0);

    Ok(TTest {
        estimate,
        ci_lower: estimate - critical * se,
        ci_upper: estimate + critical * se,
        t_statistic,
        degrees_of_freedom: df,
        p_value,
        n,
    })
}

/// Multiple-comparison adjustment for p-values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PValueAdjust {
    None,
    Bonferroni,
    /// Holm's step-down procedure
    #[default]
    Holm,
}

/// Adjust a family of p-values; NaN entries are left out of the family
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn adjust_p_values(p_values: &[f64], method: PValueAdjust) -> Vec<f64> {
    let m = p_values.iter().filter(|p| !p.is_nan()).count() as f64;
    match method {
        PValueAdjust::None => p_values.to_vec(),
        PValueAdjust::Bonferroni => p_values
            .iter()
            .map(|&p| if p.is_nan() { p } else { (p * m).min(1.0) })
            .collect(),
        PValueAdjust::Holm => {
            let mut order: Vec<usize> = (0..p_values.len())
                .filter(|&i| !p_values[i].is_nan())
                .collect();
            order.sort_by(|&a, &b| {
                p_values[a]
                    .partial_cmp(&p_values[b])
                    .unwrap_or(Ordering::Equal)
            });

            let mut adjusted = p_values.to_vec();
            let mut running_max = 0.0_f64;
            for (rank, &i) in order.iter().enumerate() {
                let value = ((m - rank as f64) * p_values[i]).min(1.0);
                running_max = running_max.max(value);
                adjusted[i] = running_max;
            }
            adjusted
        }
    }
}

/// Kaplan-Meier product-limit estimate
///
/// Returns the step function as `(time, survival)` pairs at each distinct
/// event time, ascending. Rows with `event == false` are censored.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn kaplan_meier(time: &[f64], event: &[bool]) -> Vec<(f64, f64)> {
    let mut order: Vec<usize> = (0..time.len().min(event.len())).collect();
    order.sort_by(|&a, &b| time[a].partial_cmp(&time[b]).unwrap_or(Ordering::Equal));

    let mut curve = Vec::new();
    let mut at_risk = order.len();
    let mut surv = 1.0;
    let mut i = 0;
    while i < order.len() {
        let t = time[order[i]];
        let mut deaths = 0_usize;
        let mut tied = 0_usize;
        while i < order.len() && time[order[i]] == t {
            if event[order[i]] {
                deaths += 1;
            }
            tied += 1;
            i += 1;
        }
        if deaths > 0 {
            surv *= 1.0 - deaths as f64 / at_risk as f64;
            curve.push((t, surv));
        }
        at_risk -= tied;
    }
    curve
}

/// Value of a right-continuous step function at `t` (1 before the first step)
#[must_use]
pub fn step_at(curve: &[(f64, f64)], t: f64) -> f64 {
    let steps = curve.partition_point(|&(s, _)| s <= t);
    if steps == 0 {
        1.0
    } else {
        curve[steps - 1].1
    }
}

/// Left limit of a step function at `t`
#[must_use]
pub fn step_before(curve: &[(f64, f64)], t: f64) -> f64 {
    let steps = curve.partition_point(|&(s, _)| s < t);
    if steps == 0 {
        1.0
    } else {
        curve[steps - 1].1
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::unwrap_used)]
mod tests {
    use super::*;

    // =========================================================================
    // Kaplan-Meier
    // =========================================================================

    #[test]
    fn test_kaplan_meier_steps() {
        // deaths at 1 and 3, censored at 2 and 4
        let time = [1.0, 2.0, 3.0, 4.0];
        let event = [true, false, true, false];
        let curve = kaplan_meier(&time, &event);
        assert_eq!(curve.len(), 2);
        assert!((curve[0].1 - 0.75).abs() < 1e-12);
        // 0.75 * (1 - 1/2)
        assert!((curve[1].1 - 0.375).abs() < 1e-12);

        assert_eq!(step_at(&curve, 0.5), 1.0);
        assert!((step_at(&curve, 1.0) - 0.75).abs() < 1e-12);
        assert_eq!(step_before(&curve, 1.0), 1.0);
        assert!((step_at(&curve, 10.0) - 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_kaplan_meier_all_censored() {
        assert!(kaplan_meier(&[1.0, 2.0], &[false, false]).is_empty());
        assert_eq!(step_at(&[], 5.0), 1.0);
    }

    // =========================================================================
    // Descriptive statistics
    // =========================================================================

    #[test]
    fn test_mean_and_std() {
        let samples = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&samples) - 5.0).abs() < 1e-12);
        let sd = std_dev(&samples);
        // Sample std for this data is ~2.138
        assert!(sd > 2.13 && sd < 2.14, "sd = {sd}");
    }

    #[test]
    fn test_empty_and_single_are_nan() {
        assert!(mean(&[]).is_nan());
        assert!(std_dev(&[1.0]).is_nan());
    }

    #[test]
    fn test_quantile_type7() {
        let values = sorted(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 4.0);
        assert!((quantile(&values, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile(&values, 0.25) - 1.75).abs() < 1e-12);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_sorted_puts_nan_last() {
        let values = sorted(&[f64::NAN, 2.0, 1.0]);
        assert_eq!(&values[..2], &[1.0, 2.0]);
        assert!(values[2].is_nan());
    }

    // =========================================================================
    // Paired t-test
    // =========================================================================

    #[test]
    fn test_paired_t_test_significant() {
        let diffs: Vec<f64> = (0..30).map(|i| 0.1 + f64::from(i % 5) * 0.01).collect();
        let test = paired_t_test(&diffs, 0.95).unwrap();
        assert!(test.p_value < 0.001, "p = {}", test.p_value);
        assert!(test.ci_lower > 0.0);
        assert!(test.ci_lower < test.estimate && test.estimate < test.ci_upper);
        assert_eq!(test.n, 30);
        assert_eq!(test.degrees_of_freedom, 29.0);
    }

    #[test]
    fn test_paired_t_test_null() {
        let diffs = vec![0.1, -0.1, 0.05, -0.05, 0.02, -0.02];
        let test = paired_t_test(&diffs, 0.95).unwrap();
        assert!(test.p_value > 0.9);
        assert!(test.ci_lower < 0.0 && test.ci_upper > 0.0);
    }

    #[test]
    fn test_paired_t_test_known_value() {
        // mean 1, sd sqrt(2/3), n 4 => t ~= 2.449, df = 3, two-sided p ~= 0.092
        let diffs = vec![0.0, 1.0, 2.0, 1.0];
        let sd = std_dev(&diffs);
        let test = paired_t_test(&diffs, 0.95).unwrap();
        assert!((test.t_statistic - 1.0 / (sd / 2.0)).abs() < 1e-9);
        let expected_sd = (2.0_f64 / 3.0).sqrt();
        assert!((sd - expected_sd).abs() < 1e-12);
        assert!(test.p_value > 0.05 && test.p_value < 0.2);
    }

    #[test]
    fn test_paired_t_test_zero_variance() {
        let test = paired_t_test(&[0.2, 0.2, 0.2], 0.95).unwrap();
        assert_eq!(test.p_value, 0.0);
        assert_eq!(test.ci_lower, test.ci_upper);

        let test = paired_t_test(&[0.0, 0.0], 0.95).unwrap();
        assert_eq!(test.p_value, 1.0);
    }

    #[test]
    fn test_paired_t_test_requires_two() {
        assert_eq!(
            paired_t_test(&[0.5], 0.95).unwrap_err(),
            StatsError::InsufficientData {
                required: 2,
                found: 1
            }
        );
        assert!(paired_t_test(&[0.5, 0.6], 1.0).is_err());
    }

    // =========================================================================
    // P-value adjustment
    // =========================================================================

    #[test]
    fn test_bonferroni() {
        let adjusted = adjust_p_values(&[0.01, 0.04, 0.5], PValueAdjust::Bonferroni);
        assert!((adjusted[0] - 0.03).abs() < 1e-12);
        assert!((adjusted[1] - 0.12).abs() < 1e-12);
        assert_eq!(adjusted[2], 1.0);
    }

    #[test]
    fn test_holm_is_monotone() {
        let adjusted = adjust_p_values(&[0.04, 0.01, 0.03], PValueAdjust::Holm);
        // sorted: 0.01*3 = 0.03, 0.03*2 = 0.06, 0.04*1 -> max(0.06, 0.04)
        assert!((adjusted[1] - 0.03).abs() < 1e-12);
        assert!((adjusted[2] - 0.06).abs() < 1e-12);
        assert!((adjusted[0] - 0.06).abs() < 1e-12);
    }

    #[test]
    fn test_adjust_skips_nan() {
        let adjusted = adjust_p_values(&[0.01, f64::NAN], PValueAdjust::Bonferroni);
        assert!((adjusted[0] - 0.01).abs() < 1e-12);
        assert!(adjusted[1].is_nan());
        assert_eq!(
            adjust_p_values(&[0.2, 0.3], PValueAdjust::None),
            vec![0.2, 0.3]
        );
    }
}
