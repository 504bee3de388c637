//! Report generation for resampling and tuning results.
//!
//! Reports carry:
//! - Per-model metric summaries across partitions
//! - Paired comparisons with adjusted p-values
//! - Grid scores and the selected point when tuning

use crate::metrics::Metric;
use crate::resamples::{MetricSummary, PairedComparison, Resamples, ResamplesError, TestConfig};
use crate::stats::PValueAdjust;
use crate::tune::{GridScore, TuneResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use tabled::{Table, Tabled};

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub framework_version: String,
    /// Resampling scheme shared by every model, e.g. `cross_validation(5 folds x 1) seed=42`
    pub control: String,
    pub models: usize,
    pub partitions: usize,
}

impl ReportMetadata {
    fn new(title: &str, resamples: &Resamples) -> Self {
        Self {
            title: title.to_string(),
            generated_at: Utc::now(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            control: resamples
                .fingerprint()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            models: resamples.len(),
            partitions: resamples.iter().next().map_or(0, |m| m.n_partitions()),
        }
    }
}

/// Summary and comparison of several resampled models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResampleReport {
    pub metadata: ReportMetadata,
    pub confidence: f64,
    pub adjust: PValueAdjust,
    pub summary: Vec<MetricSummary>,
    /// Empty when fewer than two models were resampled
    pub comparisons: Vec<PairedComparison>,
}

impl ResampleReport {
    /// Summarize `resamples` and test every model pair
    ///
    /// # Errors
    ///
    /// Returns a `ResamplesError` if the paired tests cannot be computed.
    pub fn build(title: &str, resamples: &Resamples, tests: &TestConfig) -> Result<Self, ResamplesError> {
        let comparisons = if resamples.len() > 1 {
            resamples.paired_tests(tests)?
        } else {
            Vec::new()
        };
        Ok(Self {
            metadata: ReportMetadata::new(title, resamples),
            confidence: tests.confidence,
            adjust: tests.adjust,
            summary: resamples.summary(),
            comparisons,
        })
    }

    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        write_header(&mut output, &self.metadata);

        writeln!(output, "## Summary").ok();
        writeln!(output).ok();
        writeln!(output, "{}", summary_table(&self.summary)).ok();
        writeln!(output).ok();

        if !self.comparisons.is_empty() {
            writeln!(output, "## Paired Comparisons").ok();
            writeln!(output).ok();
            writeln!(
                output,
                "Confidence {}%, p-values adjusted with {:?}.",
                self.confidence * 100.0,
                self.adjust
            )
            .ok();
            writeln!(output).ok();
            writeln!(output, "{}", comparison_table(&self.comparisons)).ok();
        }

        output
    }
}

/// Grid scores and the selected point of a tuning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuneReport {
    pub metadata: ReportMetadata,
    pub selection: Metric,
    pub maximize: bool,
    pub scores: Vec<GridScore>,
    pub best: usize,
    pub summary: Vec<MetricSummary>,
}

impl TuneReport {
    #[must_use]
    pub fn build(title: &str, result: &TuneResult) -> Self {
        Self {
            metadata: ReportMetadata::new(title, &result.resamples),
            selection: result.selection,
            maximize: result.maximize,
            scores: result.scores.clone(),
            best: result.best,
            summary: result.resamples.summary(),
        }
    }

    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();
        write_header(&mut output, &self.metadata);

        writeln!(output, "## Grid").ok();
        writeln!(output).ok();
        writeln!(
            output,
            "Selection: {} ({})",
            self.selection,
            if self.maximize { "maximize" } else { "minimize" }
        )
        .ok();
        writeln!(output).ok();

        let rows: Vec<GridRow> = self
            .scores
            .iter()
            .enumerate()
            .map(|(i, score)| GridRow {
                point: score.label.clone(),
                params: score.params.to_string(),
                score: score.mean.map_or_else(|| "-".to_string(), |v| format!("{v:.4}")),
                selected: if i == self.best { "✓" } else { "" }.to_string(),
            })
            .collect();
        writeln!(output, "{}", Table::new(rows)).ok();
        writeln!(output).ok();

        if let Some(best) = self.scores.get(self.best) {
            writeln!(output, "**Selected:** {}", best.params).ok();
            writeln!(output).ok();
        }

        writeln!(output, "## Summary").ok();
        writeln!(output).ok();
        writeln!(output, "{}", summary_table(&self.summary)).ok();

        output
    }
}

fn write_header(output: &mut String, metadata: &ReportMetadata) {
    writeln!(output, "# {}", metadata.title).ok();
    writeln!(output).ok();
    writeln!(
        output,
        "**Generated:** {}",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
    .ok();
    writeln!(output, "**Framework Version:** {}", metadata.framework_version).ok();
    writeln!(output, "**Resampling:** {}", metadata.control).ok();
    writeln!(
        output,
        "**Models:** {} | **Partitions:** {}",
        metadata.models, metadata.partitions
    )
    .ok();
    writeln!(output).ok();
}

fn fmt_value(value: f64) -> String {
    if value.is_nan() {
        "-".to_string()
    } else {
        format!("{value:.4}")
    }
}

/// Table row for metric summaries
#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "SD")]
    sd: String,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Median")]
    median: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "NA")]
    missing: usize,
}

fn summary_table(summary: &[MetricSummary]) -> String {
    let rows: Vec<SummaryRow> = summary
        .iter()
        .map(|s| SummaryRow {
            model: s.model.clone(),
            metric: s.metric.to_string(),
            mean: fmt_value(s.mean),
            sd: fmt_value(s.sd),
            min: fmt_value(s.min),
            median: fmt_value(s.median),
            max: fmt_value(s.max),
            missing: s.missing,
        })
        .collect();
    Table::new(rows).to_string()
}

/// Table row for paired comparisons
#[derive(Tabled)]
struct ComparisonRow {
    #[tabled(rename = "Comparison")]
    comparison: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Estimate")]
    estimate: String,
    #[tabled(rename = "CI")]
    interval: String,
    #[tabled(rename = "p-value")]
    p_value: String,
    #[tabled(rename = "Adjusted")]
    p_adjusted: String,
}

/// Table row for tuning grid points
#[derive(Tabled)]
struct GridRow {
    #[tabled(rename = "Point")]
    point: String,
    #[tabled(rename = "Parameters")]
    params: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Selected")]
    selected: String,
}

fn comparison_table(comparisons: &[PairedComparison]) -> String {
    let rows: Vec<ComparisonRow> = comparisons
        .iter()
        .map(|c| ComparisonRow {
            comparison: format!("{} - {}", c.model_a, c.model_b),
            metric: c.metric.to_string(),
            estimate: fmt_value(c.estimate),
            interval: format!("[{}, {}]", fmt_value(c.ci_lower), fmt_value(c.ci_upper)),
            p_value: fmt_value(c.p_value),
            p_adjusted: fmt_value(c.p_adjusted),
        })
        .collect();
    Table::new(rows).to_string()
}
