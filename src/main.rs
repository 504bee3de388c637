//! Resample Eval CLI
//!
//! Resampling-based performance estimation, comparison and tuning

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use resample_eval::{
    Dataset, ExperimentConfig, ParamSet, Partitioner, ResampleControl, ResampleMethod,
    ResampleReport, ResampleRunner, Resamples, TuneReport, Tuner,
};
use std::collections::HashSet;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resample-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resample every configured model and compare them
    Resample {
        /// Experiment configuration file (glob pattern)
        #[arg(long)]
        config: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,

        /// Write the report to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run the configured grid search
    Tune {
        /// Experiment configuration file (glob pattern)
        #[arg(long)]
        config: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,

        /// Write the report to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show the partitions a resampling control produces
    Partitions {
        /// Dataset file (JSON)
        #[arg(long)]
        data: PathBuf,

        /// Resampling method
        #[arg(long, value_enum, default_value_t = MethodArg::Cv)]
        method: MethodArg,

        /// Folds for cross-validation
        #[arg(long, default_value = "10")]
        folds: usize,

        /// Repeats for cross-validation
        #[arg(long, default_value = "1")]
        repeats: usize,

        /// Draws for bootstrap and out-of-bootstrap
        #[arg(long, default_value = "25")]
        samples: usize,

        /// Training proportion for a single split
        #[arg(long, default_value = "0.6667")]
        prop: f64,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Column to stratify on
        #[arg(long)]
        strata: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Bootstrap,
    Cv,
    Oob,
    Split,
    Train,
}

/// Table row for partition listings
#[derive(Tabled)]
struct PartitionRow {
    #[tabled(rename = "Partition")]
    id: String,
    #[tabled(rename = "Train")]
    train: usize,
    #[tabled(rename = "Unique Train")]
    unique_train: usize,
    #[tabled(rename = "Test")]
    test: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Resample {
            config,
            format,
            output,
        } => {
            let mut rendered = Vec::new();
            for (path, experiment) in load_experiments(&config)? {
                tracing::info!(config = %path.display(), title = %experiment.title, "Resampling experiment");
                let report = resample(&experiment)
                    .with_context(|| format!("experiment {}", path.display()))?;
                rendered.push(match format {
                    Format::Markdown => report.to_markdown(),
                    Format::Json => report.to_json()?,
                });
            }
            emit(&rendered, output)
        }
        Commands::Tune {
            config,
            format,
            output,
        } => {
            let mut rendered = Vec::new();
            for (path, experiment) in load_experiments(&config)? {
                tracing::info!(config = %path.display(), title = %experiment.title, "Tuning experiment");
                let report =
                    tune(&experiment).with_context(|| format!("experiment {}", path.display()))?;
                rendered.push(match format {
                    Format::Markdown => report.to_markdown(),
                    Format::Json => report.to_json()?,
                });
            }
            emit(&rendered, output)
        }
        Commands::Partitions {
            data,
            method,
            folds,
            repeats,
            samples,
            prop,
            seed,
            strata,
        } => {
            let dataset = Dataset::load(&data)
                .with_context(|| format!("failed to load dataset {}", data.display()))?;
            let method = match method {
                MethodArg::Bootstrap => ResampleMethod::Bootstrap { samples },
                MethodArg::Cv => ResampleMethod::CrossValidation { folds, repeats },
                MethodArg::Oob => ResampleMethod::OutOfBootstrap { samples },
                MethodArg::Split => ResampleMethod::Split { prop },
                MethodArg::Train => ResampleMethod::Train,
            };
            let mut control = ResampleControl::new(method)?.with_seed(seed);
            if let Some(column) = strata {
                control = control.with_strata(column);
            }

            let partitioner = Partitioner::new(&control, &dataset)?;
            println!("{} on {} rows, {} strata", control.fingerprint(), dataset.n_rows(), partitioner.n_strata());
            let rows: Vec<PartitionRow> = partitioner
                .iter()
                .map(|p| PartitionRow {
                    id: p.id.to_string(),
                    train: p.train.len(),
                    unique_train: p.train.iter().collect::<HashSet<_>>().len(),
                    test: p.test.len(),
                })
                .collect();
            println!("{}", Table::new(rows));
            Ok(())
        }
    }
}

fn load_experiments(pattern: &str) -> Result<Vec<(PathBuf, ExperimentConfig)>> {
    let experiments = ExperimentConfig::load_glob(pattern)
        .with_context(|| format!("failed to load experiment configuration '{pattern}'"))?;
    if experiments.is_empty() {
        bail!("no experiment configuration matches '{pattern}'");
    }
    Ok(experiments)
}

fn resample(experiment: &ExperimentConfig) -> Result<ResampleReport> {
    let data = experiment.load_dataset()?;
    let runner = ResampleRunner::with_config(experiment.runner.runner_config());

    let mut resamples = Resamples::default();
    for model in experiment.build_models()? {
        let result = runner
            .run(&data, model.as_ref(), &experiment.control, &experiment.metrics)
            .with_context(|| format!("resampling model '{}'", model.label()))?;
        resamples.push(result)?;
    }

    Ok(ResampleReport::build(&experiment.title, &resamples, &experiment.tests)?)
}

fn tune(experiment: &ExperimentConfig) -> Result<TuneReport> {
    let spec = experiment.tune_spec()?;
    let data = experiment.load_dataset()?;
    let kind = spec.kind;
    let factory = move |params: &ParamSet| kind.build(params);

    let tuner = Tuner::with_runner(ResampleRunner::with_config(experiment.runner.runner_config()));
    let result = tuner.tune_points(
        &data,
        &factory,
        &spec.points(experiment.control.seed()),
        &experiment.control,
        &spec.tune_config(&experiment.metrics),
    )?;

    Ok(TuneReport::build(&experiment.title, &result))
}

fn emit(rendered: &[String], output: Option<PathBuf>) -> Result<()> {
    let text = rendered.join("\n");
    match output {
        Some(path) => {
            std::fs::write(&path, text)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            tracing::info!(output = %path.display(), "Report written");
        }
        None => println!("{text}"),
    }
    Ok(())
}
