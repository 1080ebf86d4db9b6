//! Biomarker Select CLI
//!
//! Candidate model selection, calibration and ranking

use anyhow::Context;
use biomarker_select::{
    normalize, CalibrationRegistry, OutputTargets, PerformanceRepository, RankBy, SelectionContext,
    SelectionDriver, SIGNIFICANCE_TESTS,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "biomarker-select")]
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
    /// Rank candidate models for every dataset/endpoint
    Select {
        /// YAML configuration file
        #[arg(long)]
        config: PathBuf,

        /// Number of models to keep per dataset/endpoint
        #[arg(long)]
        k: Option<usize>,

        /// Ranking metric
        #[arg(long)]
        rank_by: Option<RankBy>,

        /// Tie-break metric
        #[arg(long)]
        reward: Option<RankBy>,

        /// Ranking strategy (raw, calibrated, blend)
        #[arg(long)]
        rank_strategy: Option<String>,

        /// Calibration name
        #[arg(long)]
        calibration: Option<String>,

        /// Inline override ranking (comma-separated model ids)
        #[arg(long)]
        custom_ranking: Option<String>,

        /// Drop gene-list derived models
        #[arg(long)]
        exclude_gene_lists: bool,

        /// Keep only model ids containing this substring
        #[arg(long)]
        model_name: Option<String>,

        /// Write all three outputs into this directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Write the run summary as JSON
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },

    /// List registered calibrations and significance tests
    Calibrations,

    /// Show statistics of a results file
    Inspect {
        /// Tab-delimited results file
        #[arg(long)]
        results: PathBuf,
    },

    /// Print the normalized form of a condition value
    Normalize {
        /// Condition column
        #[arg(long)]
        column: String,

        /// Raw value
        value: String,
    },
}

/// CLI overrides applied on top of the YAML configuration
struct SelectOverrides {
    k: Option<usize>,
    rank_by: Option<RankBy>,
    reward: Option<RankBy>,
    rank_strategy: Option<String>,
    calibration: Option<String>,
    custom_ranking: Option<String>,
    exclude_gene_lists: bool,
    model_name: Option<String>,
    output_dir: Option<PathBuf>,
}

impl SelectOverrides {
    fn apply(self, context: &mut SelectionContext) {
        if let Some(k) = self.k {
            context.k = k;
        }
        if let Some(metric) = self.rank_by {
            context.rank_by = metric;
        }
        if let Some(metric) = self.reward {
            context.reward_performance = metric;
        }
        if self.rank_strategy.is_some() {
            context.rank_strategy = self.rank_strategy;
        }
        if self.calibration.is_some() {
            context.calibration = self.calibration;
        }
        if self.custom_ranking.is_some() {
            context.custom_ranking = self.custom_ranking;
        }
        if self.exclude_gene_lists {
            context.exclude_gene_lists = true;
        }
        if self.model_name.is_some() {
            context.model_name = self.model_name;
        }
        if let Some(dir) = self.output_dir {
            context.outputs = OutputTargets::in_dir(dir);
        }
    }
}

fn select(config: &Path, overrides: SelectOverrides, summary_json: Option<PathBuf>) -> anyhow::Result<()> {
    let mut context = SelectionContext::load(config)
        .with_context(|| format!("Failed to load configuration {}", config.display()))?;
    overrides.apply(&mut context);

    let summary = SelectionDriver::new(context).run()?;
    print!("{}", summary.to_text());

    if let Some(path) = summary_json {
        summary
            .write_json(&path)
            .with_context(|| format!("Failed to write summary {}", path.display()))?;
        tracing::info!(path = %path.display(), "Wrote JSON summary");
    }
    Ok(())
}

fn list_calibrations() {
    println!("Calibrations");
    println!("============");
    for (name, description) in CalibrationRegistry::describe() {
        println!("  {name:<18} {description}");
    }
    println!();
    println!("Significance tests");
    println!("==================");
    for (name, description) in SIGNIFICANCE_TESTS {
        println!("  {name:<18} {description}");
    }
}

fn inspect(results: &Path) -> anyhow::Result<()> {
    let repository = PerformanceRepository::load(results)?;
    let stats = repository.stats();
    println!("Results Statistics");
    println!("==================");
    println!("Path: {}", results.display());
    println!("Rows loaded: {}", stats.rows_loaded);
    println!("Rows skipped: {}", stats.rows_skipped);
    println!("Dataset/endpoints: {}", stats.keys);
    let total: usize = repository
        .all_keys()
        .map(|key| repository.candidates_for(&key.dataset, &key.endpoint).len())
        .sum();
    println!("Candidates: {total}");
    println!();
    for key in repository.all_keys() {
        let candidates = repository.candidates_for(&key.dataset, &key.endpoint);
        println!("  - {key}: {} candidates", candidates.len());
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Select {
            config,
            k,
            rank_by,
            reward,
            rank_strategy,
            calibration,
            custom_ranking,
            exclude_gene_lists,
            model_name,
            output_dir,
            summary_json,
        } => {
            tracing::info!(config = %config.display(), "Running model selection");
            let overrides = SelectOverrides {
                k,
                rank_by,
                reward,
                rank_strategy,
                calibration,
                custom_ranking,
                exclude_gene_lists,
                model_name,
                output_dir,
            };
            select(&config, overrides, summary_json)
        }
        Commands::Calibrations => {
            list_calibrations();
            Ok(())
        }
        Commands::Inspect { results } => inspect(&results),
        Commands::Normalize { column, value } => {
            match normalize(&column, Some(&value)) {
                Some(normalized) => println!("{normalized}"),
                None => println!("NA"),
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
