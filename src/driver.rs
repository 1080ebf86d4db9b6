//! Selection run orchestration.
//!
//! Loads the input stores once, ranks every matching dataset/endpoint in
//! sorted order and streams the results to the three output writers.

use crate::conditions::{ConditionError, ModelConditionStore};
use crate::config::{ConfigError, SelectionContext};
use crate::custom_ranking::{CustomRankingError, CustomRankingOverride};
use crate::metrics::bonferroni_correction;
use crate::performance::{DatasetEndpoint, HeldOutScores, PerformanceError, PerformanceRepository};
use crate::ranking::{RankingEngine, Selection};
use crate::report::{PairComparison, ReportError, SelectionSummary, SelectionWriters, SummaryMetadata};
use crate::significance::{self, SignificanceTest, SIGNIFICANCE_TESTS};
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a selection run
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Missing {what} file: {}", path.display())]
    MissingInput { what: &'static str, path: PathBuf },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Performance data error: {0}")]
    Performance(#[from] PerformanceError),

    #[error("Condition table error: {0}")]
    Conditions(#[from] ConditionError),

    #[error("Custom ranking error: {0}")]
    CustomRanking(#[from] CustomRankingError),

    #[error("Output error: {0}")]
    Report(#[from] ReportError),
}

/// Compare the top-ranked model against every runner-up on held-out samples
///
/// Significance uses a Bonferroni-corrected `alpha` over the number of
/// comparisons. Models without held-out samples yield an undefined result.
#[must_use]
pub fn compare_top(
    selection: &Selection,
    held_out: &HeldOutScores,
    test: &dyn SignificanceTest,
    alpha: f64,
) -> Vec<PairComparison> {
    let Some((top, runners_up)) = selection.ranked.split_first() else {
        return Vec::new();
    };
    let key = &selection.key;
    let corrected = bonferroni_correction(alpha, runners_up.len());
    let samples = |model_id: &str| held_out.samples_for(&key.dataset, &key.endpoint, model_id);

    runners_up
        .iter()
        .map(|runner_up| {
            let result = samples(top.model_id.as_str())
                .zip(samples(runner_up.model_id.as_str()))
                .and_then(|(a, b)| test.compare(a, b));
            if result.is_none() {
                tracing::debug!(
                    key = %key,
                    model_a = %top.model_id,
                    model_b = %runner_up.model_id,
                    test = test.name(),
                    "Comparison undefined for available samples"
                );
            }
            PairComparison {
                model_a: top.model_id.clone(),
                model_b: runner_up.model_id.clone(),
                test: test.name().to_string(),
                significant: result.as_ref().is_some_and(|r| r.is_significant(corrected)),
                result,
            }
        })
        .collect()
}

/// Runs one selection pass over a configured results file
#[derive(Debug, Clone)]
pub struct SelectionDriver {
    context: SelectionContext,
}

impl SelectionDriver {
    #[must_use]
    pub const fn new(context: SelectionContext) -> Self {
        Self { context }
    }

    /// Driver for a YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or validated.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self, DriverError> {
        Ok(Self::new(SelectionContext::load(path)?))
    }

    /// Active configuration
    #[must_use]
    pub const fn context(&self) -> &SelectionContext {
        &self.context
    }

    /// Every configured input file must exist before anything is written
    fn check_inputs(&self) -> Result<(), DriverError> {
        let ctx = &self.context;
        let inputs = [
            ("results", Some(&ctx.results_file)),
            ("test", ctx.test_file.as_ref()),
            ("conditions", ctx.conditions_file.as_ref()),
            ("custom ranking", ctx.model_id_map_file.as_ref()),
        ];
        for (what, path) in inputs {
            if let Some(path) = path.filter(|p| !p.exists()) {
                return Err(DriverError::MissingInput {
                    what,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    fn load_overrides(&self) -> Result<CustomRankingOverride, DriverError> {
        let mut overrides = CustomRankingOverride::new();
        if let Some(path) = &self.context.model_id_map_file {
            overrides = overrides.with_records(CustomRankingOverride::load_table(path)?);
        }
        if let Some(list) = &self.context.custom_ranking {
            overrides = overrides.with_inline(list);
        }
        Ok(overrides)
    }

    /// Significance test to run, if both a test file and a known test are configured
    fn resolve_significance(&self) -> Option<Box<dyn SignificanceTest>> {
        let ctx = &self.context;
        let name = ctx.significance_test.as_deref()?;
        if ctx.test_file.is_none() {
            tracing::warn!(test = name, "Significance test configured without a test file, skipping p-values");
            return None;
        }
        let test = significance::resolve(name, ctx.permutations, ctx.seed);
        if test.is_none() {
            let known: Vec<&str> = SIGNIFICANCE_TESTS.iter().map(|(n, _)| *n).collect();
            tracing::warn!(test = name, known = ?known, "Unknown significance test, skipping p-values");
        }
        test
    }

    /// Run the selection and write all outputs
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, an input file is
    /// missing or unreadable, or an output cannot be written. Malformed rows
    /// and empty rankings are logged and never abort the run.
    pub fn run(&self) -> Result<SelectionSummary, DriverError> {
        let ctx = &self.context;
        ctx.validate()?;
        self.check_inputs()?;

        let repository = PerformanceRepository::load(&ctx.results_file)?;
        let held_out = ctx.test_file.as_ref().map(HeldOutScores::load).transpose()?;
        let conditions = match &ctx.conditions_file {
            Some(path) => ModelConditionStore::load(path)?,
            None => ModelConditionStore::new(),
        };
        let overrides = self.load_overrides()?;

        let engine = RankingEngine::from_context(ctx, &repository, &conditions, &overrides);
        let test = self.resolve_significance();

        let mut writers = SelectionWriters::create(&ctx.outputs)?;
        let mut summary = SelectionSummary::new(SummaryMetadata {
            title: "Biomarker model selection".to_string(),
            generated_at: Utc::now(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            rank_by: ctx.rank_by.to_string(),
            reward_performance: ctx.reward_performance.to_string(),
            strategy: engine.strategy().label().to_string(),
            calibration: engine.calibration_name().map(str::to_string),
            significance_test: test.as_ref().map(|t| t.name().to_string()),
            k: ctx.k,
        });

        tracing::info!(
            results = %ctx.results_file.display(),
            k = ctx.k,
            rank_by = %ctx.rank_by,
            strategy = engine.strategy().label(),
            calibration = engine.calibration_name().unwrap_or("none"),
            "Starting model selection"
        );

        let keys: Vec<DatasetEndpoint> = repository
            .all_keys()
            .filter(|key| ctx.accepts_key(&key.dataset, &key.endpoint))
            .cloned()
            .collect();

        for key in &keys {
            let selection = engine.select(ctx, &key.dataset, &key.endpoint);
            if selection.is_empty() {
                tracing::warn!(
                    dataset = %key.dataset,
                    endpoint = %key.endpoint,
                    excluded_gene_lists = selection.excluded_gene_lists,
                    excluded_by_name = selection.excluded_by_name,
                    "No eligible candidates"
                );
            }
            writers.write_selection(&selection)?;

            let comparisons = match (&held_out, &test) {
                (Some(held_out), Some(test)) => compare_top(&selection, held_out, test.as_ref(), ctx.alpha),
                _ => Vec::new(),
            };
            writers.write_comparisons(key, &comparisons)?;
            summary.record(&selection, &comparisons);
        }

        summary.rows = writers.finish()?;
        tracing::info!(
            pairs = summary.pairs.len(),
            empty = summary.empty_pairs,
            ranked_rows = summary.rows.ranked_rows,
            dump_rows = summary.rows.dump_rows,
            p_value_rows = summary.rows.p_value_rows,
            "Model selection complete"
        );
        Ok(summary)
    }
}
