//! # Biomarker Select
//!
//! Candidate model selection for biomarker validation studies.
//!
//! For every dataset × clinical-endpoint combination, the crate ranks trained
//! candidate classifiers by a cross-validation metric, optionally recalibrates
//! each raw estimate with a named calibration, honors user-supplied override
//! rankings, and writes a ranked list, an audit dump and p-value comparisons.
//!
//! ## Architecture
//!
//! ```text
//! results.tsv ─┐
//! conditions ──┼──> input stores (immutable, loaded once)
//! overrides ───┘          │
//!                         ↓
//!            RankingEngine (per dataset/endpoint)
//!               │ override order, or
//!               │ calibrated score → reward → model id
//!                         ↓
//!       ranked list / audit dump / p-values (tab-delimited)
//! ```
//!
//! Identical inputs and configuration always produce byte-identical outputs.

pub mod calibration;
pub mod conditions;
pub mod config;
pub mod custom_ranking;
pub mod driver;
pub mod metrics;
pub mod performance;
pub mod ranking;
pub mod report;
pub mod significance;

pub use calibration::{
    match_value, CalibrationContext, CalibrationError, CalibrationModel, CalibrationOutcome,
    CalibrationRegistry, CALIBRATIONS,
};
pub use conditions::{normalize, ConditionError, ModelConditionStore};
pub use config::{
    CalibrationParams, ConfigError, MetricDirection, OutputTargets, RankBy, RankStrategy,
    SelectionContext,
};
pub use custom_ranking::{CustomRanking, CustomRankingError, CustomRankingOverride};
pub use driver::{compare_top, DriverError, SelectionDriver};
pub use metrics::{bonferroni_correction, paired_t_test, permutation_test, welch_t_test, SignificanceResult};
pub use performance::{
    CandidateModel, DatasetEndpoint, HeldOutSample, HeldOutScores, LoadStats, PerformanceError,
    PerformanceRepository,
};
pub use ranking::{
    GeneListPredicate, MarkerPredicate, RankedEntry, RankingEngine, RankingSource, ScoredCandidate,
    Selection,
};
pub use report::{PairComparison, ReportError, SelectionSummary, SelectionWriters, WriteCounts};
pub use significance::{SignificanceTest, SIGNIFICANCE_TESTS};
