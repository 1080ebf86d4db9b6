//! Configuration module for selection runs.
//!
//! Handles YAML loading of the [`SelectionContext`] plus the metric and
//! strategy selectors that drive ranking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    #[error("Unknown ranking strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Whether larger or smaller values of a metric are better
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// Metric selector used both for ranking and for the reward tie-break
///
/// Deserialization goes through [`FromStr`](std::str::FromStr), so YAML accepts
/// the same spellings as the command line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum RankBy {
    /// Matthews correlation coefficient
    Mcc,
    /// Area under the ROC curve
    Auc,
    /// Fraction of correctly classified samples
    Accuracy,
    /// True positive rate
    Sensitivity,
    /// True negative rate
    Specificity,
    /// Root mean squared error (regression endpoints)
    Rmse,
    /// Misclassification rate
    ErrorRate,
}

impl RankBy {
    /// All known metrics, in column order
    pub const ALL: [Self; 7] = [
        Self::Mcc,
        Self::Auc,
        Self::Accuracy,
        Self::Sensitivity,
        Self::Specificity,
        Self::Rmse,
        Self::ErrorRate,
    ];

    /// Column name used in results files and outputs
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Mcc => "mcc",
            Self::Auc => "auc",
            Self::Accuracy => "accuracy",
            Self::Sensitivity => "sensitivity",
            Self::Specificity => "specificity",
            Self::Rmse => "rmse",
            Self::ErrorRate => "error_rate",
        }
    }

    /// Direction in which this metric improves
    #[must_use]
    pub const fn direction(self) -> MetricDirection {
        match self {
            Self::Rmse | Self::ErrorRate => MetricDirection::LowerIsBetter,
            _ => MetricDirection::HigherIsBetter,
        }
    }
}

impl fmt::Display for RankBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl std::str::FromStr for RankBy {
    type Err = ConfigError;

    /// Parse a metric selector from string
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMetric` if the string doesn't match a known metric.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "mcc" | "matthews" => Ok(Self::Mcc),
            "auc" | "roc_auc" => Ok(Self::Auc),
            "accuracy" | "acc" => Ok(Self::Accuracy),
            "sensitivity" | "sens" => Ok(Self::Sensitivity),
            "specificity" | "spec" => Ok(Self::Specificity),
            "rmse" => Ok(Self::Rmse),
            "error_rate" | "errorrate" | "err" => Ok(Self::ErrorRate),
            _ => Err(ConfigError::InvalidMetric(s.to_string())),
        }
    }
}

impl TryFrom<String> for RankBy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Policy for deriving the effective ranking score of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RankStrategy {
    /// Raw `rank_by` metric, calibration ignored
    Raw,
    /// Calibrated estimate when a calibration is active, raw otherwise
    #[default]
    Calibrated,
    /// Weighted mix of calibrated and raw estimates
    Blend { weight: f64 },
}

impl RankStrategy {
    /// Parse a strategy name, using `blend_weight` for the blend variant
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownStrategy` for unrecognised names.
    pub fn parse(name: &str, blend_weight: f64) -> Result<Self, ConfigError> {
        match name.trim().to_lowercase().as_str() {
            "raw" | "raw_metric" | "raw-metric" => Ok(Self::Raw),
            "calibrated" | "calibrated_metric" | "calibrated-metric" => Ok(Self::Calibrated),
            "blend" => Ok(Self::Blend {
                weight: blend_weight,
            }),
            _ => Err(ConfigError::UnknownStrategy(name.to_string())),
        }
    }

    /// Short label for logs and audit output
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Calibrated => "calibrated",
            Self::Blend { .. } => "blend",
        }
    }
}

/// Output file targets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputTargets {
    /// Ranked list (dataset, endpoint, rank, model, score)
    #[serde(default = "default_ranked_list")]
    pub ranked_list: PathBuf,
    /// Audit dump of every considered candidate
    #[serde(default = "default_dump")]
    pub dump: PathBuf,
    /// Pairwise p-values against the top-ranked model
    #[serde(default = "default_p_values")]
    pub p_values: PathBuf,
}

fn default_ranked_list() -> PathBuf {
    PathBuf::from("ranked.tsv")
}
fn default_dump() -> PathBuf {
    PathBuf::from("dump.tsv")
}
fn default_p_values() -> PathBuf {
    PathBuf::from("pvalues.tsv")
}

impl Default for OutputTargets {
    fn default() -> Self {
        Self {
            ranked_list: default_ranked_list(),
            dump: default_dump(),
            p_values: default_p_values(),
        }
    }
}

impl OutputTargets {
    /// Place all three outputs inside `dir` with their default names
    #[must_use]
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            ranked_list: dir.join(default_ranked_list()),
            dump: dir.join(default_dump()),
            p_values: dir.join(default_p_values()),
        }
    }
}

/// Parameters consumed by the built-in calibrations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationParams {
    /// Per condition variable, ordered (value, bias) pairs
    #[serde(default)]
    pub offsets: BTreeMap<String, Vec<(String, f64)>>,
    /// Shrinkage target
    #[serde(default)]
    pub prior: f64,
    /// Pseudo-sample count of the shrinkage prior
    #[serde(default = "default_strength")]
    pub strength: f64,
    /// Attribute holding the training sample count
    #[serde(default = "default_sample_attribute")]
    pub sample_attribute: String,
    /// Penalty per unit of cross-validation standard deviation
    #[serde(default = "default_sd_coefficient")]
    pub sd_coefficient: f64,
    /// Penalty per log feature count
    #[serde(default)]
    pub feature_coefficient: f64,
    /// Attribute holding the fold standard deviation
    #[serde(default = "default_sd_attribute")]
    pub sd_attribute: String,
    /// Attribute holding the number of features
    #[serde(default = "default_feature_attribute")]
    pub feature_attribute: String,
}

const fn default_strength() -> f64 {
    10.0
}
const fn default_sd_coefficient() -> f64 {
    1.0
}
fn default_sample_attribute() -> String {
    "n_samples".to_string()
}
fn default_sd_attribute() -> String {
    "cv_sd".to_string()
}
fn default_feature_attribute() -> String {
    "n_features".to_string()
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            offsets: BTreeMap::new(),
            prior: 0.0,
            strength: default_strength(),
            sample_attribute: default_sample_attribute(),
            sd_coefficient: default_sd_coefficient(),
            feature_coefficient: 0.0,
            sd_attribute: default_sd_attribute(),
            feature_attribute: default_feature_attribute(),
        }
    }
}

/// Full configuration of one selection run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectionContext {
    /// Cross-validation results file
    pub results_file: PathBuf,
    /// Held-out test scores (enables significance testing)
    #[serde(default, alias = "testFilename")]
    pub test_file: Option<PathBuf>,
    /// Model condition table
    #[serde(default)]
    pub conditions_file: Option<PathBuf>,
    /// Length of the ranked list per dataset/endpoint
    #[serde(default = "default_k")]
    pub k: usize,
    /// Datasets to process (empty = all)
    #[serde(default)]
    pub datasets: Vec<String>,
    /// Endpoints to process (empty = all)
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Only consider model ids containing this substring
    #[serde(default, alias = "modelName")]
    pub model_name: Option<String>,
    /// Ranking strategy name
    #[serde(default, alias = "rankStrategyName")]
    pub rank_strategy: Option<String>,
    /// Metric driving the ranking
    #[serde(default = "default_rank_by", alias = "rankBy")]
    pub rank_by: RankBy,
    /// Metric used as the first tie-break
    #[serde(default = "default_reward", alias = "rewardPerformance")]
    pub reward_performance: RankBy,
    /// Calibration name
    #[serde(default)]
    pub calibration: Option<String>,
    /// Parameters for the built-in calibrations
    #[serde(default)]
    pub calibration_params: CalibrationParams,
    /// Calibrated share of the blend strategy
    #[serde(default = "default_blend_weight")]
    pub blend_weight: f64,
    /// Drop gene-list derived models
    #[serde(default, alias = "excludeGeneLists")]
    pub exclude_gene_lists: bool,
    /// Substrings that mark a model id as gene-list derived
    #[serde(default = "default_gene_list_markers")]
    pub gene_list_markers: Vec<String>,
    /// Inline comma-separated override ranking
    #[serde(default, alias = "customRanking")]
    pub custom_ranking: Option<String>,
    /// Custom ranking table
    #[serde(default, alias = "modelIdMapFile")]
    pub model_id_map_file: Option<PathBuf>,
    /// Significance test name
    #[serde(default)]
    pub significance_test: Option<String>,
    /// Significance threshold before correction
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Random seed for the permutation test
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Resamples for the permutation test
    #[serde(default = "default_permutations")]
    pub permutations: usize,
    /// Output files
    #[serde(default)]
    pub outputs: OutputTargets,
}

const fn default_k() -> usize {
    1
}
const fn default_rank_by() -> RankBy {
    RankBy::Mcc
}
const fn default_reward() -> RankBy {
    RankBy::Auc
}
const fn default_blend_weight() -> f64 {
    0.5
}
const fn default_alpha() -> f64 {
    0.05
}
const fn default_seed() -> u64 {
    42
}
const fn default_permutations() -> usize {
    10_000
}
fn default_gene_list_markers() -> Vec<String> {
    vec!["genelist".to_string(), "gene_list".to_string()]
}

impl SelectionContext {
    /// Create a context with default settings for a results file
    #[must_use]
    pub fn new<P: Into<PathBuf>>(results_file: P) -> Self {
        Self {
            results_file: results_file.into(),
            test_file: None,
            conditions_file: None,
            k: default_k(),
            datasets: Vec::new(),
            endpoints: Vec::new(),
            model_name: None,
            rank_strategy: None,
            rank_by: default_rank_by(),
            reward_performance: default_reward(),
            calibration: None,
            calibration_params: CalibrationParams::default(),
            blend_weight: default_blend_weight(),
            exclude_gene_lists: false,
            gene_list_markers: default_gene_list_markers(),
            custom_ranking: None,
            model_id_map_file: None,
            significance_test: None,
            alpha: default_alpha(),
            seed: default_seed(),
            permutations: default_permutations(),
            outputs: OutputTargets::default(),
        }
    }

    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for out-of-range settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.results_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("results_file".to_string()));
        }
        if self.k == 0 {
            return Err(invalid("k", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.blend_weight) {
            return Err(invalid("blend_weight", "must lie in [0, 1]"));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(invalid("alpha", "must lie in (0, 1)"));
        }
        if self.permutations == 0 {
            return Err(invalid("permutations", "must be at least 1"));
        }
        Ok(())
    }

    /// Resolve the configured strategy name
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownStrategy` for unrecognised names; callers
    /// fall back to [`RankStrategy::default`].
    pub fn strategy(&self) -> Result<RankStrategy, ConfigError> {
        self.rank_strategy.as_deref().map_or_else(
            || Ok(RankStrategy::default()),
            |name| RankStrategy::parse(name, self.blend_weight),
        )
    }

    /// Whether a dataset/endpoint pair passes the configured filters
    #[must_use]
    pub fn accepts_key(&self, dataset: &str, endpoint: &str) -> bool {
        (self.datasets.is_empty() || self.datasets.iter().any(|d| d == dataset))
            && (self.endpoints.is_empty() || self.endpoints.iter().any(|e| e == endpoint))
    }

    /// Whether a model id passes the model-name filter
    #[must_use]
    pub fn accepts_model(&self, model_id: &str) -> bool {
        self.model_name
            .as_deref()
            .map_or(true, |name| model_id.contains(name))
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
