//! Cross-validation results and held-out test scores.
//!
//! Results are grouped by (dataset, endpoint). Malformed rows never abort a
//! load: they are logged with enough context to reproduce and then skipped.

use crate::config::RankBy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while loading performance files
#[derive(Error, Debug)]
pub enum PerformanceError {
    #[error("Results file not found: {0}")]
    NotFound(String),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Two-part experiment key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetEndpoint {
    /// Data cohort
    pub dataset: String,
    /// Clinical outcome
    pub endpoint: String,
}

impl DatasetEndpoint {
    #[must_use]
    pub fn new(dataset: &str, endpoint: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

impl std::fmt::Display for DatasetEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.dataset, self.endpoint)
    }
}

/// One trained candidate classifier evaluated on a dataset/endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateModel {
    /// Model identifier, unique within its dataset/endpoint
    pub model_id: String,
    /// Data cohort
    pub dataset: String,
    /// Clinical outcome
    pub endpoint: String,
    /// Cross-validation performance per metric
    pub raw_metrics: BTreeMap<RankBy, f64>,
    /// Model-specific numeric covariates
    pub attributes: BTreeMap<String, f64>,
}

impl CandidateModel {
    /// Raw value of a metric, if reported
    #[must_use]
    pub fn metric(&self, metric: RankBy) -> Option<f64> {
        self.raw_metrics.get(&metric).copied()
    }
}

/// Load statistics for a performance file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Rows accepted
    pub rows_loaded: usize,
    /// Rows rejected as malformed
    pub rows_skipped: usize,
    /// Distinct dataset/endpoint keys
    pub keys: usize,
}

fn is_missing_marker(value: &str) -> bool {
    value.is_empty() || matches!(value.to_ascii_lowercase().as_str(), "na" | "nan" | "null" | "-")
}

fn key_column(headers: &csv::StringRecord, names: &[&str]) -> Result<usize, PerformanceError> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        .ok_or_else(|| PerformanceError::MissingColumn(names[0].to_string()))
}

fn tab_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(reader)
}

/// Indices of the three key columns
struct KeyColumns {
    dataset: usize,
    endpoint: usize,
    model: usize,
}

impl KeyColumns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, PerformanceError> {
        Ok(Self {
            dataset: key_column(headers, &["dataset", "datasetName"])?,
            endpoint: key_column(headers, &["endpoint", "endpointCode"])?,
            model: key_column(headers, &["model_id", "modelId", "model"])?,
        })
    }

    fn contains(&self, index: usize) -> bool {
        index == self.dataset || index == self.endpoint || index == self.model
    }

    fn read<'r>(&self, record: &'r csv::StringRecord) -> Option<(&'r str, &'r str, &'r str)> {
        let field = |i: usize| record.get(i).map(str::trim).filter(|v| !v.is_empty());
        Some((field(self.dataset)?, field(self.endpoint)?, field(self.model)?))
    }
}

/// Value column of the results file
enum ValueColumn {
    Metric(RankBy),
    Attribute(String),
}

/// Cross-validation results grouped by dataset/endpoint
#[derive(Debug, Clone, Default)]
pub struct PerformanceRepository {
    candidates: BTreeMap<DatasetEndpoint, Vec<CandidateModel>>,
    stats: LoadStats,
}

impl PerformanceRepository {
    /// Load a tab-delimited results file
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or lacks the key columns.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PerformanceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PerformanceError::NotFound(path.display().to_string()));
        }
        let repository = Self::from_reader(std::fs::File::open(path)?)?;
        tracing::info!(
            path = %path.display(),
            keys = repository.stats.keys,
            rows = repository.stats.rows_loaded,
            skipped = repository.stats.rows_skipped,
            "Loaded performance results"
        );
        Ok(repository)
    }

    /// Parse a tab-delimited results table from a reader
    ///
    /// # Errors
    ///
    /// Returns an error if the header is unreadable or lacks the key columns.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PerformanceError> {
        let mut reader = tab_reader(reader);
        let headers = reader.headers()?.clone();
        let keys = KeyColumns::locate(&headers)?;

        let columns: Vec<(usize, ValueColumn)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !keys.contains(*i))
            .map(|(i, name)| {
                let column = RankBy::from_str(name)
                    .map_or_else(|_| ValueColumn::Attribute(name.trim().to_string()), ValueColumn::Metric);
                (i, column)
            })
            .collect();

        let mut repository = Self::default();
        let mut seen: HashSet<(DatasetEndpoint, String)> = HashSet::new();

        for (index, result) in reader.records().enumerate() {
            let line = index + 2;
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(line, error = %e, "Skipping unreadable results row");
                    repository.stats.rows_skipped += 1;
                    continue;
                }
            };

            let Some((dataset, endpoint, model_id)) = keys.read(&record) else {
                tracing::warn!(line, raw = ?record, "Skipping results row with missing key fields");
                repository.stats.rows_skipped += 1;
                continue;
            };

            match parse_values(&record, &columns) {
                Ok((raw_metrics, attributes)) => {
                    let key = DatasetEndpoint::new(dataset, endpoint);
                    if !seen.insert((key.clone(), model_id.to_string())) {
                        tracing::warn!(
                            line,
                            dataset,
                            endpoint,
                            model_id,
                            "Duplicate model id for dataset/endpoint, keeping first"
                        );
                        repository.stats.rows_skipped += 1;
                        continue;
                    }
                    repository.candidates.entry(key).or_default().push(CandidateModel {
                        model_id: model_id.to_string(),
                        dataset: dataset.to_string(),
                        endpoint: endpoint.to_string(),
                        raw_metrics,
                        attributes,
                    });
                    repository.stats.rows_loaded += 1;
                }
                Err(column) => {
                    tracing::warn!(
                        line,
                        dataset,
                        endpoint,
                        model_id,
                        column = %column,
                        raw = ?record,
                        "Skipping results row with unparseable numeric value"
                    );
                    repository.stats.rows_skipped += 1;
                }
            }
        }

        repository.stats.keys = repository.candidates.len();
        Ok(repository)
    }

    /// Candidates for one dataset/endpoint (empty if none)
    #[must_use]
    pub fn candidates_for(&self, dataset: &str, endpoint: &str) -> &[CandidateModel] {
        self.candidates
            .get(&DatasetEndpoint::new(dataset, endpoint))
            .map_or(&[], Vec::as_slice)
    }

    /// All dataset/endpoint keys in sorted order
    pub fn all_keys(&self) -> impl Iterator<Item = &DatasetEndpoint> {
        self.candidates.keys()
    }

    /// Load statistics
    #[must_use]
    pub const fn stats(&self) -> &LoadStats {
        &self.stats
    }

    /// Number of dataset/endpoint keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Check if no results are loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

type ParsedValues = (BTreeMap<RankBy, f64>, BTreeMap<String, f64>);

/// Parse metric and attribute cells, returning the offending column on failure
fn parse_values(record: &csv::StringRecord, columns: &[(usize, ValueColumn)]) -> Result<ParsedValues, String> {
    let mut metrics = BTreeMap::new();
    let mut attributes = BTreeMap::new();

    for (index, column) in columns {
        let cell = record.get(*index).map_or("", str::trim);
        if is_missing_marker(cell) {
            continue;
        }
        let name = match column {
            ValueColumn::Metric(metric) => metric.column().to_string(),
            ValueColumn::Attribute(name) => name.clone(),
        };
        let value: f64 = cell.parse().map_err(|_| name.clone())?;
        if !value.is_finite() {
            return Err(name);
        }
        match column {
            ValueColumn::Metric(metric) => {
                metrics.insert(*metric, value);
            }
            ValueColumn::Attribute(name) => {
                attributes.insert(name.clone(), value);
            }
        }
    }

    Ok((metrics, attributes))
}

/// One held-out test observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldOutSample {
    /// Test sample identifier (used for pairing)
    pub sample_id: String,
    /// Per-sample score
    pub score: f64,
}

/// Held-out test scores keyed by dataset/endpoint and model
#[derive(Debug, Clone, Default)]
pub struct HeldOutScores {
    samples: BTreeMap<(DatasetEndpoint, String), Vec<HeldOutSample>>,
    stats: LoadStats,
}

impl HeldOutScores {
    /// Load a tab-delimited held-out score file
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or lacks required columns.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PerformanceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PerformanceError::NotFound(path.display().to_string()));
        }
        let scores = Self::from_reader(std::fs::File::open(path)?)?;
        tracing::info!(
            path = %path.display(),
            models = scores.samples.len(),
            rows = scores.stats.rows_loaded,
            skipped = scores.stats.rows_skipped,
            "Loaded held-out test scores"
        );
        Ok(scores)
    }

    /// Parse held-out scores from a reader
    ///
    /// # Errors
    ///
    /// Returns an error if the header is unreadable or lacks required columns.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PerformanceError> {
        let mut reader = tab_reader(reader);
        let headers = reader.headers()?.clone();
        let keys = KeyColumns::locate(&headers)?;
        let sample_col = key_column(&headers, &["sample_id", "sampleId", "sample"])?;
        let score_col = key_column(&headers, &["score", "value"])?;

        let mut scores = Self::default();
        let mut seen: HashSet<(DatasetEndpoint, String, String)> = HashSet::new();

        for (index, result) in reader.records().enumerate() {
            let line = index + 2;
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(line, error = %e, "Skipping unreadable held-out row");
                    scores.stats.rows_skipped += 1;
                    continue;
                }
            };
            let parsed = keys.read(&record).and_then(|(dataset, endpoint, model_id)| {
                let sample_id = record.get(sample_col).map(str::trim).filter(|s| !s.is_empty())?;
                let score = record
                    .get(score_col)
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .filter(|s| s.is_finite())?;
                Some((DatasetEndpoint::new(dataset, endpoint), model_id, sample_id, score))
            });
            let Some((key, model_id, sample_id, score)) = parsed else {
                tracing::warn!(line, raw = ?record, "Skipping malformed held-out row");
                scores.stats.rows_skipped += 1;
                continue;
            };
            // First score of a sample wins, so pairing stays one-to-one
            if !seen.insert((key.clone(), model_id.to_string(), sample_id.to_string())) {
                tracing::warn!(line, model_id, sample_id, "Skipping duplicate held-out sample");
                scores.stats.rows_skipped += 1;
                continue;
            }
            scores
                .samples
                .entry((key, model_id.to_string()))
                .or_default()
                .push(HeldOutSample {
                    sample_id: sample_id.to_string(),
                    score,
                });
            scores.stats.rows_loaded += 1;
        }

        for samples in scores.samples.values_mut() {
            samples.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));
        }
        scores.stats.keys = scores
            .samples
            .keys()
            .map(|(key, _)| key)
            .collect::<HashSet<_>>()
            .len();
        Ok(scores)
    }

    /// Samples of one model, sorted by sample id
    #[must_use]
    pub fn samples_for(&self, dataset: &str, endpoint: &str, model_id: &str) -> Option<&[HeldOutSample]> {
        self.samples
            .get(&(DatasetEndpoint::new(dataset, endpoint), model_id.to_string()))
            .map(Vec::as_slice)
    }

    /// Load statistics
    #[must_use]
    pub const fn stats(&self) -> &LoadStats {
        &self.stats
    }
}
