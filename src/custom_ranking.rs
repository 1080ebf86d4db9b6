//! User-supplied override rankings.
//!
//! An override replaces automatic ranking for a dataset/endpoint. Specific
//! records come from a table; an inline comma list applies to every key that
//! has no specific record.

use serde::Serialize;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Ranking type reported for the inline list
pub const INLINE_RANKING_TYPE: &str = "inline";

/// Errors that can occur while loading custom rankings
#[derive(Error, Debug)]
pub enum CustomRankingError {
    #[error("Custom ranking file not found: {0}")]
    NotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One override record; `model_ids[0]` is the best model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomRanking {
    pub dataset_name: String,
    pub endpoint_code: String,
    /// Free-form provenance label
    pub ranking_type: String,
    pub model_ids: Vec<String>,
}

/// Parse an inline comma-separated model id list
#[must_use]
pub fn parse_inline(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Override lookup by dataset/endpoint
#[derive(Debug, Clone, Default)]
pub struct CustomRankingOverride {
    records: Vec<CustomRanking>,
    global: Option<Vec<String>>,
}

impl CustomRankingOverride {
    /// No overrides at all
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override with a global inline list
    #[must_use]
    pub fn with_inline(mut self, list: &str) -> Self {
        let ids = parse_inline(list);
        self.global = if ids.is_empty() { None } else { Some(ids) };
        self
    }

    /// Override with explicit records
    #[must_use]
    pub fn with_records(mut self, records: Vec<CustomRanking>) -> Self {
        self.records = records;
        self
    }

    /// Load the record table from a file
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    pub fn load_table<P: AsRef<Path>>(path: P) -> Result<Vec<CustomRanking>, CustomRankingError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CustomRankingError::NotFound(path.display().to_string()));
        }
        let records = Self::parse_table(std::fs::File::open(path)?)?;
        tracing::info!(path = %path.display(), records = records.len(), "Loaded custom rankings");
        Ok(records)
    }

    /// Parse `datasetName endpointCode rankingType modelId1 modelId2 ...` rows
    ///
    /// # Errors
    ///
    /// Returns an error only on unrecoverable read failures; malformed rows
    /// are skipped.
    pub fn parse_table<R: Read>(reader: R) -> Result<Vec<CustomRanking>, CustomRankingError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut records = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let line = index + 1;
            let record = result?;
            let fields: Vec<&str> = record.iter().map(str::trim).filter(|f| !f.is_empty()).collect();

            if line == 1 && fields.first().is_some_and(|f| f.eq_ignore_ascii_case("datasetName")) {
                continue;
            }
            if fields.len() < 4 {
                tracing::warn!(line, raw = ?record, "Skipping custom ranking row with fewer than four fields");
                continue;
            }

            records.push(CustomRanking {
                dataset_name: fields[0].to_string(),
                endpoint_code: fields[1].to_string(),
                ranking_type: fields[2].to_string(),
                model_ids: fields[3..].iter().map(|id| (*id).to_string()).collect(),
            });
        }
        Ok(records)
    }

    /// The first specific record for a key, if any
    #[must_use]
    pub fn record_for(&self, dataset: &str, endpoint: &str) -> Option<&CustomRanking> {
        self.records
            .iter()
            .find(|r| r.dataset_name == dataset && r.endpoint_code == endpoint)
    }

    /// Ordered model ids overriding automatic ranking, plus their ranking type
    #[must_use]
    pub fn override_for(&self, dataset: &str, endpoint: &str) -> Option<(&str, &[String])> {
        self.record_for(dataset, endpoint)
            .map(|r| (r.ranking_type.as_str(), r.model_ids.as_slice()))
            .or_else(|| {
                self.global
                    .as_deref()
                    .map(|ids| (INLINE_RANKING_TYPE, ids))
            })
    }

    /// Whether any override is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.global.is_none()
    }
}
