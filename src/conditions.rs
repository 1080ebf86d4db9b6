//! Per-model condition variables.
//!
//! Conditions describe how a candidate was produced (platform, normalization,
//! input sequence file, ...). Values are normalized on load so that calibration
//! sees one spelling per condition.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Column whose values are reduced to a canonical file name
pub const SEQUENCE_FILE_COLUMN: &str = "sequence-file";

/// Suffix appended to normalized sequence file names
pub const SEQUENCE_FILE_SUFFIX: &str = ".seq";

/// Spellings of a boolean flag value that all collapse to the bare flag name
const FLAG_VALUES: [&str; 12] = [
    "true", "false", "t", "f", "yes", "no", "y", "n", "1", "0", "on", "off",
];

/// Errors that can occur while loading the condition table
#[derive(Error, Debug)]
pub enum ConditionError {
    #[error("Condition table not found: {0}")]
    NotFound(String),

    #[error("Condition table has no header row")]
    MissingHeader,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Normalize a condition value for the given column
///
/// `sequence-file` values lose their directory, any trailing boolean flag
/// assignment (`name=true`, `name=F`, ...) and their extension, and gain the
/// canonical [`SEQUENCE_FILE_SUFFIX`]. Other columns pass through unchanged.
#[must_use]
pub fn normalize(column: &str, value: Option<&str>) -> Option<String> {
    let value = value?;
    if column != SEQUENCE_FILE_COLUMN {
        return Some(value.to_string());
    }

    let base = value.rsplit(['/', '\\']).next().unwrap_or(value);
    let stem = base.rfind('.').map_or(base, |dot| &base[..dot]);
    let stem = strip_flag_value(stem);
    Some(format!("{stem}{SEQUENCE_FILE_SUFFIX}"))
}

/// Strip every trailing `=flag` assignment, so stacked flags collapse in one pass
fn strip_flag_value(mut stem: &str) -> &str {
    while let Some(eq) = stem.rfind('=') {
        let flag = stem[eq + 1..].to_ascii_lowercase();
        if !FLAG_VALUES.contains(&flag.as_str()) {
            break;
        }
        stem = &stem[..eq];
    }
    stem
}

/// Normalized condition table keyed by model id
#[derive(Debug, Clone, Default)]
pub struct ModelConditionStore {
    variables: Vec<String>,
    conditions: BTreeMap<String, BTreeMap<String, String>>,
    skipped_rows: usize,
}

impl ModelConditionStore {
    /// Create an empty store (no conditions known for any model)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a tab-delimited condition table
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or has no header.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConditionError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConditionError::NotFound(path.display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        let store = Self::from_reader(file)?;
        tracing::info!(
            path = %path.display(),
            models = store.len(),
            variables = store.variables.len(),
            skipped = store.skipped_rows,
            "Loaded model conditions"
        );
        Ok(store)
    }

    /// Parse a tab-delimited condition table from a reader
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be read.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConditionError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        if headers.len() < 2 {
            return Err(ConditionError::MissingHeader);
        }
        let variables: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut store = Self {
            variables,
            ..Self::default()
        };

        for (index, result) in reader.records().enumerate() {
            let line = index + 2;
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(line, error = %e, "Skipping unreadable condition row");
                    store.skipped_rows += 1;
                    continue;
                }
            };

            let model_id = record.get(0).map(str::trim).unwrap_or_default();
            if model_id.is_empty() || record.len() != headers.len() {
                tracing::warn!(
                    line,
                    model_id,
                    fields = record.len(),
                    expected = headers.len(),
                    raw = ?record,
                    "Skipping malformed condition row"
                );
                store.skipped_rows += 1;
                continue;
            }
            if store.conditions.contains_key(model_id) {
                tracing::warn!(line, model_id, "Duplicate model in condition table, keeping first");
                store.skipped_rows += 1;
                continue;
            }

            let values = store
                .variables
                .iter()
                .zip(record.iter().skip(1))
                .filter(|(_, value)| !value.is_empty())
                .filter_map(|(variable, value)| {
                    normalize(variable, Some(value)).map(|v| (variable.clone(), v))
                })
                .collect();
            store.conditions.insert(model_id.to_string(), values);
        }

        Ok(store)
    }

    /// All normalized conditions of a model
    #[must_use]
    pub fn conditions_for(&self, model_id: &str) -> Option<&BTreeMap<String, String>> {
        self.conditions.get(model_id)
    }

    /// A single normalized condition value
    #[must_use]
    pub fn condition(&self, model_id: &str, variable: &str) -> Option<&str> {
        self.conditions
            .get(model_id)
            .and_then(|c| c.get(variable))
            .map(String::as_str)
    }

    /// Condition variable names in table order
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Number of rows dropped while loading
    #[must_use]
    pub const fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Number of models with conditions
    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Check if no conditions are loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
