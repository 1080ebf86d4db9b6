//! Output writers and run summaries.
//!
//! Three tab-delimited outputs are produced per run:
//! - ranked list (`dataset endpoint rank model_id score`)
//! - audit dump of every considered candidate
//! - pairwise p-values of the top model against each runner-up
//!
//! Every output always carries its header row, even when no data rows follow.

use crate::config::OutputTargets;
use crate::metrics::SignificanceResult;
use crate::performance::DatasetEndpoint;
use crate::ranking::Selection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Write as FmtWrite};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use thiserror::Error;

/// Placeholder written for absent values
pub const MISSING: &str = "NA";

const RANKED_HEADER: [&str; 5] = ["dataset", "endpoint", "rank", "model_id", "score"];
const DUMP_HEADER: [&str; 9] = [
    "dataset",
    "endpoint",
    "model_id",
    "raw_score",
    "calibrated_score",
    "effective_score",
    "calibration_status",
    "selected_rank",
    "ranking_source",
];
const P_VALUE_HEADER: [&str; 8] = [
    "dataset",
    "endpoint",
    "model_a",
    "model_b",
    "test",
    "n",
    "p_value",
    "significant",
];

/// Errors that can occur while writing outputs
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to create output {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn or_missing<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| MISSING.to_string(), |v| v.to_string())
}

#[derive(Serialize)]
struct RankedRow<'a> {
    dataset: &'a str,
    endpoint: &'a str,
    rank: usize,
    model_id: &'a str,
    score: String,
}

#[derive(Serialize)]
struct DumpRow<'a> {
    dataset: &'a str,
    endpoint: &'a str,
    model_id: &'a str,
    raw_score: String,
    calibrated_score: String,
    effective_score: String,
    calibration_status: &'a str,
    selected_rank: String,
    ranking_source: &'a str,
}

#[derive(Serialize)]
struct PValueRow<'a> {
    dataset: &'a str,
    endpoint: &'a str,
    model_a: &'a str,
    model_b: &'a str,
    test: &'a str,
    n: String,
    p_value: String,
    significant: bool,
}

/// Comparison of the top-ranked model against one runner-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairComparison {
    /// Top-ranked model
    pub model_a: String,
    /// Runner-up
    pub model_b: String,
    /// Registered test name
    pub test: String,
    /// `None` when the test is undefined for the available samples
    pub result: Option<SignificanceResult>,
    /// Significant after multiple-comparison correction
    pub significant: bool,
}

/// Rows written to each output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCounts {
    pub ranked_rows: usize,
    pub dump_rows: usize,
    pub p_value_rows: usize,
}

fn tab_writer<W: Write>(inner: W, header: &[&str]) -> Result<csv::Writer<W>, ReportError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(inner);
    writer.write_record(header)?;
    Ok(writer)
}

fn create_file(path: &Path) -> Result<BufWriter<File>, ReportError> {
    let create = || -> std::io::Result<File> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        File::create(path)
    };
    create().map(BufWriter::new).map_err(|source| ReportError::Create {
        path: path.to_path_buf(),
        source,
    })
}

/// The three sequential output sinks of a selection run
pub struct SelectionWriters<W: Write = BufWriter<File>> {
    ranked: csv::Writer<W>,
    dump: csv::Writer<W>,
    p_values: csv::Writer<W>,
    counts: WriteCounts,
}

impl SelectionWriters<BufWriter<File>> {
    /// Create (truncating) the configured output files
    ///
    /// # Errors
    ///
    /// Returns an error if any file or its parent directory cannot be created.
    pub fn create(targets: &OutputTargets) -> Result<Self, ReportError> {
        let writers = Self::from_writers(
            create_file(&targets.ranked_list)?,
            create_file(&targets.dump)?,
            create_file(&targets.p_values)?,
        )?;
        tracing::debug!(
            ranked = %targets.ranked_list.display(),
            dump = %targets.dump.display(),
            p_values = %targets.p_values.display(),
            "Opened output files"
        );
        Ok(writers)
    }
}

impl<W: Write> SelectionWriters<W> {
    /// Wrap arbitrary sinks, writing the header rows
    ///
    /// # Errors
    ///
    /// Returns an error if a header row cannot be written.
    pub fn from_writers(ranked: W, dump: W, p_values: W) -> Result<Self, ReportError> {
        Ok(Self {
            ranked: tab_writer(ranked, &RANKED_HEADER)?,
            dump: tab_writer(dump, &DUMP_HEADER)?,
            p_values: tab_writer(p_values, &P_VALUE_HEADER)?,
            counts: WriteCounts::default(),
        })
    }

    /// Append the ranked rows and dump rows of one selection
    ///
    /// # Errors
    ///
    /// Returns an error if a row cannot be written.
    pub fn write_selection(&mut self, selection: &Selection) -> Result<(), ReportError> {
        let DatasetEndpoint { dataset, endpoint } = &selection.key;

        for entry in &selection.ranked {
            self.ranked.serialize(RankedRow {
                dataset,
                endpoint,
                rank: entry.rank,
                model_id: &entry.model_id,
                score: or_missing(entry.score),
            })?;
            self.counts.ranked_rows += 1;
        }

        let source = selection.source.label();
        for candidate in &selection.considered {
            self.dump.serialize(DumpRow {
                dataset,
                endpoint,
                model_id: &candidate.model_id,
                raw_score: or_missing(candidate.raw),
                calibrated_score: or_missing(candidate.calibration.value()),
                effective_score: or_missing(candidate.effective),
                calibration_status: candidate.status(),
                selected_rank: or_missing(candidate.selected_rank),
                ranking_source: &source,
            })?;
            self.counts.dump_rows += 1;
        }
        Ok(())
    }

    /// Append p-value rows for one dataset/endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if a row cannot be written.
    pub fn write_comparisons(
        &mut self,
        key: &DatasetEndpoint,
        comparisons: &[PairComparison],
    ) -> Result<(), ReportError> {
        for comparison in comparisons {
            self.p_values.serialize(PValueRow {
                dataset: &key.dataset,
                endpoint: &key.endpoint,
                model_a: &comparison.model_a,
                model_b: &comparison.model_b,
                test: &comparison.test,
                n: or_missing(comparison.result.as_ref().map(|r| r.n)),
                p_value: or_missing(comparison.result.as_ref().map(|r| r.p_value)),
                significant: comparison.significant,
            })?;
            self.counts.p_value_rows += 1;
        }
        Ok(())
    }

    /// Rows written so far
    #[must_use]
    pub const fn counts(&self) -> WriteCounts {
        self.counts
    }

    /// Flush every output
    ///
    /// # Errors
    ///
    /// Returns an error if buffered rows cannot be flushed.
    pub fn finish(mut self) -> Result<WriteCounts, ReportError> {
        self.ranked.flush()?;
        self.dump.flush()?;
        self.p_values.flush()?;
        Ok(self.counts)
    }

    /// Flush and hand back the underlying sinks (ranked, dump, p-values)
    ///
    /// # Errors
    ///
    /// Returns an error if buffered rows cannot be flushed.
    pub fn into_inner(self) -> Result<(W, W, W), ReportError> {
        let release = |writer: csv::Writer<W>| writer.into_inner().map_err(|e| ReportError::IoError(e.into_error()));
        Ok((release(self.ranked)?, release(self.dump)?, release(self.p_values)?))
    }
}

/// Run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryMetadata {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub framework_version: String,
    pub rank_by: String,
    pub reward_performance: String,
    pub strategy: String,
    /// Active calibration, after degrading unknown names
    pub calibration: Option<String>,
    /// Active significance test, after degrading unknown names
    pub significance_test: Option<String>,
    pub k: usize,
}

/// Outcome for one dataset/endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSummary {
    pub dataset: String,
    pub endpoint: String,
    /// Candidates that passed the exclusion filters
    pub candidates: usize,
    pub selected: usize,
    pub top_model: Option<String>,
    pub top_score: Option<f64>,
    pub source: String,
    pub excluded_gene_lists: usize,
    pub excluded_by_name: usize,
    /// Runner-ups significantly worse than the top model
    pub significant_comparisons: usize,
}

/// Summary of a whole selection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub metadata: SummaryMetadata,
    pub pairs: Vec<PairSummary>,
    /// Dataset/endpoints that produced no ranking
    pub empty_pairs: usize,
    pub rows: WriteCounts,
}

#[derive(Tabled)]
struct PairTableRow {
    #[tabled(rename = "Dataset")]
    dataset: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Candidates")]
    candidates: usize,
    #[tabled(rename = "Selected")]
    selected: usize,
    #[tabled(rename = "Top Model")]
    top_model: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Source")]
    source: String,
}

impl SelectionSummary {
    /// Summary with no recorded pairs yet
    #[must_use]
    pub fn new(metadata: SummaryMetadata) -> Self {
        Self {
            metadata,
            pairs: Vec::new(),
            empty_pairs: 0,
            rows: WriteCounts::default(),
        }
    }

    /// Record one selection and its comparisons
    pub fn record(&mut self, selection: &Selection, comparisons: &[PairComparison]) {
        if selection.is_empty() {
            self.empty_pairs += 1;
        }
        let top = selection.ranked.first();
        self.pairs.push(PairSummary {
            dataset: selection.key.dataset.clone(),
            endpoint: selection.key.endpoint.clone(),
            candidates: selection.considered.len(),
            selected: selection.ranked.len(),
            top_model: top.map(|e| e.model_id.clone()),
            top_score: top.and_then(|e| e.score),
            source: selection.source.label(),
            excluded_gene_lists: selection.excluded_gene_lists,
            excluded_by_name: selection.excluded_by_name,
            significant_comparisons: comparisons.iter().filter(|c| c.significant).count(),
        });
    }

    /// Serialize as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write pretty JSON to `path`
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ReportError> {
        let mut file = create_file(path.as_ref())?;
        file.write_all(self.to_json()?.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Render as plain text with a per-pair table
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        let meta = &self.metadata;

        writeln!(output, "{}", meta.title).ok();
        writeln!(output, "{}", "=".repeat(meta.title.len())).ok();
        writeln!(output, "  Rank by:      {} (reward: {})", meta.rank_by, meta.reward_performance).ok();
        writeln!(output, "  Strategy:     {}", meta.strategy).ok();
        writeln!(
            output,
            "  Calibration:  {}",
            meta.calibration.as_deref().unwrap_or("none")
        )
        .ok();
        writeln!(
            output,
            "  Significance: {}",
            meta.significance_test.as_deref().unwrap_or("disabled")
        )
        .ok();
        writeln!(output, "  Top k:        {}", meta.k).ok();
        writeln!(output).ok();

        if self.pairs.is_empty() {
            writeln!(output, "No dataset/endpoint pairs matched.").ok();
        } else {
            let rows: Vec<PairTableRow> = self
                .pairs
                .iter()
                .map(|p| PairTableRow {
                    dataset: p.dataset.clone(),
                    endpoint: p.endpoint.clone(),
                    candidates: p.candidates,
                    selected: p.selected,
                    top_model: p.top_model.clone().unwrap_or_else(|| "-".to_string()),
                    score: p.top_score.map_or_else(|| "-".to_string(), |s| format!("{s:.4}")),
                    source: p.source.clone(),
                })
                .collect();
            writeln!(output, "{}", Table::new(rows)).ok();
        }
        writeln!(output).ok();

        writeln!(
            output,
            "Pairs: {} ({} empty)  Rows: ranked={} dump={} p-values={}",
            self.pairs.len(),
            self.empty_pairs,
            self.rows.ranked_rows,
            self.rows.dump_rows,
            self.rows.p_value_rows
        )
        .ok();
        output
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationError, CalibrationOutcome};
    use crate::ranking::{RankedEntry, RankingSource, ScoredCandidate};

    fn selection() -> Selection {
        Selection {
            key: DatasetEndpoint::new("DS1", "EP1"),
            ranked: vec![RankedEntry {
                rank: 1,
                model_id: "m2".to_string(),
                score: Some(0.85),
            }],
            considered: vec![
                ScoredCandidate {
                    model_id: "m1".to_string(),
                    raw: Some(0.8),
                    reward: None,
                    calibration: CalibrationOutcome::Failed(CalibrationError::MissingValue {
                        model_id: "m1".to_string(),
                        what: "n_samples".to_string(),
                    }),
                    effective: Some(0.8),
                    selected_rank: None,
                },
                ScoredCandidate {
                    model_id: "m2".to_string(),
                    raw: Some(0.9),
                    reward: Some(0.7),
                    calibration: CalibrationOutcome::Calibrated(0.85),
                    effective: Some(0.85),
                    selected_rank: Some(1),
                },
            ],
            source: RankingSource::Automatic,
            excluded_gene_lists: 0,
            excluded_by_name: 0,
        }
    }

    fn metadata() -> SummaryMetadata {
        SummaryMetadata {
            title: "Model selection".to_string(),
            generated_at: Utc::now(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            rank_by: "mcc".to_string(),
            reward_performance: "auc".to_string(),
            strategy: "calibrated".to_string(),
            calibration: Some("shrinkage".to_string()),
            significance_test: None,
            k: 1,
        }
    }

    fn written(writers: SelectionWriters<Vec<u8>>) -> (String, String, String) {
        let (ranked, dump, p_values) = writers.into_inner().unwrap();
        (
            String::from_utf8(ranked).unwrap(),
            String::from_utf8(dump).unwrap(),
            String::from_utf8(p_values).unwrap(),
        )
    }

    #[test]
    fn test_headers_always_written() {
        let writers = SelectionWriters::from_writers(Vec::new(), Vec::new(), Vec::new()).unwrap();
        let (ranked, dump, p_values) = written(writers);
        assert_eq!(ranked, "dataset\tendpoint\trank\tmodel_id\tscore\n");
        assert!(dump.starts_with("dataset\tendpoint\tmodel_id\traw_score"));
        assert_eq!(p_values.lines().count(), 1);
    }

    #[test]
    fn test_write_selection_rows() {
        let mut writers = SelectionWriters::from_writers(Vec::new(), Vec::new(), Vec::new()).unwrap();
        writers.write_selection(&selection()).unwrap();
        assert_eq!(
            writers.counts(),
            WriteCounts {
                ranked_rows: 1,
                dump_rows: 2,
                p_value_rows: 0
            }
        );

        let (ranked, dump, _) = written(writers);
        assert_eq!(ranked.lines().nth(1).unwrap(), "DS1\tEP1\t1\tm2\t0.85");
        let dump_lines: Vec<&str> = dump.lines().collect();
        assert_eq!(dump_lines[1], "DS1\tEP1\tm1\t0.8\tNA\t0.8\tmissing-value\tNA\tautomatic");
        assert_eq!(dump_lines[2], "DS1\tEP1\tm2\t0.9\t0.85\t0.85\tcalibrated\t1\tautomatic");
    }

    #[test]
    fn test_write_comparisons_undefined_is_na() {
        let mut writers = SelectionWriters::from_writers(Vec::new(), Vec::new(), Vec::new()).unwrap();
        let key = DatasetEndpoint::new("DS1", "EP1");
        writers
            .write_comparisons(
                &key,
                &[PairComparison {
                    model_a: "m2".to_string(),
                    model_b: "m1".to_string(),
                    test: "welch".to_string(),
                    result: None,
                    significant: false,
                }],
            )
            .unwrap();
        let (_, _, p_values) = written(writers);
        assert_eq!(p_values.lines().nth(1).unwrap(), "DS1\tEP1\tm2\tm1\twelch\tNA\tNA\tfalse");
    }

    #[test]
    fn test_create_makes_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let targets = OutputTargets::in_dir(dir.path().join("nested/out"));
        let writers = SelectionWriters::create(&targets).unwrap();
        writers.finish().unwrap();
        assert!(targets.ranked_list.exists());
        assert!(targets.dump.exists());
        assert!(targets.p_values.exists());
    }

    #[test]
    fn test_summary_record_and_render() {
        let mut summary = SelectionSummary::new(metadata());
        summary.record(&selection(), &[]);
        let mut empty = selection();
        empty.ranked.clear();
        empty.considered.clear();
        empty.key = DatasetEndpoint::new("DS2", "EP1");
        summary.record(&empty, &[]);

        assert_eq!(summary.pairs.len(), 2);
        assert_eq!(summary.empty_pairs, 1);
        assert_eq!(summary.pairs[0].top_model.as_deref(), Some("m2"));

        let text = summary.to_text();
        assert!(text.contains("Model selection"));
        assert!(text.contains("shrinkage"));
        assert!(text.contains("Top Model"));

        let json = summary.to_json().unwrap();
        let parsed: SelectionSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.pairs[1].dataset, "DS2");
    }
}
