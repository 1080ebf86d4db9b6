//! Integration tests for biomarker-select.
//!
//! These tests drive the library and the CLI end to end:
//! - selection runs over temporary input files
//! - override, exclusion and calibration behavior in the written outputs
//! - determinism of repeated runs
//! - error paths and exit status

#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_raw_string_hashes)]

use biomarker_select::{
    match_value, normalize, DriverError, OutputTargets, SelectionContext, SelectionDriver,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const RESULTS: &str = "\
dataset\tendpoint\tmodel_id\tmcc\tauc\tn_samples
DS1\tEP1\tm1\t0.80\t0.70\t40
DS1\tEP1\tm2\t0.85\t0.70\t40
DS1\tEP1\tm3\t0.85\t0.70\t40
DS1\tEP2\tsvm_genelist_a\t0.99\t0.95\t40
DS1\tEP2\tsvm_top50\t0.50\t0.60\t40
DS1\tEP2\tknn_top20\t0.40\t0.60\t40
DS2\tEP1\tm1\t0.60\t0.65\t5
DS2\tEP1\tm4\t0.55\t0.66\t200
DS2\tEP1\tbroken\tnot-a-number\t0.60\t10
";

/// Workspace with a results file and outputs under `out/`
struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("results.tsv"), RESULTS).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn context(&self, k: usize) -> SelectionContext {
        let mut context = SelectionContext::new(self.path("results.tsv"));
        context.k = k;
        context.outputs = OutputTargets::in_dir(self.path("out"));
        context
    }
}

fn rows(path: &Path) -> Vec<Vec<String>> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

/// Ranked model ids for one dataset/endpoint, in rank order
fn ranked_ids(context: &SelectionContext, dataset: &str, endpoint: &str) -> Vec<String> {
    rows(&context.outputs.ranked_list)
        .into_iter()
        .filter(|r| r[0] == dataset && r[1] == endpoint)
        .map(|r| r[3].clone())
        .collect()
}

// ============================================================================
// Ranking
// ============================================================================

#[test]
fn test_ranked_list_bounded_by_k() {
    let fixture = Fixture::new();
    for k in [1, 2, 5] {
        let context = fixture.context(k);
        SelectionDriver::new(context.clone()).run().unwrap();

        for (dataset, endpoint, available) in [("DS1", "EP1", 3), ("DS1", "EP2", 3), ("DS2", "EP1", 2)] {
            let ids = ranked_ids(&context, dataset, endpoint);
            assert_eq!(ids.len(), k.min(available), "{dataset}/{endpoint} k={k}");
        }
    }
}

#[test]
fn test_lexical_tie_break() {
    let fixture = Fixture::new();
    let context = fixture.context(2);
    SelectionDriver::new(context.clone()).run().unwrap();

    assert_eq!(ranked_ids(&context, "DS1", "EP1"), ["m2", "m3"]);
    let ranked = rows(&context.outputs.ranked_list);
    assert_eq!(ranked[0], ["DS1", "EP1", "1", "m2", "0.85"]);
    assert_eq!(ranked[1], ["DS1", "EP1", "2", "m3", "0.85"]);
}

#[test]
fn test_override_table_takes_precedence() {
    let fixture = Fixture::new();
    let table = fixture.write(
        "ranking.tsv",
        "datasetName\tendpointCode\trankingType\tmodelIds\n\
         DS1\tEP1\texpert\tm3\tghost\tm1\n",
    );
    let mut context = fixture.context(5);
    context.model_id_map_file = Some(table);
    SelectionDriver::new(context.clone()).run().unwrap();

    assert_eq!(ranked_ids(&context, "DS1", "EP1"), ["m3", "m1"]);
    // Keys without a record still rank automatically
    assert_eq!(ranked_ids(&context, "DS2", "EP1"), ["m1", "m4"]);

    let dump = rows(&context.outputs.dump);
    let m2 = dump.iter().find(|r| r[0] == "DS1" && r[1] == "EP1" && r[2] == "m2").unwrap();
    assert_eq!(m2[7], "NA");
    assert_eq!(m2[8], "override:expert");
}

#[test]
fn test_inline_override_applies_to_every_key() {
    let fixture = Fixture::new();
    let mut context = fixture.context(2);
    context.custom_ranking = Some("m4, m1".to_string());
    SelectionDriver::new(context.clone()).run().unwrap();

    assert_eq!(ranked_ids(&context, "DS2", "EP1"), ["m4", "m1"]);
    assert_eq!(ranked_ids(&context, "DS1", "EP1"), ["m1"]);
    assert!(ranked_ids(&context, "DS1", "EP2").is_empty());
}

#[test]
fn test_gene_list_models_excluded_from_outputs() {
    let fixture = Fixture::new();
    let mut context = fixture.context(3);
    context.exclude_gene_lists = true;
    let summary = SelectionDriver::new(context.clone()).run().unwrap();

    assert_eq!(ranked_ids(&context, "DS1", "EP2"), ["svm_top50", "knn_top20"]);
    let dump = fs::read_to_string(&context.outputs.dump).unwrap();
    assert!(!dump.contains("genelist"));

    let pair = summary
        .pairs
        .iter()
        .find(|p| p.dataset == "DS1" && p.endpoint == "EP2")
        .unwrap();
    assert_eq!(pair.excluded_gene_lists, 1);
}

#[test]
fn test_model_name_filter_and_key_filter() {
    let fixture = Fixture::new();
    let mut context = fixture.context(3);
    context.model_name = Some("top".to_string());
    context.endpoints = vec!["EP2".to_string()];
    let summary = SelectionDriver::new(context.clone()).run().unwrap();

    assert_eq!(summary.pairs.len(), 1);
    assert_eq!(ranked_ids(&context, "DS1", "EP2"), ["svm_top50", "knn_top20"]);
}

#[test]
fn test_malformed_rows_skipped_without_abort() {
    let fixture = Fixture::new();
    let context = fixture.context(5);
    SelectionDriver::new(context.clone()).run().unwrap();

    let dump = fs::read_to_string(&context.outputs.dump).unwrap();
    assert!(!dump.contains("broken"));
    assert_eq!(ranked_ids(&context, "DS2", "EP1"), ["m1", "m4"]);
}

// ============================================================================
// Calibration
// ============================================================================

#[test]
fn test_shrinkage_calibration_reorders() {
    let fixture = Fixture::new();
    let mut context = fixture.context(2);
    context.calibration = Some("shrinkage".to_string());
    let summary = SelectionDriver::new(context.clone()).run().unwrap();

    // m1: (5 * 0.60) / 15 = 0.2, m4: (200 * 0.55) / 210 = 0.5238
    assert_eq!(ranked_ids(&context, "DS2", "EP1"), ["m4", "m1"]);
    assert_eq!(summary.metadata.calibration.as_deref(), Some("shrinkage"));

    let dump = rows(&context.outputs.dump);
    let m1 = dump.iter().find(|r| r[0] == "DS2" && r[2] == "m1").unwrap();
    assert_eq!(m1[3], "0.6");
    assert_eq!(m1[6], "calibrated");
}

#[test]
fn test_condition_offset_uses_normalized_conditions() {
    let fixture = Fixture::new();
    let conditions = fixture.write(
        "conditions.tsv",
        "model_id\tsequence-file\n\
         m2\t/data/run/core_fs=TRUE.txt\n\
         m3\tC:\\data\\other.fa\n",
    );
    let config = format!(
        r#"
results_file: {results}
conditions_file: {conditions}
k: 2
datasets: [DS1]
endpoints: [EP1]
calibration: condition-offset
calibration_params:
  offsets:
    sequence-file:
      - [core_fs.seq, 0.10]
      - [other.seq, 0.01]
outputs:
  ranked_list: {out}/ranked.tsv
  dump: {out}/dump.tsv
  p_values: {out}/pvalues.tsv
"#,
        results = fixture.path("results.tsv").display(),
        conditions = conditions.display(),
        out = fixture.path("out").display(),
    );
    let config_path = fixture.write("config.yaml", &config);

    let driver = SelectionDriver::from_config_file(&config_path).unwrap();
    driver.run().unwrap();
    let context = driver.context();

    // m2 drops to 0.75, m3 to 0.84; m1 has no conditions and keeps its raw 0.80
    assert_eq!(ranked_ids(context, "DS1", "EP1"), ["m3", "m1"]);

    let dump = rows(&context.outputs.dump);
    let m1 = dump.iter().find(|r| r[2] == "m1").unwrap();
    assert_eq!(m1[4], "NA");
    assert_eq!(m1[6], "missing-value");
}

#[test]
fn test_unknown_calibration_degrades_to_raw() {
    let fixture = Fixture::new();
    let mut baseline = fixture.context(3);
    baseline.outputs = OutputTargets::in_dir(fixture.path("raw"));
    SelectionDriver::new(baseline.clone()).run().unwrap();

    let mut context = fixture.context(3);
    context.calibration = Some("org.example.NoSuchCalibration".to_string());
    context.rank_strategy = Some("mystery".to_string());
    let summary = SelectionDriver::new(context.clone()).run().unwrap();

    assert!(summary.metadata.calibration.is_none());
    assert_eq!(summary.metadata.strategy, "calibrated");
    assert_eq!(
        fs::read(&context.outputs.ranked_list).unwrap(),
        fs::read(&baseline.outputs.ranked_list).unwrap()
    );
}

// ============================================================================
// Significance
// ============================================================================

fn held_out_scores() -> String {
    let mut table = String::from("dataset\tendpoint\tmodel_id\tsample_id\tscore\n");
    for i in 0..30 {
        let wobble = f64::from(i % 5) * 0.01;
        table.push_str(&format!("DS1\tEP1\tm2\ts{i:02}\t{}\n", 0.90 + wobble));
        table.push_str(&format!("DS1\tEP1\tm3\ts{i:02}\t{}\n", 0.60 + wobble * 1.5));
    }
    table
}

#[test]
fn test_p_values_only_when_configured() {
    let fixture = Fixture::new();
    let test_file = fixture.write("test.tsv", &held_out_scores());

    let mut without_test = fixture.context(3);
    without_test.test_file = Some(test_file.clone());
    SelectionDriver::new(without_test.clone()).run().unwrap();
    assert!(rows(&without_test.outputs.p_values).is_empty());

    let mut context = fixture.context(3);
    context.test_file = Some(test_file);
    context.significance_test = Some("paired-t".to_string());
    let summary = SelectionDriver::new(context.clone()).run().unwrap();

    let p_values = rows(&context.outputs.p_values);
    let ds1: Vec<&Vec<String>> = p_values.iter().filter(|r| r[0] == "DS1" && r[1] == "EP1").collect();
    assert_eq!(ds1.len(), 2);
    assert_eq!(ds1[0][2..5], ["m2", "m3", "paired-t"]);
    assert_eq!(ds1[0][5], "30");
    assert_eq!(ds1[0][7], "true");
    // m1 has no held-out scores
    assert_eq!(ds1[1][3], "m1");
    assert_eq!(ds1[1][6], "NA");
    assert_eq!(ds1[1][7], "false");
    assert_eq!(summary.rows.p_value_rows, p_values.len());
}

// ============================================================================
// Determinism and helpers
// ============================================================================

#[test]
fn test_repeated_runs_are_byte_identical() {
    let fixture = Fixture::new();
    let test_file = fixture.write("test.tsv", &held_out_scores());

    let run = |dir: &str| {
        let mut context = fixture.context(3);
        context.outputs = OutputTargets::in_dir(fixture.path(dir));
        context.calibration = Some("shrinkage".to_string());
        context.rank_strategy = Some("blend".to_string());
        context.test_file = Some(test_file.clone());
        context.significance_test = Some("permutation".to_string());
        context.permutations = 500;
        SelectionDriver::new(context.clone()).run().unwrap();
        context.outputs
    };

    let first = run("first");
    let second = run("second");
    for (a, b) in [
        (&first.ranked_list, &second.ranked_list),
        (&first.dump, &second.dump),
        (&first.p_values, &second.p_values),
    ] {
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap(), "{}", a.display());
    }
}

#[test]
fn test_normalization_idempotent() {
    let values = [
        "/data/core_fs=true.txt",
        "core_fs=F",
        "C:\\runs\\core_fs=yes.fa",
        "plain",
        "already.seq",
        "ratio=0.5.txt",
    ];
    for value in values {
        let once = normalize("sequence-file", Some(value)).unwrap();
        let twice = normalize("sequence-file", Some(&once));
        assert_eq!(twice.as_deref(), Some(once.as_str()), "{value}");
    }
    assert_eq!(normalize("sequence-file", Some("/x/core_fs=true.txt")).as_deref(), Some("core_fs.seq"));
    assert_eq!(normalize("platform", Some("/x/y.txt")).as_deref(), Some("/x/y.txt"));
    assert_eq!(normalize("sequence-file", None), None);
}

#[test]
fn test_match_value_contract() {
    assert_eq!(match_value("x", &[("x", 5.0)]), Some(5.0));
    assert_eq!(match_value("y", &[("x", 5.0)]), None);
    assert!(match_value("x", &[("x", f64::NAN)]).unwrap().is_nan());
}

// ============================================================================
// Errors and CLI
// ============================================================================

#[test]
fn test_missing_results_file_is_fatal() {
    let fixture = Fixture::new();
    let context = SelectionContext::new(fixture.path("absent.tsv"));
    let result = SelectionDriver::new(context).run();
    assert!(matches!(result, Err(DriverError::MissingInput { what: "results", .. })));
}

#[test]
fn test_cli_missing_results_exits_nonzero() {
    let fixture = Fixture::new();
    let config = fixture.write(
        "config.yaml",
        &format!("results_file: {}\n", fixture.path("absent.tsv").display()),
    );

    let output = Command::new(env!("CARGO_BIN_EXE_biomarker-select"))
        .arg("select")
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.tsv"));
}

#[test]
fn test_cli_select_with_overrides() {
    let fixture = Fixture::new();
    let config = fixture.write(
        "config.yaml",
        &format!("results_file: {}\n", fixture.path("results.tsv").display()),
    );
    let out = fixture.path("cli-out");
    let summary = fixture.path("summary.json");

    let output = Command::new(env!("CARGO_BIN_EXE_biomarker-select"))
        .args(["select", "--k", "2", "--rank-by", "auc", "--exclude-gene-lists"])
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(&out)
        .arg("--summary-json")
        .arg(&summary)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let ranked = rows(&out.join("ranked.tsv"));
    let ds2: Vec<&str> = ranked
        .iter()
        .filter(|r| r[0] == "DS2")
        .map(|r| r[3].as_str())
        .collect();
    assert_eq!(ds2, ["m4", "m1"]);
    assert!(fs::read_to_string(&summary).unwrap().contains("\"rank_by\": \"auc\""));
}

#[test]
fn test_cli_normalize_and_calibrations() {
    let output = Command::new(env!("CARGO_BIN_EXE_biomarker-select"))
        .args(["normalize", "--column", "sequence-file", "/a/b/core_fs=off.txt"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "core_fs.seq");

    let output = Command::new(env!("CARGO_BIN_EXE_biomarker-select"))
        .arg("calibrations")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["identity", "condition-offset", "shrinkage", "optimism", "permutation"] {
        assert!(stdout.contains(name), "missing {name}");
    }
}
