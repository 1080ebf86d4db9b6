//! Significance tests between two candidates' held-out scores.

use crate::metrics::{paired_t_test, permutation_test, welch_t_test, SignificanceResult};
use crate::performance::HeldOutSample;
use std::cmp::Ordering;

/// Pairwise comparison of two models on held-out samples
pub trait SignificanceTest: Send + Sync {
    /// Registered name
    fn name(&self) -> &'static str;

    /// Compare `a` against `b`; `None` when the test is undefined for the data
    fn compare(&self, a: &[HeldOutSample], b: &[HeldOutSample]) -> Option<SignificanceResult>;
}

/// Scores of samples present in both slices, in sample id order
///
/// Both inputs must be sorted by sample id, as [`crate::performance::HeldOutScores`] returns them.
#[must_use]
pub fn paired_scores(a: &[HeldOutSample], b: &[HeldOutSample]) -> (Vec<f64>, Vec<f64>) {
    let (mut left, mut right) = (Vec::new(), Vec::new());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].sample_id.cmp(&b[j].sample_id) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                left.push(a[i].score);
                right.push(b[j].score);
                i += 1;
                j += 1;
            }
        }
    }
    (left, right)
}

fn scores(samples: &[HeldOutSample]) -> Vec<f64> {
    samples.iter().map(|s| s.score).collect()
}

/// Paired t-test on shared samples
#[derive(Debug, Clone, Copy, Default)]
pub struct PairedT;

impl SignificanceTest for PairedT {
    fn name(&self) -> &'static str {
        "paired-t"
    }

    fn compare(&self, a: &[HeldOutSample], b: &[HeldOutSample]) -> Option<SignificanceResult> {
        let (left, right) = paired_scores(a, b);
        paired_t_test(&left, &right)
    }
}

/// Welch's t-test on all samples of each model
#[derive(Debug, Clone, Copy, Default)]
pub struct Welch;

impl SignificanceTest for Welch {
    fn name(&self) -> &'static str {
        "welch"
    }

    fn compare(&self, a: &[HeldOutSample], b: &[HeldOutSample]) -> Option<SignificanceResult> {
        welch_t_test(&scores(a), &scores(b))
    }
}

/// Seeded sign-flip permutation test on shared samples
#[derive(Debug, Clone, Copy)]
pub struct Permutation {
    pub permutations: usize,
    pub seed: u64,
}

impl SignificanceTest for Permutation {
    fn name(&self) -> &'static str {
        "permutation"
    }

    fn compare(&self, a: &[HeldOutSample], b: &[HeldOutSample]) -> Option<SignificanceResult> {
        let (left, right) = paired_scores(a, b);
        permutation_test(&left, &right, self.permutations, self.seed)
    }
}

/// Registered test names
pub const SIGNIFICANCE_TESTS: &[(&str, &str)] = &[
    ("paired-t", "paired t-test on shared held-out samples"),
    ("welch", "Welch's unequal-variance t-test"),
    ("permutation", "seeded sign-flip permutation test on shared samples"),
];

/// Build the test registered under `name`
#[must_use]
pub fn resolve(name: &str, permutations: usize, seed: u64) -> Option<Box<dyn SignificanceTest>> {
    match name.trim().to_lowercase().as_str() {
        "paired-t" | "paired_t" | "paired" => Some(Box::new(PairedT)),
        "welch" | "t-test" => Some(Box::new(Welch)),
        "permutation" => Some(Box::new(Permutation { permutations, seed })),
        _ => None,
    }
}
