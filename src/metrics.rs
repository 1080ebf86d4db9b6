//! Statistical primitives used for model comparisons.
//!
//! - Paired and Welch t-tests (two-tailed, Student's t)
//! - Sign-flip permutation test with a seeded RNG
//! - Bonferroni correction and Cohen's d interpretation

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Mean of samples (0 for an empty slice)
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Sample standard deviation (n - 1 denominator)
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let variance = samples.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Result of a significance test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Test statistic (t, or observed mean difference for permutation)
    pub statistic: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Degrees of freedom (0 for permutation)
    pub degrees_of_freedom: f64,
    /// Number of observations that entered the test
    pub n: usize,
    /// Cohen's d effect size
    pub cohens_d: f64,
    /// Effect size interpretation
    pub effect_interpretation: String,
}

impl SignificanceResult {
    /// Whether the p-value falls below `alpha`
    #[must_use]
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

fn two_tailed_p(t_statistic: f64, df: f64) -> Option<f64> {
    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * (1.0 - t_dist.cdf(t_statistic.abs()))).clamp(0.0, 1.0))
}

/// Paired t-test on matched differences
///
/// Returns `None` if samples differ in length, have fewer than two pairs,
/// or the differences have no variance.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(samples_a: &[f64], samples_b: &[f64]) -> Option<SignificanceResult> {
    if samples_a.len() != samples_b.len() || samples_a.len() < 2 {
        return None;
    }

    let n = samples_a.len();
    let differences: Vec<f64> = samples_a.iter().zip(samples_b).map(|(a, b)| a - b).collect();
    let mean_diff = mean(&differences);
    let sd_diff = std_dev(&differences);
    if sd_diff < f64::EPSILON {
        return None;
    }

    let t_statistic = mean_diff / (sd_diff / (n as f64).sqrt());
    let df = (n - 1) as f64;
    let cohens_d = mean_diff / sd_diff;

    Some(SignificanceResult {
        statistic: t_statistic,
        p_value: two_tailed_p(t_statistic, df)?,
        degrees_of_freedom: df,
        n,
        cohens_d,
        effect_interpretation: interpret_cohens_d(cohens_d).to_string(),
    })
}

/// Welch's unequal-variance t-test
///
/// Returns `None` if either side has fewer than two samples or both sides
/// have no variance.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
pub fn welch_t_test(samples_a: &[f64], samples_b: &[f64]) -> Option<SignificanceResult> {
    if samples_a.len() < 2 || samples_b.len() < 2 {
        return None;
    }

    let n_a = samples_a.len() as f64;
    let n_b = samples_b.len() as f64;
    let mean_a = mean(samples_a);
    let mean_b = mean(samples_b);
    let var_a = std_dev(samples_a).powi(2);
    let var_b = std_dev(samples_b).powi(2);

    let se = ((var_a / n_a) + (var_b / n_b)).sqrt();
    if se < f64::EPSILON {
        return None;
    }
    let t_statistic = (mean_a - mean_b) / se;

    // Welch-Satterthwaite degrees of freedom
    let df_num = ((var_a / n_a) + (var_b / n_b)).powi(2);
    let df_denom = ((var_a / n_a).powi(2) / (n_a - 1.0)) + ((var_b / n_b).powi(2) / (n_b - 1.0));
    let df = if df_denom > f64::EPSILON {
        df_num / df_denom
    } else {
        (n_a + n_b - 2.0).max(1.0)
    };

    let pooled_sd = (((n_a - 1.0) * var_a + (n_b - 1.0) * var_b) / (n_a + n_b - 2.0)).sqrt();
    let cohens_d = if pooled_sd > f64::EPSILON {
        (mean_a - mean_b) / pooled_sd
    } else {
        0.0
    };

    Some(SignificanceResult {
        statistic: t_statistic,
        p_value: two_tailed_p(t_statistic, df)?,
        degrees_of_freedom: df,
        n: samples_a.len() + samples_b.len(),
        cohens_d,
        effect_interpretation: interpret_cohens_d(cohens_d).to_string(),
    })
}

/// Two-sided paired permutation test (random sign flips of the differences)
///
/// Deterministic for a given `seed`. Uses the `(hits + 1) / (permutations + 1)`
/// estimator so the p-value is never exactly zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn permutation_test(
    samples_a: &[f64],
    samples_b: &[f64],
    permutations: usize,
    seed: u64,
) -> Option<SignificanceResult> {
    if samples_a.len() != samples_b.len() || samples_a.len() < 2 || permutations == 0 {
        return None;
    }

    let differences: Vec<f64> = samples_a.iter().zip(samples_b).map(|(a, b)| a - b).collect();
    let observed = mean(&differences);
    let sd_diff = std_dev(&differences);
    if sd_diff < f64::EPSILON {
        return None;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let tolerance = 1e-12;
    let hits = (0..permutations)
        .filter(|_| {
            let permuted: f64 = differences
                .iter()
                .map(|d| if rng.gen::<bool>() { *d } else { -d })
                .sum::<f64>()
                / differences.len() as f64;
            permuted.abs() >= observed.abs() - tolerance
        })
        .count();

    let cohens_d = observed / sd_diff;
    Some(SignificanceResult {
        statistic: observed,
        p_value: (hits + 1) as f64 / (permutations + 1) as f64,
        degrees_of_freedom: 0.0,
        n: differences.len(),
        cohens_d,
        effect_interpretation: interpret_cohens_d(cohens_d).to_string(),
    })
}

/// Apply Bonferroni correction for multiple comparisons
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bonferroni_correction(alpha: f64, num_comparisons: usize) -> f64 {
    if num_comparisons == 0 {
        return alpha;
    }
    alpha / num_comparisons as f64
}

/// Interpret Cohen's d effect size
#[must_use]
pub fn interpret_cohens_d(d: f64) -> &'static str {
    match d.abs() {
        x if x < 0.2 => "negligible",
        x if x < 0.5 => "small",
        x if x < 0.8 => "medium",
        _ => "large",
    }
}

#[cfg(test)]
#[allow(clippy::cast_precision_loss, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shifted(n: usize, base: f64, wobble: usize) -> Vec<f64> {
        (0..n)
            .map(|i| base + (i as f64 * 0.001) + ((i % wobble) as f64 * 0.01))
            .collect()
    }

    #[test]
    fn test_std_dev() {
        let samples = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let sd = std_dev(&samples);
        assert!(sd > 2.0 && sd < 2.2, "sd = {sd}");
        assert!(std_dev(&[5.0]).abs() < f64::EPSILON);
        assert!(mean(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_paired_t_test_significant() {
        let a = shifted(100, 0.95, 3);
        let b = shifted(100, 0.85, 5);
        let result = paired_t_test(&a, &b).unwrap();
        assert!(result.is_significant(0.05), "p={}", result.p_value);
        assert_eq!(result.n, 100);
    }

    #[test]
    fn test_paired_t_test_constant_difference() {
        let a = vec![0.95; 10];
        let b = vec![0.85; 10];
        assert!(paired_t_test(&a, &b).is_none());
    }

    #[test]
    fn test_paired_t_test_unequal_length() {
        assert!(paired_t_test(&[0.9, 0.91, 0.92], &[0.8, 0.81]).is_none());
    }

    #[test]
    fn test_welch_t_test_significant() {
        let a: Vec<f64> = (0..50).map(|i| 0.95 + (i as f64 * 0.002)).collect();
        let b: Vec<f64> = (0..50).map(|i| 0.75 + (i as f64 * 0.002)).collect();
        let result = welch_t_test(&a, &b).unwrap();
        assert!(result.p_value < 0.05);
        assert_eq!(result.effect_interpretation, "large");
    }

    #[test]
    fn test_welch_t_test_identical() {
        let a: Vec<f64> = (0..10).map(|i| 0.90 + (i as f64 * 0.01)).collect();
        let result = welch_t_test(&a, &a).unwrap();
        assert!(result.p_value > 0.9);
    }

    #[test]
    fn test_welch_t_test_small_sample() {
        assert!(welch_t_test(&[0.9], &[0.8]).is_none());
    }

    #[test]
    fn test_permutation_test_reproducible() {
        let a = shifted(30, 0.80, 3);
        let b = shifted(30, 0.78, 4);
        let first = permutation_test(&a, &b, 2000, 7).unwrap();
        let second = permutation_test(&a, &b, 2000, 7).unwrap();
        assert!((first.p_value - second.p_value).abs() < f64::EPSILON);
        assert!(first.p_value > 0.0 && first.p_value <= 1.0);
    }

    #[test]
    fn test_permutation_test_detects_shift() {
        let a = shifted(40, 0.95, 3);
        let b = shifted(40, 0.70, 5);
        let result = permutation_test(&a, &b, 2000, 42).unwrap();
        assert!(result.p_value < 0.01, "p={}", result.p_value);
    }

    #[test]
    fn test_permutation_test_degenerate() {
        assert!(permutation_test(&[0.5, 0.6], &[0.5], 100, 1).is_none());
        assert!(permutation_test(&[0.5, 0.6], &[0.4, 0.5], 100, 1).is_none());
        assert!(permutation_test(&[0.5, 0.7], &[0.4, 0.5], 0, 1).is_none());
    }

    #[test]
    fn test_bonferroni_correction() {
        assert!((bonferroni_correction(0.05, 5) - 0.01).abs() < f64::EPSILON);
        assert!((bonferroni_correction(0.05, 0) - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cohens_d_interpretation() {
        assert_eq!(interpret_cohens_d(0.1), "negligible");
        assert_eq!(interpret_cohens_d(0.3), "small");
        assert_eq!(interpret_cohens_d(0.6), "medium");
        assert_eq!(interpret_cohens_d(-0.9), "large");
    }
}
