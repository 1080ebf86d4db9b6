//! Calibration of raw cross-validation estimates.
//!
//! Calibrations are resolved by name from a compile-time table. Each one is a
//! pure function of a [`CalibrationContext`] (conditions, metric, raw
//! estimate), the model id and its numeric attributes.

use crate::conditions::ModelConditionStore;
use crate::config::{CalibrationParams, MetricDirection, RankBy};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by calibration lookup and evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Unknown calibration: {name} (known: {known})")]
    Unknown { name: String, known: String },

    #[error("No applicable {what} for model {model_id}")]
    MissingValue { model_id: String, what: String },

    #[error("Calibration produced a non-finite estimate for model {0}")]
    NonFinite(String),
}

impl CalibrationError {
    /// Short status label for audit output
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Unknown { .. } => "unknown-calibration",
            Self::MissingValue { .. } => "missing-value",
            Self::NonFinite(_) => "non-finite",
        }
    }
}

/// Numeric model attributes (covariates from the results file)
pub type Attributes = BTreeMap<String, f64>;

/// Read-only inputs shared by every calibration call for one candidate
#[derive(Debug, Clone, Copy)]
pub struct CalibrationContext<'a> {
    /// Normalized per-model conditions
    pub conditions: &'a ModelConditionStore,
    /// Metric being calibrated
    pub metric: RankBy,
    /// Raw cross-validation estimate of `metric`
    pub raw: f64,
}

impl<'a> CalibrationContext<'a> {
    #[must_use]
    pub const fn new(conditions: &'a ModelConditionStore, metric: RankBy, raw: f64) -> Self {
        Self {
            conditions,
            metric,
            raw,
        }
    }

    /// Normalized condition value of a model
    #[must_use]
    pub fn condition(&self, model_id: &str, variable: &str) -> Option<&'a str> {
        self.conditions.condition(model_id, variable)
    }
}

/// A calibration of raw performance estimates
pub trait CalibrationModel: Send + Sync {
    /// Registered name
    fn name(&self) -> &'static str;

    /// Adjusted estimate for `model_id`
    ///
    /// # Errors
    ///
    /// Returns `CalibrationError::MissingValue` when an input the calibration
    /// needs is absent; the caller keeps the raw estimate for that model.
    fn calibrate_estimate(
        &self,
        context: &CalibrationContext<'_>,
        model_id: &str,
        attributes: &Attributes,
    ) -> Result<f64, CalibrationError>;
}

/// Ordered key/value lookup: the first pair whose key equals `key` wins
///
/// Returns `None` when nothing matches; callers must treat that as "no
/// applicable value", never as zero.
#[must_use]
pub fn match_value<K: AsRef<str>>(key: &str, pairs: &[(K, f64)]) -> Option<f64> {
    let found = pairs
        .iter()
        .find(|(candidate, _)| candidate.as_ref() == key)
        .map(|(_, value)| *value);
    if found.is_none() {
        tracing::debug!(key, candidates = pairs.len(), "No matching value");
    }
    found
}

fn attribute(attributes: &Attributes, name: &str, model_id: &str) -> Result<f64, CalibrationError> {
    attributes
        .get(name)
        .copied()
        .ok_or_else(|| CalibrationError::MissingValue {
            model_id: model_id.to_string(),
            what: format!("attribute {name}"),
        })
}

/// Returns the raw estimate unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl CalibrationModel for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn calibrate_estimate(
        &self,
        context: &CalibrationContext<'_>,
        _model_id: &str,
        _attributes: &Attributes,
    ) -> Result<f64, CalibrationError> {
        Ok(context.raw)
    }
}

/// Subtracts a known bias per condition value
#[derive(Debug, Clone, Default)]
pub struct ConditionOffset {
    offsets: BTreeMap<String, Vec<(String, f64)>>,
}

impl ConditionOffset {
    #[must_use]
    pub const fn new(offsets: BTreeMap<String, Vec<(String, f64)>>) -> Self {
        Self { offsets }
    }
}

impl CalibrationModel for ConditionOffset {
    fn name(&self) -> &'static str {
        "condition-offset"
    }

    fn calibrate_estimate(
        &self,
        context: &CalibrationContext<'_>,
        model_id: &str,
        _attributes: &Attributes,
    ) -> Result<f64, CalibrationError> {
        let mut estimate = context.raw;
        for (variable, pairs) in &self.offsets {
            let missing = || CalibrationError::MissingValue {
                model_id: model_id.to_string(),
                what: format!("offset for condition {variable}"),
            };
            let value = context.condition(model_id, variable).ok_or_else(missing)?;
            estimate -= match_value(value, pairs).ok_or_else(missing)?;
        }
        Ok(estimate)
    }
}

/// Shrinks the estimate towards a prior, weighted by training sample count
#[derive(Debug, Clone)]
pub struct Shrinkage {
    prior: f64,
    strength: f64,
    sample_attribute: String,
}

impl Shrinkage {
    #[must_use]
    pub fn new(prior: f64, strength: f64, sample_attribute: &str) -> Self {
        Self {
            prior,
            strength,
            sample_attribute: sample_attribute.to_string(),
        }
    }
}

impl CalibrationModel for Shrinkage {
    fn name(&self) -> &'static str {
        "shrinkage"
    }

    #[allow(clippy::suboptimal_flops)]
    fn calibrate_estimate(
        &self,
        context: &CalibrationContext<'_>,
        model_id: &str,
        attributes: &Attributes,
    ) -> Result<f64, CalibrationError> {
        let n = attribute(attributes, &self.sample_attribute, model_id)?.max(0.0);
        let total = n + self.strength;
        if total <= 0.0 {
            return Ok(context.raw);
        }
        Ok((n * context.raw + self.strength * self.prior) / total)
    }
}

/// Penalizes fold-to-fold variability and model size
#[derive(Debug, Clone)]
pub struct Optimism {
    sd_coefficient: f64,
    feature_coefficient: f64,
    sd_attribute: String,
    feature_attribute: String,
}

impl Optimism {
    #[must_use]
    pub fn new(sd_coefficient: f64, feature_coefficient: f64, sd_attribute: &str, feature_attribute: &str) -> Self {
        Self {
            sd_coefficient,
            feature_coefficient,
            sd_attribute: sd_attribute.to_string(),
            feature_attribute: feature_attribute.to_string(),
        }
    }

    fn term(coefficient: f64, name: &str, model_id: &str, attributes: &Attributes) -> Result<f64, CalibrationError> {
        if coefficient == 0.0 {
            return Ok(0.0);
        }
        attribute(attributes, name, model_id)
    }
}

impl CalibrationModel for Optimism {
    fn name(&self) -> &'static str {
        "optimism"
    }

    fn calibrate_estimate(
        &self,
        context: &CalibrationContext<'_>,
        model_id: &str,
        attributes: &Attributes,
    ) -> Result<f64, CalibrationError> {
        let sd = Self::term(self.sd_coefficient, &self.sd_attribute, model_id, attributes)?;
        let features =
            Self::term(self.feature_coefficient, &self.feature_attribute, model_id, attributes)?.max(0.0);
        let penalty = self.sd_coefficient.mul_add(sd, self.feature_coefficient * features.ln_1p());

        // Penalties make a lower-is-better metric larger
        let estimate = match context.metric.direction() {
            MetricDirection::HigherIsBetter => context.raw - penalty,
            MetricDirection::LowerIsBetter => context.raw + penalty,
        };
        Ok(estimate)
    }
}

type Factory = fn(&CalibrationParams) -> Box<dyn CalibrationModel>;

fn build_identity(_: &CalibrationParams) -> Box<dyn CalibrationModel> {
    Box::new(Identity)
}

fn build_condition_offset(params: &CalibrationParams) -> Box<dyn CalibrationModel> {
    Box::new(ConditionOffset::new(params.offsets.clone()))
}

fn build_shrinkage(params: &CalibrationParams) -> Box<dyn CalibrationModel> {
    Box::new(Shrinkage::new(params.prior, params.strength, &params.sample_attribute))
}

fn build_optimism(params: &CalibrationParams) -> Box<dyn CalibrationModel> {
    Box::new(Optimism::new(
        params.sd_coefficient,
        params.feature_coefficient,
        &params.sd_attribute,
        &params.feature_attribute,
    ))
}

/// Registered calibrations: (name, description, factory)
pub const CALIBRATIONS: &[(&str, &str, Factory)] = &[
    ("identity", "raw estimate, unchanged", build_identity),
    (
        "condition-offset",
        "subtract a bias per normalized condition value",
        build_condition_offset,
    ),
    (
        "shrinkage",
        "shrink towards a prior by training sample count",
        build_shrinkage,
    ),
    (
        "optimism",
        "penalize fold variability and feature count",
        build_optimism,
    ),
];

/// Name-based access to the calibration table
pub struct CalibrationRegistry;

impl CalibrationRegistry {
    /// Build the calibration registered under `name`
    ///
    /// # Errors
    ///
    /// Returns `CalibrationError::Unknown` if no calibration has that name.
    pub fn resolve(name: &str, params: &CalibrationParams) -> Result<Box<dyn CalibrationModel>, CalibrationError> {
        let wanted = name.trim().to_lowercase();
        CALIBRATIONS
            .iter()
            .find(|(registered, _, _)| *registered == wanted)
            .map(|(_, _, factory)| factory(params))
            .ok_or_else(|| CalibrationError::Unknown {
                name: name.to_string(),
                known: Self::names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Registered calibration names
    pub fn names() -> impl Iterator<Item = &'static str> {
        CALIBRATIONS.iter().map(|(name, _, _)| *name)
    }

    /// Registered (name, description) pairs
    pub fn describe() -> impl Iterator<Item = (&'static str, &'static str)> {
        CALIBRATIONS.iter().map(|(name, description, _)| (*name, *description))
    }
}

/// A candidate's calibrated estimate, or why it has none
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    /// No calibration configured
    NotConfigured,
    /// Calibrated estimate
    Calibrated(f64),
    /// Calibration failed; the raw estimate stays in effect
    Failed(CalibrationError),
}

impl CalibrationOutcome {
    /// Evaluate `model` (if any) for one candidate, rejecting non-finite output
    #[must_use]
    pub fn evaluate(
        model: Option<&dyn CalibrationModel>,
        context: &CalibrationContext<'_>,
        model_id: &str,
        attributes: &Attributes,
    ) -> Self {
        let Some(model) = model else {
            return Self::NotConfigured;
        };
        match model.calibrate_estimate(context, model_id, attributes) {
            Ok(value) if value.is_finite() => Self::Calibrated(value),
            Ok(_) => Self::Failed(CalibrationError::NonFinite(model_id.to_string())),
            Err(e) => {
                tracing::debug!(model_id, calibration = model.name(), error = %e, "Calibration fell back to raw estimate");
                Self::Failed(e)
            }
        }
    }

    /// Calibrated value, if any
    #[must_use]
    pub const fn value(&self) -> Option<f64> {
        match self {
            Self::Calibrated(v) => Some(*v),
            _ => None,
        }
    }

    /// Status label for audit output
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::NotConfigured => "none",
            Self::Calibrated(_) => "calibrated",
            Self::Failed(e) => e.status(),
        }
    }
}
