//! Ranking of candidate models for one dataset/endpoint.
//!
//! The engine either follows a custom override ranking or scores every
//! eligible candidate and sorts by effective score, reward metric and model
//! id. The resulting order is total, so identical inputs always rank
//! identically.

use crate::calibration::{CalibrationContext, CalibrationModel, CalibrationOutcome, CalibrationRegistry};
use crate::conditions::ModelConditionStore;
use crate::config::{MetricDirection, RankBy, RankStrategy, SelectionContext};
use crate::custom_ranking::CustomRankingOverride;
use crate::performance::{CandidateModel, DatasetEndpoint, PerformanceRepository};
use serde::Serialize;
use std::cmp::Ordering;

/// Decides whether a model id denotes a gene-list derived model
pub trait GeneListPredicate {
    fn is_gene_list(&self, model_id: &str) -> bool;
}

impl<F: Fn(&str) -> bool> GeneListPredicate for F {
    fn is_gene_list(&self, model_id: &str) -> bool {
        self(model_id)
    }
}

/// Flags model ids containing any marker (case-insensitive)
#[derive(Debug, Clone)]
pub struct MarkerPredicate {
    markers: Vec<String>,
}

impl MarkerPredicate {
    #[must_use]
    pub fn new<S: AsRef<str>>(markers: &[S]) -> Self {
        Self {
            markers: markers
                .iter()
                .map(|m| m.as_ref().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }
}

impl GeneListPredicate for MarkerPredicate {
    fn is_gene_list(&self, model_id: &str) -> bool {
        let id = model_id.to_lowercase();
        self.markers.iter().any(|m| id.contains(m.as_str()))
    }
}

/// Where a ranking came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RankingSource {
    /// Sorted by effective score
    Automatic,
    /// Copied from a custom ranking of the given type
    Override(String),
}

impl RankingSource {
    /// Label for audit output
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Automatic => "automatic".to_string(),
            Self::Override(kind) => format!("override:{kind}"),
        }
    }
}

/// One selected model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    /// 1-based rank
    pub rank: usize,
    pub model_id: String,
    /// Effective score, or the raw metric for overridden rankings
    pub score: Option<f64>,
}

/// Audit record of one considered candidate
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub model_id: String,
    /// Raw `rank_by` metric
    pub raw: Option<f64>,
    /// Raw reward metric
    pub reward: Option<f64>,
    pub calibration: CalibrationOutcome,
    /// Score used for ordering; `None` for ineligible candidates
    pub effective: Option<f64>,
    /// Rank in the output list, if selected
    pub selected_rank: Option<usize>,
}

impl ScoredCandidate {
    /// Status label combining eligibility and calibration
    #[must_use]
    pub const fn status(&self) -> &'static str {
        if self.raw.is_none() {
            "missing-metric"
        } else {
            self.calibration.status()
        }
    }
}

/// Result of ranking one dataset/endpoint
#[derive(Debug, Clone)]
pub struct Selection {
    pub key: DatasetEndpoint,
    /// At most `k` entries, best first
    pub ranked: Vec<RankedEntry>,
    /// Every candidate that passed the exclusion filters
    pub considered: Vec<ScoredCandidate>,
    pub source: RankingSource,
    /// Candidates removed as gene-list derived
    pub excluded_gene_lists: usize,
    /// Candidates removed by the model-name filter
    pub excluded_by_name: usize,
}

impl Selection {
    /// Whether nothing was selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// Resolve the configured calibration, degrading unknown names to none
#[must_use]
pub fn resolve_calibration(context: &SelectionContext) -> Option<Box<dyn CalibrationModel>> {
    let name = context.calibration.as_deref()?;
    match CalibrationRegistry::resolve(name, &context.calibration_params) {
        Ok(model) => {
            tracing::info!(calibration = model.name(), "Calibration enabled");
            Some(model)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unresolvable calibration, ranking on raw metric");
            None
        }
    }
}

/// Resolve the configured strategy, degrading unknown names to the default
#[must_use]
pub fn resolve_strategy(context: &SelectionContext) -> RankStrategy {
    context.strategy().unwrap_or_else(|e| {
        let fallback = RankStrategy::default();
        tracing::warn!(error = %e, fallback = fallback.label(), "Falling back to default ranking strategy");
        fallback
    })
}

/// Ranks candidates of one dataset/endpoint at a time
pub struct RankingEngine<'a> {
    repository: &'a PerformanceRepository,
    conditions: &'a ModelConditionStore,
    overrides: &'a CustomRankingOverride,
    calibration: Option<Box<dyn CalibrationModel>>,
    strategy: RankStrategy,
    gene_lists: Box<dyn GeneListPredicate + 'a>,
}

impl<'a> RankingEngine<'a> {
    /// Engine ranking on raw metrics with the default gene-list markers
    #[must_use]
    pub fn new(
        repository: &'a PerformanceRepository,
        conditions: &'a ModelConditionStore,
        overrides: &'a CustomRankingOverride,
    ) -> Self {
        Self {
            repository,
            conditions,
            overrides,
            calibration: None,
            strategy: RankStrategy::default(),
            gene_lists: Box::new(MarkerPredicate::new(&["genelist", "gene_list"])),
        }
    }

    /// Engine configured from a selection context (calibration, strategy, markers)
    #[must_use]
    pub fn from_context(
        context: &SelectionContext,
        repository: &'a PerformanceRepository,
        conditions: &'a ModelConditionStore,
        overrides: &'a CustomRankingOverride,
    ) -> Self {
        Self::new(repository, conditions, overrides)
            .with_calibration(resolve_calibration(context))
            .with_strategy(resolve_strategy(context))
            .with_gene_list_predicate(MarkerPredicate::new(context.gene_list_markers.as_slice()))
    }

    #[must_use]
    pub fn with_calibration(mut self, calibration: Option<Box<dyn CalibrationModel>>) -> Self {
        self.calibration = calibration;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: RankStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_gene_list_predicate<P: GeneListPredicate + 'a>(mut self, predicate: P) -> Self {
        self.gene_lists = Box::new(predicate);
        self
    }

    /// Name of the active calibration, if any
    #[must_use]
    pub fn calibration_name(&self) -> Option<&'static str> {
        self.calibration.as_ref().map(|c| c.name())
    }

    /// Active strategy
    #[must_use]
    pub const fn strategy(&self) -> RankStrategy {
        self.strategy
    }

    /// Rank the candidates of one dataset/endpoint, returning at most `k` entries
    #[must_use]
    pub fn select(&self, context: &SelectionContext, dataset: &str, endpoint: &str) -> Selection {
        let mut excluded_gene_lists = 0;
        let mut excluded_by_name = 0;
        let candidates: Vec<&CandidateModel> = self
            .repository
            .candidates_for(dataset, endpoint)
            .iter()
            .filter(|c| {
                if context.exclude_gene_lists && self.gene_lists.is_gene_list(&c.model_id) {
                    excluded_gene_lists += 1;
                    return false;
                }
                if !context.accepts_model(&c.model_id) {
                    excluded_by_name += 1;
                    return false;
                }
                true
            })
            .collect();

        let (ranked, considered, source) = match self.overrides.override_for(dataset, endpoint) {
            Some((kind, order)) => {
                let (ranked, considered) = Self::follow_override(context, &candidates, order);
                (ranked, considered, RankingSource::Override(kind.to_string()))
            }
            None => {
                let (ranked, considered) = self.rank_automatically(context, &candidates);
                (ranked, considered, RankingSource::Automatic)
            }
        };

        tracing::debug!(
            dataset,
            endpoint,
            candidates = considered.len(),
            selected = ranked.len(),
            excluded_gene_lists,
            excluded_by_name,
            source = %source.label(),
            "Ranked dataset/endpoint"
        );

        Selection {
            key: DatasetEndpoint::new(dataset, endpoint),
            ranked,
            considered,
            source,
            excluded_gene_lists,
            excluded_by_name,
        }
    }

    fn follow_override(
        context: &SelectionContext,
        candidates: &[&CandidateModel],
        order: &[String],
    ) -> (Vec<RankedEntry>, Vec<ScoredCandidate>) {
        let mut ranked: Vec<RankedEntry> = Vec::new();
        for model_id in order {
            if ranked.len() == context.k {
                break;
            }
            if ranked.iter().any(|r| &r.model_id == model_id) {
                continue;
            }
            match candidates.iter().find(|c| &c.model_id == model_id) {
                Some(candidate) => ranked.push(RankedEntry {
                    rank: ranked.len() + 1,
                    model_id: model_id.clone(),
                    score: candidate.metric(context.rank_by),
                }),
                None => tracing::debug!(model_id = %model_id, "Override entry has no matching candidate"),
            }
        }

        let mut considered: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|c| {
                let raw = c.metric(context.rank_by);
                ScoredCandidate {
                    model_id: c.model_id.clone(),
                    raw,
                    reward: c.metric(context.reward_performance),
                    calibration: CalibrationOutcome::NotConfigured,
                    effective: raw,
                    selected_rank: ranked.iter().find(|r| r.model_id == c.model_id).map(|r| r.rank),
                }
            })
            .collect();
        considered.sort_by(|a, b| a.model_id.cmp(&b.model_id));

        (ranked, considered)
    }

    fn rank_automatically(
        &self,
        context: &SelectionContext,
        candidates: &[&CandidateModel],
    ) -> (Vec<RankedEntry>, Vec<ScoredCandidate>) {
        let mut considered: Vec<ScoredCandidate> = candidates.iter().map(|c| self.score(context, c)).collect();

        let mut eligible: Vec<usize> = (0..considered.len())
            .filter(|&i| considered[i].effective.is_some())
            .collect();
        eligible.sort_by(|&a, &b| {
            compare_candidates(&considered[a], &considered[b], context.rank_by)
        });
        eligible.truncate(context.k);

        let ranked = eligible
            .iter()
            .enumerate()
            .map(|(position, &index)| {
                let entry = &mut considered[index];
                entry.selected_rank = Some(position + 1);
                RankedEntry {
                    rank: position + 1,
                    model_id: entry.model_id.clone(),
                    score: entry.effective,
                }
            })
            .collect();

        considered.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        (ranked, considered)
    }

    /// Effective score of one candidate under the active strategy
    fn score(&self, context: &SelectionContext, candidate: &CandidateModel) -> ScoredCandidate {
        let raw = candidate.metric(context.rank_by);
        let reward = candidate.metric(context.reward_performance);

        let Some(raw_value) = raw else {
            tracing::debug!(
                model_id = %candidate.model_id,
                metric = %context.rank_by,
                "Candidate lacks ranking metric"
            );
            return ScoredCandidate {
                model_id: candidate.model_id.clone(),
                raw,
                reward,
                calibration: CalibrationOutcome::NotConfigured,
                effective: None,
                selected_rank: None,
            };
        };

        let calibration_context = CalibrationContext::new(self.conditions, context.rank_by, raw_value);
        let calibration = CalibrationOutcome::evaluate(
            self.calibration.as_deref(),
            &calibration_context,
            &candidate.model_id,
            &candidate.attributes,
        );

        let effective = match (self.strategy, calibration.value()) {
            (RankStrategy::Raw, _) | (_, None) => raw_value,
            (RankStrategy::Calibrated, Some(calibrated)) => calibrated,
            (RankStrategy::Blend { weight }, Some(calibrated)) => {
                weight.mul_add(calibrated, (1.0 - weight) * raw_value)
            }
        };

        ScoredCandidate {
            model_id: candidate.model_id.clone(),
            raw,
            reward,
            calibration,
            effective: Some(effective),
            selected_rank: None,
        }
    }
}

/// `Less` when `a` is better in the direction of `metric`
fn compare_by_direction(a: f64, b: f64, metric: RankBy) -> Ordering {
    let ordering = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    match metric.direction() {
        MetricDirection::HigherIsBetter => ordering.reverse(),
        MetricDirection::LowerIsBetter => ordering,
    }
}

/// Total order: effective score, then reward descending (missing last), then model id.
/// The reward is compared high-to-low whatever metric it names.
fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate, rank_by: RankBy) -> Ordering {
    let primary = match (a.effective, b.effective) {
        (Some(x), Some(y)) => compare_by_direction(x, y, rank_by),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    primary
        .then_with(|| match (a.reward, b.reward) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.model_id.cmp(&b.model_id))
}
