//! Ensemble Combiner — weighted majority vote over per-model zone predictions
//!
//! Each model contributes one vote per prediction, formed by folding its zone
//! predictions for the matched similar entities (weighted 1/rank). Votes are
//! merged by weight × confidence; the model weight is a bounded EMA of
//! historical accuracy maintained by the registry. Ties break first on higher
//! aggregate raw confidence, then on the fixed `Zone` declaration-order
//! priority — never nondeterministically. Zero usable votes is the internal
//! `Unavailable` signal that routes the orchestrator to the heuristic
//! fallback; it is not surfaced to callers.

use crate::models::{ModelFailure, ModelRegistry, ZoneVote};
use crate::similarity::SimilarEntity;
use crate::types::Zone;
use std::collections::BTreeMap;
use tracing::debug;

/// One model's aggregated vote for the target.
#[derive(Debug, Clone)]
pub struct ModelVote {
    pub model: String,
    pub weight: f64,
    pub vote: ZoneVote,
}

#[derive(Debug, Clone)]
pub enum CombineOutcome {
    Combined(CombinedVote),
    /// No model produced output. Internal signal only.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct CombinedVote {
    pub zone: Zone,
    pub confidence: f64,
    /// Names of the models that voted for the winning zone.
    pub winning_models: Vec<String>,
}

/// Ask every registered model to vote on the target via its similar-entity
/// set. Models with no output for any similar entity are recorded, not
/// errored.
pub fn gather_votes(
    registry: &ModelRegistry,
    similars: &[SimilarEntity],
) -> (Vec<ModelVote>, Vec<ModelFailure>) {
    let mut votes = Vec::new();
    let mut silent = Vec::new();

    for (index, model) in registry.models().iter().enumerate() {
        let mut zone_scores: BTreeMap<Zone, f64> = BTreeMap::new();
        let mut rank_mass = 0.0f64;
        for similar in similars {
            if let Some(vote) = model.predict_zone(&similar.id) {
                let rank_weight = 1.0 / similar.rank as f64;
                *zone_scores.entry(vote.zone).or_default() += vote.confidence * rank_weight;
                rank_mass += rank_weight;
            }
        }
        if zone_scores.is_empty() {
            silent.push(ModelFailure {
                model: model.name().to_string(),
                reason: "no output for any similar entity".to_string(),
            });
            continue;
        }
        // BTreeMap keyed by Zone: iteration order is declaration order, so
        // score ties resolve by priority.
        let (zone, score) = zone_scores
            .iter()
            .fold(None::<(Zone, f64)>, |best, (zone, s)| match best {
                Some((_, bs)) if bs >= *s => best,
                _ => Some((*zone, *s)),
            })
            .unwrap_or((Zone::Unclassified, 0.0));
        let confidence = if rank_mass > 0.0 { (score / rank_mass).min(1.0) } else { 0.0 };
        votes.push(ModelVote {
            model: model.name().to_string(),
            weight: registry.weights()[index],
            vote: ZoneVote { zone, confidence },
        });
    }
    (votes, silent)
}

/// Weighted majority vote. Confidence is the weighted mean of per-model
/// confidences restricted to models that backed the winning zone.
pub fn combine(votes: &[ModelVote]) -> CombineOutcome {
    if votes.is_empty() {
        return CombineOutcome::Unavailable;
    }

    let mut weighted: BTreeMap<Zone, f64> = BTreeMap::new();
    let mut raw: BTreeMap<Zone, f64> = BTreeMap::new();
    for vote in votes {
        *weighted.entry(vote.vote.zone).or_default() += vote.weight * vote.vote.confidence;
        *raw.entry(vote.vote.zone).or_default() += vote.vote.confidence;
    }

    // Winner: weighted score, then aggregate raw confidence, then the fixed
    // Zone priority (BTreeMap order), in that order.
    let winner = weighted
        .iter()
        .fold(None::<(Zone, f64)>, |best, (zone, score)| match best {
            Some((bz, bs)) => {
                if *score > bs || (*score == bs && raw[zone] > raw[&bz]) {
                    Some((*zone, *score))
                } else {
                    best
                }
            }
            None => Some((*zone, *score)),
        });
    let (zone, _) = match winner {
        Some(w) => w,
        None => return CombineOutcome::Unavailable,
    };

    let mut conf_sum = 0.0f64;
    let mut weight_sum = 0.0f64;
    let mut winning_models = Vec::new();
    for vote in votes {
        if vote.vote.zone == zone {
            conf_sum += vote.weight * vote.vote.confidence;
            weight_sum += vote.weight;
            winning_models.push(vote.model.clone());
        }
    }
    let confidence = if weight_sum > 0.0 {
        (conf_sum / weight_sum).clamp(0.0, 1.0)
    } else {
        0.0
    };

    debug!(zone = %zone, confidence, voters = winning_models.len(), "Ensemble vote combined");
    CombineOutcome::Combined(CombinedVote {
        zone,
        confidence,
        winning_models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(model: &str, weight: f64, zone: Zone, confidence: f64) -> ModelVote {
        ModelVote {
            model: model.to_string(),
            weight,
            vote: ZoneVote { zone, confidence },
        }
    }

    #[test]
    fn test_weighted_majority_wins() {
        let outcome = combine(&[
            vote("a", 2.0, Zone::Web, 0.8),
            vote("b", 1.0, Zone::Data, 0.9),
            vote("c", 1.0, Zone::Data, 0.4),
        ]);
        match outcome {
            CombineOutcome::Combined(c) => {
                assert_eq!(c.zone, Zone::Web);
                assert_eq!(c.winning_models, vec!["a".to_string()]);
                assert!((c.confidence - 0.8).abs() < 1e-9);
            }
            CombineOutcome::Unavailable => panic!("expected a combined vote"),
        }
    }

    #[test]
    fn test_confidence_is_weighted_mean_of_winners() {
        let outcome = combine(&[
            vote("a", 1.0, Zone::Web, 0.9),
            vote("b", 3.0, Zone::Web, 0.5),
            vote("c", 1.0, Zone::Data, 0.2),
        ]);
        if let CombineOutcome::Combined(c) = outcome {
            // (1·0.9 + 3·0.5) / 4
            assert!((c.confidence - 0.6).abs() < 1e-9);
            assert!(c.confidence <= 1.0);
        } else {
            panic!("expected a combined vote");
        }
    }

    #[test]
    fn test_tie_breaks_on_raw_confidence_then_priority() {
        // Equal weighted scores, Data has higher raw aggregate.
        let outcome = combine(&[
            vote("a", 2.0, Zone::Web, 0.3),
            vote("b", 1.0, Zone::Data, 0.6),
        ]);
        if let CombineOutcome::Combined(c) = outcome {
            assert_eq!(c.zone, Zone::Data);
        } else {
            panic!("expected a combined vote");
        }

        // Fully symmetric tie: declaration order says Web beats Data.
        let outcome = combine(&[
            vote("a", 1.0, Zone::Data, 0.5),
            vote("b", 1.0, Zone::Web, 0.5),
        ]);
        if let CombineOutcome::Combined(c) = outcome {
            assert_eq!(c.zone, Zone::Web);
        } else {
            panic!("expected a combined vote");
        }
    }

    #[test]
    fn test_no_votes_is_unavailable() {
        assert!(matches!(combine(&[]), CombineOutcome::Unavailable));
    }
}
