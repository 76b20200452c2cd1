//! Markov Peer Predictor — ranked likely peers for an unobserved entity
//!
//! Accumulates next-hop probability mass from each similar entity's Markov
//! state (weighted 1/rank) and adds transitive-correlation-derived peer
//! suggestions (weighted strength × 0.5). Confidence blends the size of the
//! similar set (saturating at 5), the transition mass the returned top-N
//! actually captures, and a capped correlation boost; the result is clamped
//! to [0.3, 0.95] — never near-certain, never uselessly low.

use crate::correlation::CorrelationAnalyzer;
use crate::markov::MarkovModel;
use crate::similarity::SimilarEntity;
use crate::types::PredictedPeer;
use std::collections::BTreeMap;

const CORRELATION_PEER_WEIGHT: f64 = 0.5;
const MAX_CORRELATION_BOOST: f64 = 0.2;
const CONFIDENCE_FLOOR: f64 = 0.3;
const CONFIDENCE_CEILING: f64 = 0.95;

#[derive(Debug, Clone)]
pub struct PeerForecast {
    /// Ranked peers, best first.
    pub peers: Vec<PredictedPeer>,
    /// Clamped to [0.3, 0.95].
    pub confidence: f64,
    /// Whether any Markov state contributed.
    pub used_markov: bool,
}

impl PeerForecast {
    /// Rescale the confidence by `factor`, staying inside the usual bounds.
    /// Used when the similar set came from the volume fallback rather than a
    /// tier match.
    pub fn discount(&mut self, factor: f64) {
        self.confidence = (self.confidence * factor).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING);
    }
}

/// Predict the top-N likely peers of `target` from its similar set. Returns
/// `None` when neither Markov states nor correlation rows yielded any signal
/// at all.
pub fn predict_peers(
    target: &str,
    similars: &[SimilarEntity],
    markov: &MarkovModel,
    correlation: &CorrelationAnalyzer,
    top_n: usize,
) -> Option<PeerForecast> {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    let mut markov_total = 0.0f64;
    let mut markov_by_peer: BTreeMap<String, f64> = BTreeMap::new();
    let mut correlation_mass = 0.0f64;
    let mut used_markov = false;

    for similar in similars {
        let rank_weight = 1.0 / similar.rank as f64;
        if let Some(distribution) = markov.query(&similar.id) {
            used_markov = true;
            for (peer, probability) in distribution {
                if peer == target {
                    continue;
                }
                let contribution = probability * rank_weight;
                *scores.entry(peer.clone()).or_default() += contribution;
                *markov_by_peer.entry(peer.clone()).or_default() += contribution;
                markov_total += contribution;
            }
        }
        for (peer, strength) in correlation.transitive_row(&similar.id) {
            if peer == target {
                continue;
            }
            let contribution = strength * CORRELATION_PEER_WEIGHT;
            *scores.entry(peer.to_string()).or_default() += contribution;
            correlation_mass += contribution;
        }
    }

    if scores.is_empty() {
        return None;
    }

    // Deterministic ranking: score desc, peer name asc (BTreeMap order is
    // already name-ordered, stable sort keeps it for equal scores).
    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_n);

    // Transition mass actually captured by the returned peers.
    let captured: f64 = ranked
        .iter()
        .filter_map(|(peer, _)| markov_by_peer.get(peer))
        .sum();
    let captured_ratio = if markov_total > 0.0 {
        captured / markov_total
    } else {
        0.0
    };

    let similar_term = 0.3 * (similars.len().min(5) as f64 / 5.0);
    let mass_term = 0.25 * captured_ratio;
    let correlation_boost = correlation_mass.min(MAX_CORRELATION_BOOST);
    let confidence = (CONFIDENCE_FLOOR + similar_term + mass_term + correlation_boost)
        .clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING);

    Some(PeerForecast {
        peers: ranked
            .into_iter()
            .map(|(peer, score)| PredictedPeer { peer, score })
            .collect(),
        confidence,
        used_markov,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_graph::FlowGraph;
    use crate::types::FlowRecord;
    use zonemesh_core::EngineConfig;

    fn flow(src: &str, dst: &str) -> FlowRecord {
        FlowRecord {
            source: src.to_string(),
            destination: dst.to_string(),
            bytes: 512,
            protocol: "tcp".to_string(),
            port: None,
        }
    }

    fn similar(id: &str, rank: usize) -> SimilarEntity {
        SimilarEntity {
            id: id.to_string(),
            rank,
            volume: 10,
            tier_match: true,
        }
    }

    fn setup(flows: &[FlowRecord]) -> (MarkovModel, CorrelationAnalyzer) {
        let mut graph = FlowGraph::new();
        graph.add_flows(flows);
        (
            MarkovModel::build(&graph),
            CorrelationAnalyzer::analyze(&graph, &EngineConfig::default()),
        )
    }

    #[test]
    fn test_peers_ranked_by_accumulated_mass() {
        let (markov, correlation) = setup(&[
            flow("web-01", "app-01"),
            flow("web-01", "app-01"),
            flow("web-01", "app-02"),
            flow("web-02", "app-01"),
        ]);
        let forecast = predict_peers(
            "web-99",
            &[similar("web-01", 1), similar("web-02", 2)],
            &markov,
            &correlation,
            10,
        )
        .unwrap();
        assert!(forecast.used_markov);
        assert_eq!(forecast.peers[0].peer, "app-01");
        assert!(forecast.peers[0].score > forecast.peers[1].score);
    }

    #[test]
    fn test_confidence_clamped() {
        let (markov, correlation) = setup(&[flow("a", "b")]);
        let forecast = predict_peers("x", &[similar("a", 1)], &markov, &correlation, 10).unwrap();
        assert!(forecast.confidence >= 0.3);
        assert!(forecast.confidence <= 0.95);
    }

    #[test]
    fn test_no_signal_returns_none() {
        let (markov, correlation) = setup(&[flow("a", "b")]);
        // "b" has no Markov state and no correlation rows.
        assert!(predict_peers("x", &[similar("b", 1)], &markov, &correlation, 10).is_none());
    }

    #[test]
    fn test_target_excluded_from_peer_list() {
        let (markov, correlation) = setup(&[flow("a", "x"), flow("a", "b")]);
        let forecast = predict_peers("x", &[similar("a", 1)], &markov, &correlation, 10).unwrap();
        assert!(forecast.peers.iter().all(|p| p.peer != "x"));
    }

    #[test]
    fn test_discount_rescales_within_bounds() {
        let (markov, correlation) = setup(&[
            flow("web-01", "app-01"),
            flow("web-01", "app-02"),
            flow("web-02", "app-01"),
        ]);
        let forecast = predict_peers(
            "web-99",
            &[similar("web-01", 1), similar("web-02", 2)],
            &markov,
            &correlation,
            10,
        )
        .unwrap();

        let mut discounted = forecast.clone();
        discounted.discount(0.8);
        assert!(discounted.confidence < forecast.confidence);
        assert!(discounted.confidence >= 0.3);

        // A crushing factor still lands on the floor, never below.
        let mut floored = forecast.clone();
        floored.discount(0.01);
        assert_eq!(floored.confidence, 0.3);
    }

    #[test]
    fn test_top_n_truncation() {
        let (markov, correlation) = setup(&[
            flow("hub", "p1"),
            flow("hub", "p2"),
            flow("hub", "p3"),
            flow("hub", "p4"),
        ]);
        let forecast = predict_peers("x", &[similar("hub", 1)], &markov, &correlation, 2).unwrap();
        assert_eq!(forecast.peers.len(), 2);
    }
}
