//! Peer Correlation Analyzer — first-order and transitive entity similarity
//!
//! Features:
//! - First-order: Jaccard similarity of direct out-peer sets. Symmetric by
//!   construction, defined only when the union is non-empty.
//! - Transitive: peer-of-peer reachability, discounted by a decay factor so
//!   inferred signal never outranks direct observation. Stored strength
//!   never exceeds the decay factor. Not necessarily symmetric.
//! - Sparse storage: only pairs at or above the significance threshold are
//!   retained, keeping memory bounded by observed structure.
//! - Self-loops are excluded from peer sets before any comparison.

use crate::flow_graph::FlowGraph;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use zonemesh_core::{EngineConfig, SparseScoreMatrix};

#[derive(Debug, Clone)]
pub struct CorrelationAnalyzer {
    first_order: SparseScoreMatrix,
    transitive: SparseScoreMatrix,
    decay: f64,
}

impl CorrelationAnalyzer {
    /// Full pairwise analysis of the graph. O(N²) over entities with
    /// outgoing edges; the significance threshold keeps storage sparse.
    pub fn analyze(graph: &FlowGraph, config: &EngineConfig) -> Self {
        let threshold = config.significance_threshold;
        let decay = config.transitive_decay;
        let mut first_order = SparseScoreMatrix::new(threshold);
        let mut transitive = SparseScoreMatrix::new(threshold);

        // Out-peer sets with self-loops removed.
        let peer_sets: BTreeMap<String, BTreeSet<String>> = graph
            .observed_entities()
            .into_iter()
            .filter_map(|entity| {
                let peers: BTreeSet<String> = graph
                    .out_peers(&entity)?
                    .iter()
                    .filter(|p| p.as_str() != entity)
                    .cloned()
                    .collect();
                if peers.is_empty() {
                    None
                } else {
                    Some((entity, peers))
                }
            })
            .collect();

        let entities: Vec<&String> = peer_sets.keys().collect();
        for (i, a) in entities.iter().enumerate() {
            for b in entities.iter().skip(i + 1) {
                let set_a = &peer_sets[*a];
                let set_b = &peer_sets[*b];
                let union = set_a.union(set_b).count();
                if union == 0 {
                    continue;
                }
                let intersection = set_a.intersection(set_b).count();
                let jaccard = intersection as f64 / union as f64;
                first_order.insert_symmetric(a, b, jaccard);
            }
        }

        // Transitive: A → n → C. strength = min(matches / |N(A)|, 1) × decay.
        for (a, peers_a) in &peer_sets {
            let mut matches: BTreeMap<&str, usize> = BTreeMap::new();
            for intermediate in peers_a {
                if let Some(peers_n) = peer_sets.get(intermediate) {
                    for candidate in peers_n {
                        if candidate != a {
                            *matches.entry(candidate.as_str()).or_default() += 1;
                        }
                    }
                }
            }
            for (candidate, count) in matches {
                let strength = (count as f64 / peers_a.len() as f64).min(1.0) * decay;
                transitive.insert(a, candidate, strength);
            }
        }

        debug!(
            first_order = first_order.len(),
            transitive = transitive.len(),
            "Peer correlation tables built"
        );
        Self {
            first_order,
            transitive,
            decay,
        }
    }

    /// First-order (direct peer-set) correlation between two entities.
    pub fn first_order(&self, a: &str, b: &str) -> Option<f64> {
        self.first_order.get(a, b)
    }

    /// Transitive correlation from `a` toward stored candidates.
    pub fn transitive_row(&self, a: &str) -> impl Iterator<Item = (&str, f64)> {
        self.transitive.row(a)
    }

    pub fn transitive(&self, a: &str, b: &str) -> Option<f64> {
        self.transitive.get(a, b)
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// Stored pair count across both tables; symmetric first-order pairs
    /// counted once.
    pub fn pair_count(&self) -> usize {
        self.first_order.len() / 2 + self.transitive.len()
    }

    pub fn to_snapshot(&self) -> CorrelationSnapshot {
        CorrelationSnapshot {
            threshold: self.first_order.threshold(),
            decay: self.decay,
            first_order: self.first_order.entries(),
            transitive: self.transitive.entries(),
        }
    }

    pub fn from_snapshot(snapshot: &CorrelationSnapshot) -> Self {
        Self {
            first_order: SparseScoreMatrix::from_entries(
                snapshot.threshold,
                &snapshot.first_order,
            ),
            transitive: SparseScoreMatrix::from_entries(snapshot.threshold, &snapshot.transitive),
            decay: snapshot.decay,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CorrelationSnapshot {
    pub threshold: f64,
    pub decay: f64,
    pub first_order: Vec<(String, String, f64)>,
    pub transitive: Vec<(String, String, f64)>,
}
