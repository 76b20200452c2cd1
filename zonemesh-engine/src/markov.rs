//! Markov Transition Model — per-entity next-hop peer distributions
//!
//! For each entity with outgoing edges, the probability of its next
//! communication going to peer p is weight(entity, p) / Σ weight(entity, *).
//! Entities with no outgoing edges have no state at all: absence is
//! distinguishable from a legitimate all-zero distribution, and callers must
//! treat the two differently.

use crate::flow_graph::FlowGraph;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MarkovModel {
    states: BTreeMap<String, BTreeMap<String, f64>>,
}

impl MarkovModel {
    /// Compute normalized transition distributions from aggregated edge
    /// weights. Wholly recomputed on every train; never patched.
    pub fn build(graph: &FlowGraph) -> Self {
        let mut states = BTreeMap::new();
        for entity in graph.observed_entities() {
            let total: u64 = graph.out_edges(&entity).map(|(_, e)| e.weight).sum();
            if total == 0 {
                continue;
            }
            let distribution: BTreeMap<String, f64> = graph
                .out_edges(&entity)
                .map(|(peer, edge)| (peer.to_string(), edge.weight as f64 / total as f64))
                .collect();
            states.insert(entity, distribution);
        }
        debug!(states = states.len(), "Markov transition model built");
        Self { states }
    }

    /// The transition distribution for `entity`, or `None` for entities the
    /// model never saw emit a flow.
    pub fn query(&self, entity: &str) -> Option<&BTreeMap<String, f64>> {
        self.states.get(entity)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, f64>)> {
        self.states.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FlowRecord;

    fn flow(src: &str, dst: &str) -> FlowRecord {
        FlowRecord {
            source: src.to_string(),
            destination: dst.to_string(),
            bytes: 64,
            protocol: "tcp".to_string(),
            port: None,
        }
    }

    #[test]
    fn test_distributions_normalized() {
        let mut graph = FlowGraph::new();
        graph.add_flows(&[
            flow("a", "b"),
            flow("a", "b"),
            flow("a", "c"),
            flow("b", "c"),
        ]);
        let model = MarkovModel::build(&graph);

        for (_, distribution) in model.iter() {
            let sum: f64 = distribution.values().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        let a = model.query("a").unwrap();
        assert!((a["b"] - 2.0 / 3.0).abs() < 1e-9);
        assert!((a["c"] - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_sink_entity_has_no_state() {
        let mut graph = FlowGraph::new();
        graph.add_flows(&[flow("a", "b")]);
        let model = MarkovModel::build(&graph);
        assert!(model.query("a").is_some());
        // b only receives; absence, not a zero distribution
        assert!(model.query("b").is_none());
        assert!(model.query("nonexistent").is_none());
    }

    #[test]
    fn test_rebuild_replaces_state() {
        let mut graph = FlowGraph::new();
        graph.add_flows(&[flow("a", "b")]);
        let first = MarkovModel::build(&graph);
        assert_eq!(first.len(), 1);

        graph.add_flows(&[flow("c", "d")]);
        let second = MarkovModel::build(&graph);
        assert_eq!(second.len(), 2);
        assert_eq!(first.len(), 1);
    }
}
