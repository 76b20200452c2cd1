//! Flow Graph Builder — weighted directed entity graph from raw flow records
//!
//! Features:
//! - O(1) amortized edge upsert: repeated observations aggregate, never
//!   duplicate (at most one edge per ordered pair)
//! - Weight/byte totals monotonically non-decreasing within a generation
//! - Malformed records (missing an endpoint id) skipped and counted, never
//!   raised as errors
//! - Self-loops retained in the graph (peer correlation excludes them)
//! - Deterministic iteration: ordered maps throughout, so every downstream
//!   computation over the graph is reproducible
//!
//! Also home to the feature extractor: a pure function of graph state that
//! derives fixed-size numeric summaries per entity.

use crate::types::{FlowEdge, FlowRecord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

// ── Flow Graph ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    edges: BTreeMap<(String, String), FlowEdge>,
    out_adj: BTreeMap<String, BTreeSet<String>>,
    in_adj: BTreeMap<String, BTreeSet<String>>,
    malformed: u64,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a batch of flow records. Returns how many were skipped as
    /// malformed in this batch.
    pub fn add_flows(&mut self, records: &[FlowRecord]) -> u64 {
        let before = self.malformed;
        for record in records {
            self.add_flow(record);
        }
        self.malformed - before
    }

    /// Upsert one edge. A record missing either endpoint id is counted and
    /// dropped.
    pub fn add_flow(&mut self, record: &FlowRecord) {
        let src = record.source.trim();
        let dst = record.destination.trim();
        if src.is_empty() || dst.is_empty() {
            self.malformed += 1;
            warn!(
                source = %record.source,
                destination = %record.destination,
                "Skipping malformed flow record (missing endpoint id)"
            );
            return;
        }

        let edge = self
            .edges
            .entry((src.to_string(), dst.to_string()))
            .or_default();
        edge.weight += 1;
        edge.bytes += record.bytes;
        if !record.protocol.is_empty() {
            edge.protocols.insert(record.protocol.to_ascii_lowercase());
        }
        if let Some(port) = record.port {
            edge.ports.insert(port);
        }

        self.out_adj
            .entry(src.to_string())
            .or_default()
            .insert(dst.to_string());
        self.in_adj
            .entry(dst.to_string())
            .or_default()
            .insert(src.to_string());
    }

    pub fn edge(&self, src: &str, dst: &str) -> Option<&FlowEdge> {
        self.edges.get(&(src.to_string(), dst.to_string()))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// Every entity that appears as an endpoint of at least one edge.
    pub fn observed_entities(&self) -> BTreeSet<String> {
        let mut entities = BTreeSet::new();
        for (src, dst) in self.edges.keys() {
            entities.insert(src.clone());
            entities.insert(dst.clone());
        }
        entities
    }

    pub fn is_observed(&self, entity: &str) -> bool {
        self.out_adj.contains_key(entity) || self.in_adj.contains_key(entity)
    }

    pub fn out_peers(&self, entity: &str) -> Option<&BTreeSet<String>> {
        self.out_adj.get(entity)
    }

    pub fn in_peers(&self, entity: &str) -> Option<&BTreeSet<String>> {
        self.in_adj.get(entity)
    }

    /// Outgoing edges of `entity` as (peer, edge) pairs, in peer order.
    pub fn out_edges<'a>(
        &'a self,
        entity: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a FlowEdge)> + 'a {
        self.edges
            .range((entity.to_string(), String::new())..)
            .take_while(move |((src, _), _)| src.as_str() == entity)
            .map(|((_, dst), edge)| (dst.as_str(), edge))
    }

    /// Total observed flow count touching `entity`, either direction. Used
    /// as the tie-breaking "traffic volume" signal: more data means more
    /// reliable downstream models.
    pub fn traffic_volume(&self, entity: &str) -> u64 {
        self.edges
            .iter()
            .filter(|((src, dst), _)| src.as_str() == entity || dst.as_str() == entity)
            .map(|(_, edge)| edge.weight)
            .sum()
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = (&str, &str, &FlowEdge)> {
        self.edges
            .iter()
            .map(|((src, dst), edge)| (src.as_str(), dst.as_str(), edge))
    }

    /// Flatten for snapshotting.
    pub fn to_edge_list(&self) -> Vec<(String, String, FlowEdge)> {
        self.edges
            .iter()
            .map(|((src, dst), edge)| (src.clone(), dst.clone(), edge.clone()))
            .collect()
    }

    /// Rebuild from a snapshot edge list.
    pub fn from_edge_list(edges: &[(String, String, FlowEdge)], malformed: u64) -> Self {
        let mut graph = Self::new();
        for (src, dst, edge) in edges {
            graph.edges.insert((src.clone(), dst.clone()), edge.clone());
            graph
                .out_adj
                .entry(src.clone())
                .or_default()
                .insert(dst.clone());
            graph
                .in_adj
                .entry(dst.clone())
                .or_default()
                .insert(src.clone());
        }
        graph.malformed = malformed;
        graph
    }
}

// ── Entity Features ─────────────────────────────────────────────────────────

/// Fixed-size numeric summary of one entity's position in the flow graph.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EntityFeatures {
    pub in_degree: u64,
    pub out_degree: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub distinct_peers: u64,
    pub protocol_diversity: u64,
    /// An edge touches an entity outside the known catalog.
    pub external_exposure: bool,
}

impl EntityFeatures {
    /// Fixed-order numeric vector for the representation models.
    pub fn as_vector(&self) -> Vec<f64> {
        vec![
            self.in_degree as f64,
            self.out_degree as f64,
            (self.bytes_in as f64).ln_1p(),
            (self.bytes_out as f64).ln_1p(),
            self.distinct_peers as f64,
            self.protocol_diversity as f64,
            if self.external_exposure { 1.0 } else { 0.0 },
        ]
    }

    pub const DIM: usize = 7;
}

/// Pure function of graph state: identical graph always yields identical
/// features. Computed for every observed entity.
pub fn extract_features(
    graph: &FlowGraph,
    catalog: &BTreeSet<String>,
) -> BTreeMap<String, EntityFeatures> {
    let mut features: BTreeMap<String, EntityFeatures> = BTreeMap::new();

    for (src, dst, edge) in graph.iter_edges() {
        {
            let f = features.entry(src.to_string()).or_default();
            f.out_degree += 1;
            f.bytes_out += edge.bytes;
            if !catalog.contains(dst) {
                f.external_exposure = true;
            }
        }
        {
            let f = features.entry(dst.to_string()).or_default();
            f.in_degree += 1;
            f.bytes_in += edge.bytes;
            if !catalog.contains(src) {
                f.external_exposure = true;
            }
        }
    }

    for (entity, f) in features.iter_mut() {
        let mut peers: BTreeSet<&str> = BTreeSet::new();
        let mut protocols: BTreeSet<&str> = BTreeSet::new();
        if let Some(out) = graph.out_peers(entity) {
            peers.extend(out.iter().map(|p| p.as_str()));
        }
        if let Some(inp) = graph.in_peers(entity) {
            peers.extend(inp.iter().map(|p| p.as_str()));
        }
        peers.remove(entity.as_str());
        for (_, _, edge) in graph
            .iter_edges()
            .filter(|(s, d, _)| *s == entity.as_str() || *d == entity.as_str())
        {
            protocols.extend(edge.protocols.iter().map(|p| p.as_str()));
        }
        f.distinct_peers = peers.len() as u64;
        f.protocol_diversity = protocols.len() as u64;
    }

    features
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(src: &str, dst: &str, bytes: u64, protocol: &str, port: Option<u16>) -> FlowRecord {
        FlowRecord {
            source: src.to_string(),
            destination: dst.to_string(),
            bytes,
            protocol: protocol.to_string(),
            port,
        }
    }

    #[test]
    fn test_repeated_observations_aggregate() {
        let mut graph = FlowGraph::new();
        graph.add_flows(&[
            flow("web-01", "app-01", 100, "tcp", Some(8080)),
            flow("web-01", "app-01", 250, "tcp", Some(8443)),
        ]);
        assert_eq!(graph.edge_count(), 1);
        let edge = graph.edge("web-01", "app-01").unwrap();
        assert_eq!(edge.weight, 2);
        assert_eq!(edge.bytes, 350);
        assert_eq!(edge.ports.len(), 2);
    }

    #[test]
    fn test_weight_and_bytes_monotone() {
        let mut graph = FlowGraph::new();
        let mut last = (0, 0);
        for i in 0..10 {
            graph.add_flow(&flow("a", "b", i * 10, "udp", None));
            let edge = graph.edge("a", "b").unwrap();
            assert!(edge.weight > last.0);
            assert!(edge.bytes >= last.1);
            last = (edge.weight, edge.bytes);
        }
    }

    #[test]
    fn test_malformed_records_counted_not_raised() {
        let mut graph = FlowGraph::new();
        let skipped = graph.add_flows(&[
            flow("", "app-01", 10, "tcp", None),
            flow("web-01", "  ", 10, "tcp", None),
            flow("web-01", "app-01", 10, "tcp", None),
        ]);
        assert_eq!(skipped, 2);
        assert_eq!(graph.malformed_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_self_loops_retained() {
        let mut graph = FlowGraph::new();
        graph.add_flow(&flow("app-01", "app-01", 5, "tcp", None));
        assert!(graph.edge("app-01", "app-01").is_some());
        assert!(graph.out_peers("app-01").unwrap().contains("app-01"));
    }

    #[test]
    fn test_traffic_volume_counts_both_directions() {
        let mut graph = FlowGraph::new();
        graph.add_flows(&[
            flow("a", "b", 1, "tcp", None),
            flow("a", "b", 1, "tcp", None),
            flow("c", "a", 1, "tcp", None),
        ]);
        assert_eq!(graph.traffic_volume("a"), 3);
        assert_eq!(graph.traffic_volume("b"), 2);
    }

    #[test]
    fn test_features_deterministic_and_external_exposure() {
        let mut graph = FlowGraph::new();
        graph.add_flows(&[
            flow("web-01", "app-01", 100, "tcp", Some(8080)),
            flow("app-01", "db-01", 400, "tcp", Some(5432)),
            flow("app-01", "203.0.113.9", 50, "tcp", Some(443)),
        ]);
        let catalog: BTreeSet<String> = ["web-01", "app-01", "db-01"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let a = extract_features(&graph, &catalog);
        let b = extract_features(&graph, &catalog);
        assert_eq!(a, b);

        let app = &a["app-01"];
        assert_eq!(app.in_degree, 1);
        assert_eq!(app.out_degree, 2);
        assert_eq!(app.distinct_peers, 3);
        assert!(app.external_exposure);
        assert!(!a["web-01"].external_exposure);
    }

    #[test]
    fn test_edge_list_round_trip() {
        let mut graph = FlowGraph::new();
        graph.add_flows(&[
            flow("a", "b", 10, "tcp", Some(80)),
            flow("b", "c", 20, "udp", None),
            flow("", "c", 1, "tcp", None),
        ]);
        let rebuilt = FlowGraph::from_edge_list(&graph.to_edge_list(), graph.malformed_count());
        assert_eq!(rebuilt.edge_count(), graph.edge_count());
        assert_eq!(rebuilt.malformed_count(), 1);
        assert_eq!(rebuilt.out_peers("a"), graph.out_peers("a"));
    }
}
