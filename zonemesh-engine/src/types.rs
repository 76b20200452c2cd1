//! Shared data types for the zone inference engine.

use std::collections::BTreeSet;
use std::fmt;

// ── Zones ───────────────────────────────────────────────────────────────────

/// Coarse security classification bucket. Declaration order doubles as the
/// fixed tie-break priority for ensemble votes: when two zones tie on score
/// and aggregate confidence, the one declared first wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    serde::Serialize, serde::Deserialize,
)]
pub enum Zone {
    Web,
    Application,
    Data,
    Cache,
    Messaging,
    Management,
    Infrastructure,
    Unclassified,
}

impl Zone {
    pub const ALL: &'static [Zone] = &[
        Zone::Web,
        Zone::Application,
        Zone::Data,
        Zone::Cache,
        Zone::Messaging,
        Zone::Management,
        Zone::Infrastructure,
        Zone::Unclassified,
    ];

    /// Parse a ground-truth label. Unknown labels land in `Unclassified`
    /// rather than failing: label quality is a data issue, not an error.
    pub fn from_label(label: &str) -> Zone {
        match label.trim().to_ascii_lowercase().as_str() {
            "web" | "dmz" | "presentation" => Zone::Web,
            "app" | "application" | "service" => Zone::Application,
            "data" | "database" | "db" | "storage" => Zone::Data,
            "cache" | "caching" => Zone::Cache,
            "messaging" | "queue" | "mq" => Zone::Messaging,
            "management" | "mgmt" | "admin" => Zone::Management,
            "infrastructure" | "infra" | "core" => Zone::Infrastructure,
            _ => Zone::Unclassified,
        }
    }

    /// Map a keyword-table tier key to its zone.
    pub fn from_tier(tier: &str) -> Option<Zone> {
        match tier {
            "web" => Some(Zone::Web),
            "app" => Some(Zone::Application),
            "data" => Some(Zone::Data),
            "cache" => Some(Zone::Cache),
            "messaging" => Some(Zone::Messaging),
            "management" => Some(Zone::Management),
            "infrastructure" => Some(Zone::Infrastructure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Web => "web",
            Zone::Application => "application",
            Zone::Data => "data",
            Zone::Cache => "cache",
            Zone::Messaging => "messaging",
            Zone::Management => "management",
            Zone::Infrastructure => "infrastructure",
            Zone::Unclassified => "unclassified",
        }
    }

    /// Tie-break priority: lower is stronger.
    pub fn priority(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Flow telemetry ──────────────────────────────────────────────────────────

/// One observed communication between two entities, as handed over by the
/// (external) log-parsing collaborator.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlowRecord {
    pub source: String,
    pub destination: String,
    pub bytes: u64,
    pub protocol: String,
    pub port: Option<u16>,
}

/// Aggregated directed edge between an ordered (source, destination) pair.
/// Repeated observations accumulate; weight and bytes never decrease within
/// one training generation.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FlowEdge {
    /// Number of flows observed for this pair.
    pub weight: u64,
    /// Total bytes across all observed flows.
    pub bytes: u64,
    pub protocols: BTreeSet<String>,
    pub ports: BTreeSet<u16>,
}

// ── Predictions ─────────────────────────────────────────────────────────────

/// Which sub-systems actually contributed to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MethodUsed {
    /// Ensemble vote only; no usable Markov/correlation peer signal.
    #[serde(rename = "ensemble")]
    Ensemble,
    /// Markov/correlation peer signal only; ensemble produced no vote.
    #[serde(rename = "markov")]
    Markov,
    /// Both ensemble and Markov contributed.
    #[serde(rename = "blended")]
    Blended,
    /// Name-keyword heuristic alone (no observed data was usable).
    #[serde(rename = "heuristic-only")]
    HeuristicOnly,
}

impl MethodUsed {
    pub fn includes_markov(&self) -> bool {
        matches!(self, MethodUsed::Markov | MethodUsed::Blended)
    }

    pub fn includes_ensemble(&self) -> bool {
        matches!(self, MethodUsed::Ensemble | MethodUsed::Blended)
    }
}

impl fmt::Display for MethodUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MethodUsed::Ensemble => "ensemble",
            MethodUsed::Markov => "markov",
            MethodUsed::Blended => "blended",
            MethodUsed::HeuristicOnly => "heuristic-only",
        };
        f.write_str(s)
    }
}

/// One ranked predicted communication peer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PredictedPeer {
    pub peer: String,
    pub score: f64,
}

/// The engine's answer for one entity. Owned by the caller; the engine
/// retains nothing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Prediction {
    pub entity_id: String,
    pub zone: Zone,
    /// Zone confidence in [0, 1].
    pub confidence: f64,
    /// Ranked likely peers, best first.
    pub predicted_peers: Vec<PredictedPeer>,
    /// Peer-list confidence in [0.3, 0.95], absent when no peer signal
    /// existed at all.
    pub peer_confidence: Option<f64>,
    /// Observed entities whose models/transitions informed this prediction,
    /// in similarity-rank order.
    pub contributing_entities: Vec<String>,
    pub method_used: MethodUsed,
}

// ── Training & observability ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TrainingSummary {
    pub entities_trained: usize,
    pub edges: usize,
    pub markov_states_built: usize,
    pub correlation_pairs_found: usize,
    pub malformed_skipped: u64,
    pub trained_at: i64,
}

/// Running engine counters, for operators.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EngineReport {
    pub flows_ingested: u64,
    pub malformed_skipped: u64,
    pub trainings_completed: u64,
    pub predictions_served: u64,
    pub predictions_failed: u64,
    pub heuristic_fallbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_label_parsing() {
        assert_eq!(Zone::from_label("Database"), Zone::Data);
        assert_eq!(Zone::from_label("  WEB "), Zone::Web);
        assert_eq!(Zone::from_label("quantum"), Zone::Unclassified);
    }

    #[test]
    fn test_zone_priority_follows_declaration_order() {
        assert!(Zone::Web.priority() < Zone::Application.priority());
        assert!(Zone::Infrastructure.priority() < Zone::Unclassified.priority());
    }

    #[test]
    fn test_method_serialization_names() {
        let json = serde_json::to_string(&MethodUsed::HeuristicOnly).unwrap();
        assert_eq!(json, "\"heuristic-only\"");
        assert_eq!(MethodUsed::HeuristicOnly.to_string(), "heuristic-only");
    }

    #[test]
    fn test_method_contribution_flags() {
        assert!(MethodUsed::Blended.includes_markov());
        assert!(MethodUsed::Blended.includes_ensemble());
        assert!(!MethodUsed::Ensemble.includes_markov());
        assert!(!MethodUsed::HeuristicOnly.includes_ensemble());
    }
}
