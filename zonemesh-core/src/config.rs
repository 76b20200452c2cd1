//! # Engine Configuration — Typed, operator-tunable TOML configuration
//!
//! All inference thresholds and the naming-heuristic keyword table live here
//! rather than as compiled-in constants. The keyword table carries a version
//! number so operators can track which table produced a given prediction.

use crate::error::{ZoneError, ZoneResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Correlation scores below this are never stored (sparse tables).
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,
    /// Discount applied to transitive (peer-of-peer) correlation. Stored
    /// transitive strength never exceeds this value.
    #[serde(default = "default_transitive_decay")]
    pub transitive_decay: f64,
    /// How many comparable observed entities the similarity matcher returns.
    #[serde(default = "default_similar_top_k")]
    pub similar_top_k: usize,
    /// How many predicted peers a prediction carries.
    #[serde(default = "default_peer_top_n")]
    pub peer_top_n: usize,
    /// Decay constant for the bounded EMA updating ensemble vote weights.
    #[serde(default = "default_ema_decay")]
    pub ema_decay: f64,
    /// Lower bound on an ensemble model's vote weight.
    #[serde(default = "default_weight_floor")]
    pub weight_floor: f64,
    /// Upper bound on an ensemble model's vote weight.
    #[serde(default = "default_weight_ceiling")]
    pub weight_ceiling: f64,
    /// When true, predict() on an untrained engine answers from the naming
    /// heuristic instead of failing with NotTrained.
    #[serde(default)]
    pub heuristic_only_when_untrained: bool,
    /// Naming-heuristic keyword table.
    #[serde(default)]
    pub keywords: KeywordTable,
}

fn default_significance_threshold() -> f64 {
    crate::DEFAULT_SIGNIFICANCE_THRESHOLD
}
fn default_transitive_decay() -> f64 {
    crate::DEFAULT_TRANSITIVE_DECAY
}
fn default_similar_top_k() -> usize {
    5
}
fn default_peer_top_n() -> usize {
    10
}
fn default_ema_decay() -> f64 {
    0.2
}
fn default_weight_floor() -> f64 {
    0.1
}
fn default_weight_ceiling() -> f64 {
    3.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            significance_threshold: default_significance_threshold(),
            transitive_decay: default_transitive_decay(),
            similar_top_k: default_similar_top_k(),
            peer_top_n: default_peer_top_n(),
            ema_decay: default_ema_decay(),
            weight_floor: default_weight_floor(),
            weight_ceiling: default_weight_ceiling(),
            heuristic_only_when_untrained: false,
            keywords: KeywordTable::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn from_toml_path(path: impl AsRef<Path>) -> ZoneResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| ZoneError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!(
            path = %path.display(),
            keyword_version = config.keywords.version,
            "Engine configuration loaded"
        );
        Ok(config)
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> ZoneResult<()> {
        if !(0.0..=1.0).contains(&self.significance_threshold) {
            return Err(ZoneError::Config(
                "significance_threshold must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.transitive_decay) {
            return Err(ZoneError::Config("transitive_decay must be in [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.ema_decay) {
            return Err(ZoneError::Config("ema_decay must be in [0, 1]".into()));
        }
        if self.similar_top_k == 0 || self.peer_top_n == 0 {
            return Err(ZoneError::Config(
                "similar_top_k and peer_top_n must be at least 1".into(),
            ));
        }
        if self.weight_floor <= 0.0 || self.weight_floor >= self.weight_ceiling {
            return Err(ZoneError::Config(
                "weight bounds must satisfy 0 < floor < ceiling".into(),
            ));
        }
        if self.keywords.tiers.is_empty() {
            return Err(ZoneError::Config("keyword table has no tiers".into()));
        }
        for tier in &self.keywords.tiers {
            if tier.patterns.is_empty() {
                return Err(ZoneError::Config(format!(
                    "keyword tier '{}' has no patterns",
                    tier.tier
                )));
            }
            if !(0.0..=1.0).contains(&tier.strength) {
                return Err(ZoneError::Config(format!(
                    "keyword tier '{}' strength must be in [0, 1]",
                    tier.tier
                )));
            }
        }
        Ok(())
    }
}

/// Versioned naming-heuristic keyword table: tier → ordered match patterns
/// with a prefix-match strength. Earlier tiers win when several match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordTable {
    /// Operator-bumped version, recorded so predictions are attributable to
    /// a specific table revision.
    #[serde(default = "default_table_version")]
    pub version: u32,
    #[serde(default)]
    pub tiers: Vec<TierPattern>,
}

fn default_table_version() -> u32 {
    1
}

/// One tier's naming patterns. `tier` is a stable key the engine maps to a
/// security zone ("web", "app", "data", "cache", "messaging", "management",
/// "infrastructure").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPattern {
    pub tier: String,
    pub patterns: Vec<String>,
    /// Confidence for an exact-prefix name match. Substring matches score
    /// 0.15 below this.
    pub strength: f64,
}

impl Default for KeywordTable {
    fn default() -> Self {
        let tier = |tier: &str, patterns: &[&str], strength: f64| TierPattern {
            tier: tier.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            strength,
        };
        Self {
            version: default_table_version(),
            tiers: vec![
                tier("data", &["db", "sql", "data", "postgres", "oracle", "mongo"], 0.75),
                tier("web", &["web", "www", "frontend", "ui", "portal"], 0.72),
                tier("cache", &["cache", "redis", "memcache"], 0.70),
                tier("messaging", &["mq", "kafka", "queue", "rabbit", "amqp"], 0.70),
                tier("app", &["app", "api", "svc", "service", "backend"], 0.68),
                tier("management", &["mgmt", "admin", "jump", "bastion", "monitor"], 0.67),
                tier("infrastructure", &["dns", "ntp", "ldap", "proxy", "lb", "infra"], 0.65),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zonemesh.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let loaded = EngineConfig::from_toml_path(&path).unwrap();
        assert_eq!(loaded.similar_top_k, config.similar_top_k);
        assert_eq!(loaded.keywords.tiers.len(), config.keywords.tiers.len());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("similar_top_k = 3").unwrap();
        assert_eq!(config.similar_top_k, 3);
        assert_eq!(config.peer_top_n, 10);
        assert!(!config.keywords.tiers.is_empty());
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let mut config = EngineConfig::default();
        config.significance_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_tier_rejected() {
        let mut config = EngineConfig::default();
        config.keywords.tiers[0].patterns.clear();
        assert!(config.validate().is_err());
    }
}
