//! Naming-Heuristic Fallback — zone classification from the entity name alone
//!
//! Pure function over the entity name and the operator-tunable keyword table.
//! Exact-prefix matches use the tier's configured strength (defaults
//! 0.65–0.75); substring matches score 0.15 lower; no match at all returns
//! the generic default zone at 0.3. Always succeeds: this is the engine's
//! last line of graceful degradation.

use crate::models::ZoneVote;
use crate::types::Zone;
use zonemesh_core::{KeywordTable, TierPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Prefix,
    Substring,
}

/// First tier whose patterns match the (lowercased) name. Prefix matches on
/// any tier beat substring matches on any tier; within a kind, table order
/// wins.
pub fn match_tier<'a>(name: &str, table: &'a KeywordTable) -> Option<(&'a TierPattern, MatchKind)> {
    let lowered = name.to_ascii_lowercase();
    for tier in &table.tiers {
        for pattern in &tier.patterns {
            if lowered.starts_with(pattern.as_str()) {
                return Some((tier, MatchKind::Prefix));
            }
        }
    }
    for tier in &table.tiers {
        for pattern in &tier.patterns {
            if lowered.contains(pattern.as_str()) {
                return Some((tier, MatchKind::Substring));
            }
        }
    }
    None
}

/// Zone guess for an entity name. Never fails.
pub fn heuristic_zone(name: &str, table: &KeywordTable) -> ZoneVote {
    match match_tier(name, table) {
        Some((tier, kind)) => {
            let zone = Zone::from_tier(&tier.tier).unwrap_or(Zone::Unclassified);
            let confidence = match kind {
                MatchKind::Prefix => tier.strength,
                MatchKind::Substring => (tier.strength - 0.15).max(0.3),
            };
            ZoneVote { zone, confidence }
        }
        None => ZoneVote {
            zone: Zone::Unclassified,
            confidence: 0.3,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_match_uses_tier_strength() {
        let table = KeywordTable::default();
        let vote = heuristic_zone("web-frontend-01", &table);
        assert_eq!(vote.zone, Zone::Web);
        assert!((0.65..=0.75).contains(&vote.confidence));
    }

    #[test]
    fn test_substring_match_scores_lower() {
        let table = KeywordTable::default();
        let prefix = heuristic_zone("db-primary", &table);
        let substring = heuristic_zone("primary-db", &table);
        assert_eq!(prefix.zone, Zone::Data);
        assert_eq!(substring.zone, Zone::Data);
        assert!(substring.confidence < prefix.confidence);
        assert!((0.5..=0.6).contains(&substring.confidence));
    }

    #[test]
    fn test_no_match_returns_generic_default() {
        let table = KeywordTable::default();
        let vote = heuristic_zone("zzz-0x7f", &table);
        assert_eq!(vote.zone, Zone::Unclassified);
        assert_eq!(vote.confidence, 0.3);
    }

    #[test]
    fn test_prefix_beats_substring_across_tiers() {
        let table = KeywordTable::default();
        // "cache-db" prefixes the cache tier even though "db" appears inside.
        let vote = heuristic_zone("cache-db-01", &table);
        assert_eq!(vote.zone, Zone::Cache);
    }

    #[test]
    fn test_case_insensitive() {
        let table = KeywordTable::default();
        assert_eq!(heuristic_zone("WEB-01", &table).zone, Zone::Web);
    }
}
