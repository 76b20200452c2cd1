//! Similarity Matcher — comparable observed entities for an unobserved one
//!
//! Buckets the target into a coarse tier via the keyword table, then ranks
//! observed entities sharing that tier by traffic volume (more data means
//! more reliable downstream models). When the tier matches nothing observed,
//! falls back to the highest-volume observed entities overall at reduced
//! confidence. The candidate set is never empty as long as anything has ever
//! been observed; a truly empty observed set is `NoCandidates`, which is a
//! different condition from a volume-based fallback.

use crate::flow_graph::FlowGraph;
use crate::heuristics::match_tier;
use tracing::debug;
use zonemesh_core::{KeywordTable, ZoneError, ZoneResult};

/// One comparable observed entity, rank 1 = most comparable.
#[derive(Debug, Clone)]
pub struct SimilarEntity {
    pub id: String,
    pub rank: usize,
    pub volume: u64,
    /// Whether this candidate shares the target's keyword tier (false for
    /// volume-fallback candidates).
    pub tier_match: bool,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub candidates: Vec<SimilarEntity>,
    /// The tier the target bucketed into, if any.
    pub tier: Option<String>,
    /// True when no tier candidate existed and the volume fallback was used.
    pub fallback: bool,
}

/// Find the top-K observed entities most comparable to `name`.
pub fn find_similar(
    name: &str,
    graph: &FlowGraph,
    table: &KeywordTable,
    top_k: usize,
) -> ZoneResult<MatchResult> {
    let observed = graph.observed_entities();
    if observed.is_empty() {
        return Err(ZoneError::NoCandidates);
    }

    let target_tier = match_tier(name, table).map(|(tier, _)| tier.tier.clone());

    // (volume desc, name asc) ordering; observed_entities is already
    // name-ordered, so a stable sort by volume gives both.
    let ranked = |ids: Vec<String>, tier_match: bool| -> Vec<SimilarEntity> {
        let mut scored: Vec<(String, u64)> = ids
            .into_iter()
            .map(|id| {
                let volume = graph.traffic_volume(&id);
                (id, volume)
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (id, volume))| SimilarEntity {
                id,
                rank: i + 1,
                volume,
                tier_match,
            })
            .collect()
    };

    if let Some(tier) = &target_tier {
        let tier_candidates: Vec<String> = observed
            .iter()
            .filter(|id| id.as_str() != name)
            .filter(|id| {
                match_tier(id, table)
                    .map(|(t, _)| t.tier == *tier)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if !tier_candidates.is_empty() {
            let candidates = ranked(tier_candidates, true);
            debug!(
                target = name,
                tier = tier.as_str(),
                candidates = candidates.len(),
                "Similarity matched by tier"
            );
            return Ok(MatchResult {
                candidates,
                tier: target_tier,
                fallback: false,
            });
        }
    }

    // Volume fallback: the K busiest observed entities, any tier.
    let all: Vec<String> = observed
        .iter()
        .filter(|id| id.as_str() != name)
        .cloned()
        .collect();
    if all.is_empty() {
        // The only observed entity is the target itself.
        return Err(ZoneError::NoCandidates);
    }
    let candidates = ranked(all, false);
    debug!(
        target = name,
        candidates = candidates.len(),
        "Similarity fell back to highest-volume entities"
    );
    Ok(MatchResult {
        candidates,
        tier: target_tier,
        fallback: true,
    })
}
