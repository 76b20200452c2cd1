//! Representation Model Ensemble — interchangeable zone-classification models
//!
//! Features:
//! - One polymorphic `RepresentationModel` trait; the orchestrator never
//!   depends on which concrete variant produced a vote
//! - Structural (feature-centroid), sequential (next-hop zone profile), and
//!   reconstruction (per-zone residual error) variants
//! - Fitting tolerates arbitrarily small label sets: output confidence drops,
//!   fitting never fails for lack of data
//! - Per-model version counter incremented on successful fit, used to detect
//!   staleness across retrains
//! - Explicit per-model outcomes: failures are recorded with reasons, never
//!   silently swallowed
//! - `ModelRegistry` is an owned value passed by handle; no process-wide
//!   global state

use crate::flow_graph::{EntityFeatures, FlowGraph};
use crate::types::Zone;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use zonemesh_core::ZoneResult;

// ── Trait & shared types ────────────────────────────────────────────────────

/// Everything a model may look at during fitting.
pub struct ModelInput<'a> {
    pub graph: &'a FlowGraph,
    pub features: &'a BTreeMap<String, EntityFeatures>,
    pub labels: &'a BTreeMap<String, Zone>,
}

/// One model's zone prediction for one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneVote {
    pub zone: Zone,
    pub confidence: f64,
}

pub trait RepresentationModel: Send + Sync {
    fn name(&self) -> &'static str;
    /// Retrain from scratch on the given input. Small or empty label sets
    /// degrade confidence, they do not error.
    fn fit(&mut self, input: &ModelInput<'_>) -> ZoneResult<()>;
    /// Embedding vector for an observed entity, if the model has one.
    fn embed(&self, entity: &str) -> Option<Vec<f64>>;
    /// Zone prediction for an observed entity, if the model can produce one.
    fn predict_zone(&self, entity: &str) -> Option<ZoneVote>;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

/// A recorded per-model failure, kept for observability instead of being
/// swallowed.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelFailure {
    pub model: String,
    pub reason: String,
}

/// Confidence discount for tiny label sets: saturates at 5 labeled entities.
fn label_coverage(labeled: usize) -> f64 {
    0.5 + 0.5 * (labeled.min(5) as f64 / 5.0)
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ── Structural model ────────────────────────────────────────────────────────

/// Classifies by distance to per-zone centroids in (max-normalized) feature
/// space. The graph's structure is what the features summarize, so entities
/// occupying similar topological positions land near the same centroid.
#[derive(Debug, Default)]
pub struct StructuralModel {
    vectors: BTreeMap<String, Vec<f64>>,
    centroids: BTreeMap<Zone, Vec<f64>>,
    labeled: usize,
    version: u64,
}

impl RepresentationModel for StructuralModel {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn fit(&mut self, input: &ModelInput<'_>) -> ZoneResult<()> {
        // Per-dimension max normalization keeps byte counts from drowning
        // out degrees.
        let mut maxima = vec![1.0f64; EntityFeatures::DIM];
        for features in input.features.values() {
            for (i, v) in features.as_vector().iter().enumerate() {
                if *v > maxima[i] {
                    maxima[i] = *v;
                }
            }
        }
        self.vectors = input
            .features
            .iter()
            .map(|(entity, features)| {
                let vector: Vec<f64> = features
                    .as_vector()
                    .iter()
                    .zip(maxima.iter())
                    .map(|(v, m)| v / m)
                    .collect();
                (entity.clone(), vector)
            })
            .collect();

        let mut sums: BTreeMap<Zone, (Vec<f64>, usize)> = BTreeMap::new();
        let mut labeled = 0;
        for (entity, zone) in input.labels {
            if let Some(vector) = self.vectors.get(entity) {
                let (sum, count) = sums
                    .entry(*zone)
                    .or_insert_with(|| (vec![0.0; EntityFeatures::DIM], 0));
                for (s, v) in sum.iter_mut().zip(vector.iter()) {
                    *s += v;
                }
                *count += 1;
                labeled += 1;
            }
        }
        self.centroids = sums
            .into_iter()
            .map(|(zone, (sum, count))| {
                (zone, sum.iter().map(|s| s / count as f64).collect())
            })
            .collect();
        self.labeled = labeled;
        self.version += 1;
        debug!(
            centroids = self.centroids.len(),
            labeled, "Structural model fitted"
        );
        Ok(())
    }

    fn embed(&self, entity: &str) -> Option<Vec<f64>> {
        self.vectors.get(entity).cloned()
    }

    fn predict_zone(&self, entity: &str) -> Option<ZoneVote> {
        let vector = self.vectors.get(entity)?;
        // Zone iteration order breaks exact-distance ties deterministically.
        let (zone, distance) = self
            .centroids
            .iter()
            .map(|(zone, centroid)| (*zone, squared_distance(vector, centroid)))
            .fold(None::<(Zone, f64)>, |best, (zone, d)| match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((zone, d)),
            })?;
        let confidence = (1.0 / (1.0 + distance.sqrt())) * label_coverage(self.labeled);
        Some(ZoneVote { zone, confidence })
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

// ── Sequential model ────────────────────────────────────────────────────────

/// Classifies by next-hop zone profile: the distribution, over an entity's
/// outgoing flow weight, of which zones it talks to. Entities in the same
/// zone tend to talk downstream to the same zones.
#[derive(Debug, Default)]
pub struct SequentialModel {
    profiles: BTreeMap<String, Vec<f64>>,
    zone_profiles: BTreeMap<Zone, Vec<f64>>,
    labeled: usize,
    version: u64,
}

impl SequentialModel {
    fn profile_for(graph: &FlowGraph, labels: &BTreeMap<String, Zone>, entity: &str) -> Option<Vec<f64>> {
        let mut profile = vec![0.0f64; Zone::ALL.len()];
        let mut total = 0.0f64;
        for (peer, edge) in graph.out_edges(entity) {
            if let Some(zone) = labels.get(peer) {
                profile[zone.priority()] += edge.weight as f64;
                total += edge.weight as f64;
            }
        }
        if total == 0.0 {
            return None;
        }
        for v in profile.iter_mut() {
            *v /= total;
        }
        Some(profile)
    }
}

impl RepresentationModel for SequentialModel {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn fit(&mut self, input: &ModelInput<'_>) -> ZoneResult<()> {
        self.profiles = input
            .graph
            .observed_entities()
            .into_iter()
            .filter_map(|entity| {
                Self::profile_for(input.graph, input.labels, &entity)
                    .map(|profile| (entity, profile))
            })
            .collect();

        let mut sums: BTreeMap<Zone, (Vec<f64>, usize)> = BTreeMap::new();
        let mut labeled = 0;
        for (entity, zone) in input.labels {
            if let Some(profile) = self.profiles.get(entity) {
                let (sum, count) = sums
                    .entry(*zone)
                    .or_insert_with(|| (vec![0.0; Zone::ALL.len()], 0));
                for (s, v) in sum.iter_mut().zip(profile.iter()) {
                    *s += v;
                }
                *count += 1;
                labeled += 1;
            }
        }
        self.zone_profiles = sums
            .into_iter()
            .map(|(zone, (sum, count))| {
                (zone, sum.iter().map(|s| s / count as f64).collect())
            })
            .collect();
        self.labeled = labeled;
        self.version += 1;
        debug!(
            profiles = self.profiles.len(),
            labeled, "Sequential model fitted"
        );
        Ok(())
    }

    fn embed(&self, entity: &str) -> Option<Vec<f64>> {
        self.profiles.get(entity).cloned()
    }

    fn predict_zone(&self, entity: &str) -> Option<ZoneVote> {
        let profile = self.profiles.get(entity)?;
        let (zone, similarity) = self
            .zone_profiles
            .iter()
            .map(|(zone, zp)| (*zone, cosine_similarity(profile, zp)))
            .fold(None::<(Zone, f64)>, |best, (zone, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((zone, s)),
            })?;
        if similarity <= 0.0 {
            return None;
        }
        let confidence = similarity * label_coverage(self.labeled);
        Some(ZoneVote { zone, confidence })
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

// ── Reconstruction model ────────────────────────────────────────────────────

/// Classifies by reconstruction error: how badly each zone's mean feature
/// vector reconstructs the entity. Low error against a zone means the entity
/// looks like that zone's population.
#[derive(Debug, Default)]
pub struct ReconstructionModel {
    vectors: BTreeMap<String, Vec<f64>>,
    zone_means: BTreeMap<Zone, Vec<f64>>,
    global_mean: Vec<f64>,
    labeled: usize,
    version: u64,
}

impl RepresentationModel for ReconstructionModel {
    fn name(&self) -> &'static str {
        "reconstruction"
    }

    fn fit(&mut self, input: &ModelInput<'_>) -> ZoneResult<()> {
        self.vectors = input
            .features
            .iter()
            .map(|(entity, features)| (entity.clone(), features.as_vector()))
            .collect();

        let mut global = vec![0.0f64; EntityFeatures::DIM];
        for vector in self.vectors.values() {
            for (g, v) in global.iter_mut().zip(vector.iter()) {
                *g += v;
            }
        }
        let n = self.vectors.len().max(1) as f64;
        for g in global.iter_mut() {
            *g /= n;
        }
        self.global_mean = global;

        let mut sums: BTreeMap<Zone, (Vec<f64>, usize)> = BTreeMap::new();
        let mut labeled = 0;
        for (entity, zone) in input.labels {
            if let Some(vector) = self.vectors.get(entity) {
                let (sum, count) = sums
                    .entry(*zone)
                    .or_insert_with(|| (vec![0.0; EntityFeatures::DIM], 0));
                for (s, v) in sum.iter_mut().zip(vector.iter()) {
                    *s += v;
                }
                *count += 1;
                labeled += 1;
            }
        }
        self.zone_means = sums
            .into_iter()
            .map(|(zone, (sum, count))| {
                (zone, sum.iter().map(|s| s / count as f64).collect())
            })
            .collect();
        self.labeled = labeled;
        self.version += 1;
        debug!(zones = self.zone_means.len(), labeled, "Reconstruction model fitted");
        Ok(())
    }

    fn embed(&self, entity: &str) -> Option<Vec<f64>> {
        let vector = self.vectors.get(entity)?;
        Some(
            vector
                .iter()
                .zip(self.global_mean.iter())
                .map(|(v, g)| v - g)
                .collect(),
        )
    }

    fn predict_zone(&self, entity: &str) -> Option<ZoneVote> {
        let vector = self.vectors.get(entity)?;
        let errors: Vec<(Zone, f64)> = self
            .zone_means
            .iter()
            .map(|(zone, mean)| (*zone, squared_distance(vector, mean)))
            .collect();
        let (zone, best) = errors
            .iter()
            .copied()
            .fold(None::<(Zone, f64)>, |acc, (zone, e)| match acc {
                Some((_, be)) if be <= e => acc,
                _ => Some((zone, e)),
            })?;
        let total: f64 = errors.iter().map(|(_, e)| e).sum();
        let confidence = if total > 0.0 {
            (1.0 - best / total).min(1.0) * label_coverage(self.labeled)
        } else {
            // All errors zero: a perfect but uninformative reconstruction.
            0.5 * label_coverage(self.labeled)
        };
        Some(ZoneVote { zone, confidence })
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Owns the ensemble members and their voting weights. Passed by handle from
/// the orchestrator; nothing here is process-global.
pub struct ModelRegistry {
    models: Vec<Box<dyn RepresentationModel>>,
    weights: Vec<f64>,
}

impl ModelRegistry {
    pub fn with_default_models() -> Self {
        let models: Vec<Box<dyn RepresentationModel>> = vec![
            Box::<StructuralModel>::default(),
            Box::<SequentialModel>::default(),
            Box::<ReconstructionModel>::default(),
        ];
        let weights = vec![1.0; models.len()];
        Self { models, weights }
    }

    /// Fresh models carrying forward a previous generation's voting weights
    /// and version counters, so retraining preserves learned trust and
    /// staleness tracking.
    pub fn carrying_over(weights: &[f64], versions: &[u64]) -> Self {
        let mut registry = Self::with_default_models();
        for (i, w) in weights.iter().enumerate().take(registry.weights.len()) {
            registry.weights[i] = *w;
        }
        for (i, v) in versions.iter().enumerate().take(registry.models.len()) {
            registry.models[i].set_version(*v);
        }
        registry
    }

    /// Fit every model, collecting failures instead of aborting: a broken
    /// model loses its vote, the rest of the ensemble carries on.
    pub fn fit_all(&mut self, input: &ModelInput<'_>) -> Vec<ModelFailure> {
        let mut failures = Vec::new();
        for model in self.models.iter_mut() {
            if let Err(e) = model.fit(input) {
                warn!(model = model.name(), error = %e, "Model fit failed");
                failures.push(ModelFailure {
                    model: model.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
        failures
    }

    pub fn models(&self) -> &[Box<dyn RepresentationModel>] {
        &self.models
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn versions(&self) -> Vec<u64> {
        self.models.iter().map(|m| m.version()).collect()
    }

    pub fn set_versions(&mut self, versions: &[u64]) {
        for (model, version) in self.models.iter_mut().zip(versions.iter()) {
            model.set_version(*version);
        }
    }

    /// Bounded EMA update of one model's voting weight from validation
    /// feedback. Correct predictions pull the weight toward 1.5, incorrect
    /// toward 0.5; the result stays inside [floor, ceiling].
    pub fn record_feedback(
        &mut self,
        model_index: usize,
        accurate: bool,
        ema_decay: f64,
        floor: f64,
        ceiling: f64,
    ) {
        if let Some(weight) = self.weights.get_mut(model_index) {
            let target = if accurate { 1.5 } else { 0.5 };
            *weight = ((*weight) * (1.0 - ema_decay) + ema_decay * target).clamp(floor, ceiling);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_graph::extract_features;
    use crate::types::FlowRecord;
    use std::collections::BTreeSet;

    fn flow(src: &str, dst: &str, bytes: u64) -> FlowRecord {
        FlowRecord {
            source: src.to_string(),
            destination: dst.to_string(),
            bytes,
            protocol: "tcp".to_string(),
            port: None,
        }
    }

    fn three_tier() -> (FlowGraph, BTreeMap<String, EntityFeatures>, BTreeMap<String, Zone>) {
        let mut graph = FlowGraph::new();
        graph.add_flows(&[
            flow("web-01", "app-01", 1000),
            flow("web-02", "app-01", 900),
            flow("app-01", "db-01", 4000),
        ]);
        let catalog: BTreeSet<String> = ["web-01", "web-02", "app-01", "db-01"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let features = extract_features(&graph, &catalog);
        let labels: BTreeMap<String, Zone> = [
            ("web-01", Zone::Web),
            ("web-02", Zone::Web),
            ("app-01", Zone::Application),
            ("db-01", Zone::Data),
        ]
        .iter()
        .map(|(e, z)| (e.to_string(), *z))
        .collect();
        (graph, features, labels)
    }

    #[test]
    fn test_structural_model_recovers_labels() {
        let (graph, features, labels) = three_tier();
        let input = ModelInput {
            graph: &graph,
            features: &features,
            labels: &labels,
        };
        let mut model = StructuralModel::default();
        model.fit(&input).unwrap();

        let vote = model.predict_zone("web-01").unwrap();
        assert_eq!(vote.zone, Zone::Web);
        assert!(vote.confidence > 0.0 && vote.confidence <= 1.0);
        assert!(model.embed("web-01").is_some());
        assert!(model.predict_zone("ghost").is_none());
    }

    #[test]
    fn test_sequential_model_uses_next_hop_zones() {
        let (graph, features, labels) = three_tier();
        let input = ModelInput {
            graph: &graph,
            features: &features,
            labels: &labels,
        };
        let mut model = SequentialModel::default();
        model.fit(&input).unwrap();

        // web-01 talks only to app-01 (Application), matching the Web
        // zone's learned downstream profile.
        let vote = model.predict_zone("web-01").unwrap();
        assert_eq!(vote.zone, Zone::Web);
        // db-01 has no outgoing edges: no profile, no vote.
        assert!(model.predict_zone("db-01").is_none());
    }

    #[test]
    fn test_empty_labels_fit_never_fails() {
        let (graph, features, _) = three_tier();
        let labels = BTreeMap::new();
        let input = ModelInput {
            graph: &graph,
            features: &features,
            labels: &labels,
        };
        let mut registry = ModelRegistry::with_default_models();
        let failures = registry.fit_all(&input);
        assert!(failures.is_empty());
        assert_eq!(registry.versions(), vec![1, 1, 1]);
        // No labels means no centroids, hence no votes, but never an error.
        for model in registry.models() {
            assert!(model.predict_zone("web-01").is_none());
        }
    }

    #[test]
    fn test_versions_increment_on_fit() {
        let (graph, features, labels) = three_tier();
        let input = ModelInput {
            graph: &graph,
            features: &features,
            labels: &labels,
        };
        let mut registry = ModelRegistry::with_default_models();
        assert_eq!(registry.versions(), vec![0, 0, 0]);
        registry.fit_all(&input);
        assert_eq!(registry.versions(), vec![1, 1, 1]);
        registry.fit_all(&input);
        assert_eq!(registry.versions(), vec![2, 2, 2]);
    }

    #[test]
    fn test_feedback_weight_bounded() {
        let mut registry = ModelRegistry::with_default_models();
        for _ in 0..100 {
            registry.record_feedback(0, true, 0.2, 0.1, 3.0);
            registry.record_feedback(1, false, 0.2, 0.1, 3.0);
        }
        assert!(registry.weights()[0] <= 3.0);
        assert!(registry.weights()[1] >= 0.1);
        assert!(registry.weights()[0] > registry.weights()[1]);
    }

    #[test]
    fn test_carry_over_preserves_weights_and_versions() {
        let mut registry = ModelRegistry::with_default_models();
        registry.record_feedback(0, true, 0.5, 0.1, 3.0);
        let carried = ModelRegistry::carrying_over(registry.weights(), &[7, 8, 9]);
        assert_eq!(carried.weights()[0], registry.weights()[0]);
        assert_eq!(carried.versions(), vec![7, 8, 9]);
    }
}
