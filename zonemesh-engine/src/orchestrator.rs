//! Prediction Orchestrator — training/prediction state machine
//!
//! Features:
//! - `train()` rebuilds all derived state wholesale (graph, features, Markov
//!   tables, correlation tables, model fits); idempotent and re-invocable,
//!   never a partial update
//! - Build-then-atomic-swap: a retrain assembles a complete `TrainedState`
//!   off-lock, then swaps it in; in-flight predictions always see one
//!   consistent generation
//! - Retrains are mutually exclusive with each other via a train mutex;
//!   predictions are lock-free reads against the current `Arc` snapshot
//! - `predict()` before any successful train fails with `NotTrained` unless
//!   heuristic-only mode is opted into
//! - `predict_batch()` isolates per-entry failures; one bad id never aborts
//!   the batch
//! - Versioned, LZ4-compressed state snapshots; export → import round-trips
//!   to byte-identical prediction output

use crate::combiner::{combine, gather_votes, CombineOutcome};
use crate::correlation::{CorrelationAnalyzer, CorrelationSnapshot};
use crate::flow_graph::{extract_features, EntityFeatures, FlowGraph};
use crate::heuristics::heuristic_zone;
use crate::markov::MarkovModel;
use crate::models::{ModelFailure, ModelInput, ModelRegistry};
use crate::peer_predictor::predict_peers;
use crate::similarity::find_similar;
use crate::types::{
    EngineReport, FlowEdge, FlowRecord, MethodUsed, Prediction, TrainingSummary, Zone,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use zonemesh_core::compression::{compress_snapshot, decompress_snapshot};
use zonemesh_core::{EngineConfig, ZoneError, ZoneResult};

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Confidence discount applied to the ensemble zone when the similarity
/// matcher had to fall back to volume ranking.
const FALLBACK_MATCH_DISCOUNT: f64 = 0.8;

// ── Trained state ───────────────────────────────────────────────────────────

/// One immutable training generation. Predictions borrow this via `Arc` and
/// never observe a half-built generation.
pub struct TrainedState {
    graph: FlowGraph,
    features: BTreeMap<String, EntityFeatures>,
    markov: MarkovModel,
    correlation: CorrelationAnalyzer,
    registry: ModelRegistry,
    labels: BTreeMap<String, Zone>,
    catalog: BTreeSet<String>,
    summary: TrainingSummary,
    /// Per-model fit failures from this generation, kept for observability.
    fit_failures: Vec<ModelFailure>,
}

impl TrainedState {
    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    pub fn fit_failures(&self) -> &[ModelFailure] {
        &self.fit_failures
    }

    pub fn catalog(&self) -> &BTreeSet<String> {
        &self.catalog
    }
}

#[derive(Default)]
struct EngineStats {
    flows_ingested: AtomicU64,
    malformed_skipped: AtomicU64,
    trainings_completed: AtomicU64,
    predictions_served: AtomicU64,
    predictions_failed: AtomicU64,
    heuristic_fallbacks: AtomicU64,
}

// ── Engine ──────────────────────────────────────────────────────────────────

pub struct ZoneInferenceEngine {
    config: EngineConfig,
    state: RwLock<Option<Arc<TrainedState>>>,
    train_lock: Mutex<()>,
    stats: EngineStats,
}

impl ZoneInferenceEngine {
    pub fn new(config: EngineConfig) -> ZoneResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: RwLock::new(None),
            train_lock: Mutex::new(()),
            stats: EngineStats::default(),
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: EngineConfig::default(),
            state: RwLock::new(None),
            train_lock: Mutex::new(()),
            stats: EngineStats::default(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.state.read().is_some()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rebuild every piece of derived state from scratch and swap the new
    /// generation in atomically. Ground-truth labels are optional; unknown
    /// label strings degrade to `Unclassified` rather than failing.
    pub fn train(
        &self,
        flows: &[FlowRecord],
        catalog: &[String],
        labels: &BTreeMap<String, String>,
    ) -> ZoneResult<TrainingSummary> {
        let _guard = self.train_lock.lock();

        let mut graph = FlowGraph::new();
        let skipped = graph.add_flows(flows);
        self.stats
            .flows_ingested
            .fetch_add(flows.len() as u64 - skipped, Ordering::Relaxed);
        self.stats
            .malformed_skipped
            .fetch_add(skipped, Ordering::Relaxed);
        if skipped > 0 {
            warn!(skipped, "Malformed flow records skipped during training");
        }

        let catalog: BTreeSet<String> = catalog.iter().cloned().collect();
        let features = extract_features(&graph, &catalog);
        let markov = MarkovModel::build(&graph);
        let correlation = CorrelationAnalyzer::analyze(&graph, &self.config);
        let zone_labels: BTreeMap<String, Zone> = labels
            .iter()
            .map(|(entity, label)| (entity.clone(), Zone::from_label(label)))
            .collect();

        // Carry voting weights and version counters across generations.
        let mut registry = match self.state.read().as_ref() {
            Some(previous) => ModelRegistry::carrying_over(
                previous.registry.weights(),
                &previous.registry.versions(),
            ),
            None => ModelRegistry::with_default_models(),
        };
        let fit_failures = registry.fit_all(&ModelInput {
            graph: &graph,
            features: &features,
            labels: &zone_labels,
        });

        let summary = TrainingSummary {
            entities_trained: graph.observed_entities().len(),
            edges: graph.edge_count(),
            markov_states_built: markov.len(),
            correlation_pairs_found: correlation.pair_count(),
            malformed_skipped: skipped,
            trained_at: chrono::Utc::now().timestamp(),
        };
        info!(
            entities = summary.entities_trained,
            edges = summary.edges,
            markov_states = summary.markov_states_built,
            correlation_pairs = summary.correlation_pairs_found,
            "Training generation complete"
        );

        *self.state.write() = Some(Arc::new(TrainedState {
            graph,
            features,
            markov,
            correlation,
            registry,
            labels: zone_labels,
            catalog,
            summary: summary.clone(),
            fit_failures,
        }));
        self.stats.trainings_completed.fetch_add(1, Ordering::Relaxed);
        Ok(summary)
    }

    /// Predict zone and likely peers for one entity.
    pub fn predict(&self, entity_id: &str) -> ZoneResult<Prediction> {
        let result = self.predict_inner(entity_id);
        match &result {
            Ok(_) => self.stats.predictions_served.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.predictions_failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn predict_inner(&self, entity_id: &str) -> ZoneResult<Prediction> {
        if entity_id.trim().is_empty() {
            return Err(ZoneError::InvalidEntityId("empty or whitespace".to_string()));
        }

        let state = self.state.read().clone();
        let state = match state {
            Some(state) => state,
            None => {
                if self.config.heuristic_only_when_untrained {
                    return Ok(self.heuristic_prediction(entity_id));
                }
                return Err(ZoneError::NotTrained);
            }
        };

        let matched = match find_similar(
            entity_id,
            &state.graph,
            &self.config.keywords,
            self.config.similar_top_k,
        ) {
            Ok(matched) => matched,
            // Nothing was ever observed: degrade to the naming heuristic
            // rather than failing the prediction.
            Err(ZoneError::NoCandidates) => return Ok(self.heuristic_prediction(entity_id)),
            Err(e) => return Err(e),
        };

        // Ensemble vote and peer forecast are independent; neither depends
        // on the other's outcome.
        let (votes, silent) = gather_votes(&state.registry, &matched.candidates);
        if !silent.is_empty() {
            for failure in &silent {
                warn!(model = %failure.model, reason = %failure.reason, "Model produced no vote");
            }
        }
        let ensemble = combine(&votes);
        let mut forecast = predict_peers(
            entity_id,
            &matched.candidates,
            &state.markov,
            &state.correlation,
            self.config.peer_top_n,
        );

        let contributing: Vec<String> =
            matched.candidates.iter().map(|c| c.id.clone()).collect();
        // A volume-fallback match reduces confidence on every output that
        // leaned on the similar set, the peer forecast included.
        let discount = if matched.fallback {
            FALLBACK_MATCH_DISCOUNT
        } else {
            1.0
        };
        if matched.fallback {
            if let Some(forecast) = forecast.as_mut() {
                forecast.discount(FALLBACK_MATCH_DISCOUNT);
            }
        }

        let prediction = match (ensemble, forecast) {
            (CombineOutcome::Combined(vote), Some(forecast)) => Prediction {
                entity_id: entity_id.to_string(),
                zone: vote.zone,
                confidence: (vote.confidence * discount).clamp(0.0, 1.0),
                predicted_peers: forecast.peers,
                peer_confidence: Some(forecast.confidence),
                contributing_entities: contributing,
                method_used: if forecast.used_markov {
                    MethodUsed::Blended
                } else {
                    MethodUsed::Ensemble
                },
            },
            (CombineOutcome::Combined(vote), None) => Prediction {
                entity_id: entity_id.to_string(),
                zone: vote.zone,
                confidence: (vote.confidence * discount).clamp(0.0, 1.0),
                predicted_peers: Vec::new(),
                peer_confidence: None,
                contributing_entities: contributing,
                method_used: MethodUsed::Ensemble,
            },
            (CombineOutcome::Unavailable, Some(forecast)) => {
                // No ensemble vote: zone comes from the naming heuristic,
                // peers from the Markov/correlation signal.
                let vote = heuristic_zone(entity_id, &self.config.keywords);
                self.stats.heuristic_fallbacks.fetch_add(1, Ordering::Relaxed);
                Prediction {
                    entity_id: entity_id.to_string(),
                    zone: vote.zone,
                    confidence: vote.confidence,
                    predicted_peers: forecast.peers,
                    peer_confidence: Some(forecast.confidence),
                    contributing_entities: contributing,
                    method_used: if forecast.used_markov {
                        MethodUsed::Markov
                    } else {
                        MethodUsed::HeuristicOnly
                    },
                }
            }
            (CombineOutcome::Unavailable, None) => self.heuristic_prediction(entity_id),
        };
        Ok(prediction)
    }

    fn heuristic_prediction(&self, entity_id: &str) -> Prediction {
        let vote = heuristic_zone(entity_id, &self.config.keywords);
        self.stats.heuristic_fallbacks.fetch_add(1, Ordering::Relaxed);
        Prediction {
            entity_id: entity_id.to_string(),
            zone: vote.zone,
            confidence: vote.confidence,
            predicted_peers: Vec::new(),
            peer_confidence: None,
            contributing_entities: Vec::new(),
            method_used: MethodUsed::HeuristicOnly,
        }
    }

    /// Predict every id independently; per-entry failures never abort the
    /// batch.
    pub fn predict_batch(&self, ids: &[String]) -> BTreeMap<String, ZoneResult<Prediction>> {
        ids.iter()
            .map(|id| (id.clone(), self.predict(id)))
            .collect()
    }

    /// Opaque, versioned snapshot of all trained state.
    pub fn export_state(&self) -> ZoneResult<Vec<u8>> {
        let state = self.state.read().clone().ok_or(ZoneError::NotTrained)?;
        let snapshot = EngineSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: chrono::Utc::now().timestamp(),
            catalog: state.catalog.clone(),
            labels: state.labels.clone(),
            edges: state.graph.to_edge_list(),
            malformed: state.graph.malformed_count(),
            correlation: state.correlation.to_snapshot(),
            model_weights: state.registry.weights().to_vec(),
            model_versions: state.registry.versions(),
            summary: state.summary.clone(),
        };
        let raw = serde_json::to_vec(&snapshot)?;
        info!(bytes = raw.len(), "Engine state exported");
        Ok(compress_snapshot(&raw))
    }

    /// Restore a snapshot produced by [`export_state`]. Derived tables are
    /// rebuilt deterministically from the snapshotted inputs, so predictions
    /// after import are byte-identical to the exporting engine's.
    pub fn import_state(&self, blob: &[u8]) -> ZoneResult<()> {
        let _guard = self.train_lock.lock();

        let raw = decompress_snapshot(blob)?;
        let snapshot: EngineSnapshot = serde_json::from_slice(&raw)
            .map_err(|e| ZoneError::Snapshot(format!("decode: {}", e)))?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(ZoneError::Snapshot(format!(
                "version skew: snapshot format {} but this engine expects {}",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        let graph = FlowGraph::from_edge_list(&snapshot.edges, snapshot.malformed);
        let features = extract_features(&graph, &snapshot.catalog);
        let markov = MarkovModel::build(&graph);
        let correlation = CorrelationAnalyzer::from_snapshot(&snapshot.correlation);

        let mut registry = ModelRegistry::carrying_over(
            &snapshot.model_weights,
            &snapshot.model_versions,
        );
        let fit_failures = registry.fit_all(&ModelInput {
            graph: &graph,
            features: &features,
            labels: &snapshot.labels,
        });
        // Fitting bumped the counters; restore the exporter's values so
        // staleness tracking survives the round-trip.
        registry.set_versions(&snapshot.model_versions);

        info!(
            entities = snapshot.summary.entities_trained,
            created_at = snapshot.created_at,
            "Engine state imported"
        );
        *self.state.write() = Some(Arc::new(TrainedState {
            graph,
            features,
            markov,
            correlation,
            registry,
            labels: snapshot.labels,
            catalog: snapshot.catalog,
            summary: snapshot.summary,
            fit_failures,
        }));
        Ok(())
    }

    /// Point-in-time view of one catalog entity: observed flag, features,
    /// per-model embeddings, and ground-truth zone if labeled.
    pub fn entity(&self, id: &str) -> ZoneResult<EntityView> {
        let state = self.state.read().clone().ok_or(ZoneError::NotTrained)?;
        let embeddings: BTreeMap<String, Vec<f64>> = state
            .registry
            .models()
            .iter()
            .filter_map(|model| model.embed(id).map(|e| (model.name().to_string(), e)))
            .collect();
        Ok(EntityView {
            id: id.to_string(),
            observed: state.graph.is_observed(id),
            features: state.features.get(id).cloned(),
            embeddings,
            zone: state.labels.get(id).copied(),
        })
    }

    pub fn report(&self) -> EngineReport {
        EngineReport {
            flows_ingested: self.stats.flows_ingested.load(Ordering::Relaxed),
            malformed_skipped: self.stats.malformed_skipped.load(Ordering::Relaxed),
            trainings_completed: self.stats.trainings_completed.load(Ordering::Relaxed),
            predictions_served: self.stats.predictions_served.load(Ordering::Relaxed),
            predictions_failed: self.stats.predictions_failed.load(Ordering::Relaxed),
            heuristic_fallbacks: self.stats.heuristic_fallbacks.load(Ordering::Relaxed),
        }
    }

    /// The current generation's training summary, if trained.
    pub fn last_summary(&self) -> Option<TrainingSummary> {
        self.state.read().as_ref().map(|s| s.summary.clone())
    }

    /// The current generation's per-model fit failures, if trained.
    pub fn last_fit_failures(&self) -> Vec<ModelFailure> {
        self.state
            .read()
            .as_ref()
            .map(|s| s.fit_failures.clone())
            .unwrap_or_default()
    }
}

/// One catalog entity as the current training generation sees it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntityView {
    pub id: String,
    pub observed: bool,
    pub features: Option<EntityFeatures>,
    /// Embedding per representation model that has one for this entity.
    pub embeddings: BTreeMap<String, Vec<f64>>,
    /// Ground-truth zone, when labeled.
    pub zone: Option<Zone>,
}

// ── Snapshot format ─────────────────────────────────────────────────────────

#[derive(serde::Serialize, serde::Deserialize)]
struct EngineSnapshot {
    format_version: u32,
    created_at: i64,
    catalog: BTreeSet<String>,
    labels: BTreeMap<String, Zone>,
    edges: Vec<(String, String, FlowEdge)>,
    malformed: u64,
    correlation: CorrelationSnapshot,
    model_weights: Vec<f64>,
    model_versions: Vec<u64>,
    summary: TrainingSummary,
}
