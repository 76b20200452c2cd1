//! # ZoneMesh Engine — Topology & Zone Inference for Unobserved Entities
//!
//! Given flow telemetry for observed entities and a catalog that also lists
//! entities with no telemetry, predicts each untelemetered entity's security
//! zone and likely communication peers with a calibrated confidence score.
//!
//! Pipeline: flows → [`flow_graph::FlowGraph`] → features / Markov states /
//! correlation tables → representation-model ensemble. At prediction time the
//! [`similarity`] matcher picks comparable observed entities, the
//! [`combiner`] merges per-model zone votes, the [`peer_predictor`] ranks
//! likely peers, and the [`orchestrator`] fuses both into one
//! [`types::Prediction`] — degrading to the [`heuristics`] naming fallback
//! rather than failing when data is sparse or absent.

pub mod combiner;
pub mod correlation;
pub mod flow_graph;
pub mod heuristics;
pub mod markov;
pub mod models;
pub mod orchestrator;
pub mod peer_predictor;
pub mod similarity;
pub mod types;

pub use orchestrator::{EntityView, ZoneInferenceEngine, SNAPSHOT_FORMAT_VERSION};
pub use types::{
    EngineReport, FlowRecord, MethodUsed, Prediction, PredictedPeer, TrainingSummary, Zone,
};
pub use zonemesh_core::{EngineConfig, ZoneError, ZoneResult};
