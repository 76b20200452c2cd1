//! # ZoneMesh Core — Shared infrastructure for the zone inference engine
//!
//! Everything the inference engine needs that is not inference logic:
//! - Error taxonomy (`ZoneError` / `ZoneResult`)
//! - Sparse pairwise score storage for correlation tables
//! - LZ4 snapshot compression
//! - Typed, operator-tunable TOML configuration (thresholds + keyword table)

pub mod compression;
pub mod config;
pub mod error;
pub mod sparse;

pub use config::{EngineConfig, KeywordTable, TierPattern};
pub use error::{ZoneError, ZoneResult};
pub use sparse::SparseScoreMatrix;

/// Default significance threshold below which correlation entries are discarded.
pub const DEFAULT_SIGNIFICANCE_THRESHOLD: f64 = 0.1;
/// Default discount applied to transitively-inferred correlation strength.
pub const DEFAULT_TRANSITIVE_DECAY: f64 = 0.7;
