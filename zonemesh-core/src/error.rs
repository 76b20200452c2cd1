use thiserror::Error;

pub type ZoneResult<T> = Result<T, ZoneError>;

#[derive(Error, Debug)]
pub enum ZoneError {
    #[error("engine has not been trained; call train() first or enable heuristic-only mode")]
    NotTrained,

    #[error("no entity has ever been observed; cannot build a candidate set")]
    NoCandidates,

    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
