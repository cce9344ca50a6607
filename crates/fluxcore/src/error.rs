use thiserror::Error;

/// Errors produced by the engine.
#[derive(Error, Debug)]
pub enum FluxError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad payload: {0}")]
    BadPayload(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no conversion registered from `{from}` to `{to}`")]
    ConversionMissing { from: String, to: String },

    #[error("compute failed: {0}")]
    Compute(String),

    #[error("propagation failed: {0}")]
    Propagation(String),

    #[error("module load failed: {0}")]
    ModuleLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, FluxError>;
