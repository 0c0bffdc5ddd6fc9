//! Error types for llaisys core.

use thiserror::Error;

/// Result type alias for llaisys operations.
pub type Result<T> = std::result::Result<T, LlaisysError>;

/// Errors that can occur while preparing a model or generating tokens.
#[derive(Error, Debug)]
pub enum LlaisysError {
    /// Missing, invalid or contradictory hyperparameters, or a bad generation request.
    #[error("config error: {0}")]
    Config(String),

    /// The engine refused to allocate a model.
    #[error("engine create failed: {0}")]
    Create(String),

    /// No weight files, or required slots left unwritten after loading.
    #[error("missing weights: {0}")]
    MissingWeights(String),

    /// Layer index out of range, or source/destination byte length mismatch.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A tensor precision the mapper cannot convert.
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),

    /// A slot received a second write during load.
    #[error("duplicate weight: {0}")]
    DuplicateWeight(String),

    /// Failure reported by the engine during inference.
    #[error("engine error: {0}")]
    Engine(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config JSON error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Malformed safetensors container.
    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
