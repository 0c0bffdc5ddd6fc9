//! Error types for FFI operations.

use thiserror::Error;

/// Result type for FFI operations.
pub type Result<T> = std::result::Result<T, FfiError>;

/// Errors from FFI operations.
#[derive(Error, Debug)]
pub enum FfiError {
    /// The engine returned a null model handle.
    #[error("model creation returned null: {0}")]
    NullModel(String),

    /// The engine exposed a null weight tensor.
    #[error("null weight tensor: {0}")]
    NullTensor(String),

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine reported a data type code this crate does not know.
    #[error("unknown engine data type code {0}")]
    UnknownDataType(i32),
}
