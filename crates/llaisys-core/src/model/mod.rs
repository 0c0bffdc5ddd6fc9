//! Model description.
//!
//! Provides:
//! - Checkpoint configuration (`config.json`)
//! - Engine metadata derived from it

mod config;
mod metadata;

pub use config::{
    CheckpointConfig, EosTokenId, ResolvedConfig, DEFAULT_RMS_NORM_EPS, DEFAULT_ROPE_THETA,
    DEFAULT_TORCH_DTYPE,
};
pub use metadata::{ModelMetadata, NO_END_TOKEN};

#[cfg(test)]
pub(crate) use metadata::tiny;
