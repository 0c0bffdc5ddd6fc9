//! # llaisys Core
//!
//! Model loading and generation on top of an opaque inference engine.
//!
//! This crate provides:
//! - **Config resolution** from HuggingFace `config.json` into engine metadata
//! - **Weight mapping** from SafeTensors checkpoints into the engine's slot table
//! - **Generation driving** with end-token, budget and cancellation stops
//! - **Engine traits** plus an in-memory host engine for dry runs

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod device;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod generation;
pub mod model;
pub mod weights;

pub use error::{LlaisysError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::device::{Device, DeviceType};
    pub use crate::dtype::DType;
    pub use crate::engine::{Engine, EngineModel, SamplingParams, WeightSlot};
    pub use crate::error::{LlaisysError, Result};
    pub use crate::generation::{
        CancellationToken, GenerationConfig, GenerationOutput, StopReason,
    };
    pub use crate::model::{ModelMetadata, ResolvedConfig};
    pub use crate::weights::{Checkpoint, LoadOptions, LoadReport, WeightMapper, WeightSet};
}
