//! Inference engine interface.
//!
//! The engine owns all tensors and kernels. This layer only sees:
//! - [`Engine`] - Creates models from [`ModelMetadata`]
//! - [`EngineModel`] - A live model: weight table plus blocking inference
//! - [`WeightSlot`] - One engine-owned weight tensor and its copy primitive
//!
//! Destroying a model is dropping it.

pub mod host;

pub use host::{HostEngine, HostModel, HostSlot};

use crate::device::Device;
use crate::dtype::DType;
use crate::error::Result;
use crate::model::ModelMetadata;
use crate::weights::WeightSet;
use serde::{Deserialize, Serialize};

/// Sampling parameters forwarded verbatim to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature for sampling.
    pub temperature: f32,
    /// Top-p (nucleus) sampling.
    pub top_p: f32,
    /// Top-k sampling.
    pub top_k: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.8,
            top_k: 1,
        }
    }
}

impl SamplingParams {
    /// Greedy sampling (top_k = 1).
    pub fn greedy() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            top_k: 1,
        }
    }
}

/// One engine-owned weight tensor.
pub trait WeightSlot {
    /// Declared shape.
    fn shape(&self) -> Vec<usize>;

    /// Element type of the backing storage.
    fn dtype(&self) -> DType;

    /// Bytes the backing storage holds.
    fn byte_len(&self) -> usize {
        self.shape().iter().product::<usize>() * self.dtype().size_in_bytes()
    }

    /// Copy `src` into the backing storage.
    ///
    /// The engine copies exactly `src.len()` bytes without checking them
    /// against the slot; callers validate the length first.
    fn copy_from(&mut self, src: &[u8]) -> Result<()>;
}

/// A model living inside the engine.
pub trait EngineModel {
    /// Weight slot handle type.
    type Slot: WeightSlot;

    /// The live weight table.
    fn weights(&mut self) -> &mut WeightSet<Self::Slot>;

    /// Run the model over the full sequence and return the next token.
    ///
    /// Blocking. The whole sequence is passed on every call; whether the
    /// engine reuses work from earlier calls is up to the engine.
    fn infer(&mut self, tokens: &[i64], sampling: &SamplingParams) -> Result<i64>;
}

/// Factory for engine models.
pub trait Engine {
    /// Model type produced.
    type Model: EngineModel;

    /// Allocate a model and its weight table.
    fn create(&self, metadata: &ModelMetadata, device: &Device) -> Result<Self::Model>;
}

impl<M: EngineModel + ?Sized> EngineModel for Box<M> {
    type Slot = M::Slot;

    fn weights(&mut self) -> &mut WeightSet<Self::Slot> {
        (**self).weights()
    }

    fn infer(&mut self, tokens: &[i64], sampling: &SamplingParams) -> Result<i64> {
        (**self).infer(tokens, sampling)
    }
}
