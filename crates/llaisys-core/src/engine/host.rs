//! Host-memory reference engine.
//!
//! Allocates every weight slot in host memory with the canonical Qwen2
//! shapes and answers inference through a caller-supplied decode function.
//! It performs no arithmetic; it exists to validate checkpoints without the
//! native library and to drive the generation loop in tests.

use super::{Engine, EngineModel, SamplingParams, WeightSlot};
use crate::device::{Device, DeviceType};
use crate::dtype::DType;
use crate::error::{LlaisysError, Result};
use crate::model::ModelMetadata;
use crate::weights::WeightSet;
use tracing::debug;

/// A weight slot backed by a host buffer.
#[derive(Debug, Clone)]
pub struct HostSlot {
    shape: Vec<usize>,
    dtype: DType,
    data: Vec<u8>,
    writes: usize,
}

impl HostSlot {
    /// Zero-filled slot.
    pub fn new(shape: Vec<usize>, dtype: DType) -> Self {
        let len = shape.iter().product::<usize>() * dtype.size_in_bytes();
        Self {
            shape,
            dtype,
            data: vec![0; len],
            writes: 0,
        }
    }

    /// Current contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of copies received.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl WeightSlot for HostSlot {
    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn copy_from(&mut self, src: &[u8]) -> Result<()> {
        if src.len() != self.data.len() {
            return Err(LlaisysError::Engine(format!(
                "host slot holds {} bytes, refusing a {} byte copy",
                self.data.len(),
                src.len()
            )));
        }
        self.data.copy_from_slice(src);
        self.writes += 1;
        Ok(())
    }
}

/// Engine that keeps weights in host memory.
#[derive(Debug, Clone)]
pub struct HostEngine<F> {
    decode: F,
}

impl<F> HostEngine<F>
where
    F: FnMut(&[i64], &SamplingParams) -> Result<i64> + Clone,
{
    /// Create an engine whose models answer `infer` with `decode`.
    pub fn new(decode: F) -> Self {
        Self { decode }
    }
}

impl<F> Engine for HostEngine<F>
where
    F: FnMut(&[i64], &SamplingParams) -> Result<i64> + Clone,
{
    type Model = HostModel<F>;

    fn create(&self, metadata: &ModelMetadata, device: &Device) -> Result<Self::Model> {
        if device.kind != DeviceType::Cpu {
            return Err(LlaisysError::Create(format!(
                "host engine cannot place a model on {}",
                device
            )));
        }
        metadata
            .validate()
            .map_err(|e| LlaisysError::Create(e.to_string()))?;

        let weights = WeightSet::try_from_fn(metadata.nlayer, |id| {
            Ok(HostSlot::new(metadata.slot_shape(id), metadata.dtype))
        })?;
        debug!(slots = weights.len(), dtype = %metadata.dtype, "allocated host weights");

        Ok(HostModel {
            metadata: metadata.clone(),
            weights,
            decode: self.decode.clone(),
            calls: 0,
        })
    }
}

/// A model created by [`HostEngine`].
#[derive(Debug)]
pub struct HostModel<F> {
    metadata: ModelMetadata,
    weights: WeightSet<HostSlot>,
    decode: F,
    calls: usize,
}

impl<F> HostModel<F> {
    /// Metadata the model was created with.
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Read-only view of the weights.
    pub fn weight_set(&self) -> &WeightSet<HostSlot> {
        &self.weights
    }

    /// Number of `infer` calls served.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl<F> EngineModel for HostModel<F>
where
    F: FnMut(&[i64], &SamplingParams) -> Result<i64>,
{
    type Slot = HostSlot;

    fn weights(&mut self) -> &mut WeightSet<HostSlot> {
        &mut self.weights
    }

    fn infer(&mut self, tokens: &[i64], sampling: &SamplingParams) -> Result<i64> {
        self.calls += 1;
        (self.decode)(tokens, sampling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tiny;
    use crate::weights::{GlobalSlot, LayerSlot, SlotId};

    fn echo(tokens: &[i64], _: &SamplingParams) -> Result<i64> {
        Ok(tokens.last().copied().unwrap_or(0))
    }

    #[test]
    fn allocates_canonical_shapes() {
        let engine = HostEngine::new(echo);
        let mut model = engine.create(&tiny(), &Device::cpu()).unwrap();
        let weights = model.weights();
        assert_eq!(weights.nlayer(), 2);

        let embed = weights.slot(SlotId::Global(GlobalSlot::InEmbed)).unwrap();
        assert_eq!(embed.shape(), vec![32, 8]);
        assert_eq!(embed.byte_len(), 32 * 8 * 4);

        let k = weights.slot(SlotId::layer(LayerSlot::AttnK, 1)).unwrap();
        assert_eq!(k.shape(), vec![4, 8]);
        assert_eq!(k.writes(), 0);
    }

    #[test]
    fn rejects_invalid_metadata() {
        let engine = HostEngine::new(echo);
        let meta = ModelMetadata { voc: 0, ..tiny() };
        assert!(matches!(
            engine.create(&meta, &Device::cpu()),
            Err(LlaisysError::Create(_))
        ));
    }

    #[test]
    fn rejects_gpu_placement() {
        let engine = HostEngine::new(echo);
        assert!(matches!(
            engine.create(&tiny(), &Device::nvidia(0)),
            Err(LlaisysError::Create(_))
        ));
    }

    #[test]
    fn slot_copy_requires_exact_length() {
        let mut slot = HostSlot::new(vec![2], DType::F16);
        assert!(slot.copy_from(&[1, 2, 3]).is_err());
        assert_eq!(slot.writes(), 0);

        slot.copy_from(&[1, 2, 3, 4]).unwrap();
        assert_eq!(slot.data(), &[1, 2, 3, 4]);
        assert_eq!(slot.writes(), 1);
    }

    #[test]
    fn infer_uses_decode_function() {
        let engine = HostEngine::new(echo);
        let mut model = engine.create(&tiny(), &Device::cpu()).unwrap();
        assert_eq!(model.infer(&[5, 9], &SamplingParams::default()).unwrap(), 9);
        assert_eq!(model.calls(), 1);
    }
}
