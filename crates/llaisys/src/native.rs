//! Engine backed by `libllaisys`.

use crate::handle::Model;
use llaisys_core::{
    device::{Device, DeviceType},
    dtype::DType,
    engine::{Engine, EngineModel, SamplingParams, WeightSlot},
    error::{LlaisysError, Result},
    model::ModelMetadata,
    weights::{GlobalSlot, LayerSlot, SlotId, WeightSet},
};
use llaisys_ffi::{sys, FfiError, Qwen2Model, TensorRef};
use std::path::Path;
use tracing::debug;

fn create_error(e: FfiError) -> LlaisysError {
    LlaisysError::Create(e.to_string())
}

fn engine_error(e: FfiError) -> LlaisysError {
    LlaisysError::Engine(e.to_string())
}

fn data_type_code(dtype: DType) -> sys::LlaisysDataType {
    match dtype {
        DType::F16 => sys::LLAISYS_DTYPE_F16,
        DType::F32 => sys::LLAISYS_DTYPE_F32,
    }
}

fn device_code(kind: DeviceType) -> sys::LlaisysDeviceType {
    match kind {
        DeviceType::Cpu => sys::LLAISYS_DEVICE_CPU,
        DeviceType::Nvidia => sys::LLAISYS_DEVICE_NVIDIA,
    }
}

fn native_meta(metadata: &ModelMetadata) -> sys::LlaisysQwen2Meta {
    sys::LlaisysQwen2Meta {
        dtype: data_type_code(metadata.dtype),
        nlayer: metadata.nlayer,
        hs: metadata.hs,
        nh: metadata.nh,
        nkvh: metadata.nkvh,
        dh: metadata.dh,
        di: metadata.di,
        maxseq: metadata.maxseq,
        voc: metadata.voc,
        epsilon: metadata.epsilon,
        theta: metadata.theta,
        end_token: metadata.end_token,
    }
}

/// A weight tensor inside a native model.
#[derive(Debug)]
pub struct NativeSlot {
    tensor: TensorRef,
    shape: Vec<usize>,
    dtype: DType,
}

impl NativeSlot {
    fn new(tensor: TensorRef, id: SlotId) -> Result<Self> {
        let code = tensor.data_type();
        let dtype = match code {
            sys::LLAISYS_DTYPE_F16 => DType::F16,
            sys::LLAISYS_DTYPE_F32 => DType::F32,
            other => {
                return Err(LlaisysError::Create(format!(
                    "slot {} has unsupported engine dtype code {}",
                    id, other
                )))
            }
        };
        Ok(Self {
            shape: tensor.shape(),
            tensor,
            dtype,
        })
    }
}

impl WeightSlot for NativeSlot {
    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn copy_from(&mut self, src: &[u8]) -> Result<()> {
        self.tensor.load(src).map_err(engine_error)
    }
}

/// Creates models through `llaisysQwen2ModelCreate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngine;

impl Engine for NativeEngine {
    type Model = NativeModel;

    fn create(&self, metadata: &ModelMetadata, device: &Device) -> Result<NativeModel> {
        let meta = native_meta(metadata);
        let mut model =
            Qwen2Model::create(&meta, device_code(device.kind), &device.ids).map_err(create_error)?;
        let table = model.weight_table().map_err(create_error)?;

        let mut globals = [
            Some(table.in_embed),
            Some(table.out_embed),
            Some(table.out_norm_w),
        ];
        let mut layers: Vec<_> = table.layers.into_iter().map(Vec::into_iter).collect();

        let weights = WeightSet::try_from_fn(metadata.nlayer, |id| {
            let tensor = match id {
                SlotId::Global(slot) => {
                    let index = GlobalSlot::ALL.iter().position(|g| *g == slot);
                    index.and_then(|i| globals[i].take())
                }
                SlotId::Layer { kind, .. } => {
                    let index = LayerSlot::ALL.iter().position(|k| *k == kind);
                    index.and_then(|i| layers.get_mut(i)).and_then(Iterator::next)
                }
            };
            let tensor = tensor
                .ok_or_else(|| LlaisysError::Create(format!("engine exposes no tensor for {}", id)))?;
            NativeSlot::new(tensor, id)
        })?;

        debug!(slots = weights.len(), device = %device, "bound native weight table");
        Ok(NativeModel { weights, model })
    }
}

/// A live native model and its weight table.
#[derive(Debug)]
pub struct NativeModel {
    // Declared first so the tensor handles drop before the model.
    weights: WeightSet<NativeSlot>,
    model: Qwen2Model,
}

impl EngineModel for NativeModel {
    type Slot = NativeSlot;

    fn weights(&mut self) -> &mut WeightSet<NativeSlot> {
        &mut self.weights
    }

    fn infer(&mut self, tokens: &[i64], sampling: &SamplingParams) -> Result<i64> {
        self.model
            .infer(tokens, sampling.temperature, sampling.top_p, sampling.top_k)
            .map_err(engine_error)
    }
}

impl Model<NativeModel> {
    /// Load the checkpoint at `path` into `libllaisys` on `device`.
    pub fn construct(path: impl AsRef<Path>, device: Device) -> Result<Self> {
        Self::construct_with(&NativeEngine, path, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_carries_every_field() {
        let metadata = ModelMetadata {
            dtype: DType::F16,
            nlayer: 28,
            hs: 1536,
            nh: 12,
            nkvh: 2,
            dh: 128,
            di: 8960,
            maxseq: 4096,
            voc: 151936,
            epsilon: 1e-6,
            theta: 10000.0,
            end_token: 151643,
        };
        let meta = native_meta(&metadata);
        assert_eq!(meta.dtype, 12);
        assert_eq!((meta.nlayer, meta.hs, meta.nh, meta.nkvh), (28, 1536, 12, 2));
        assert_eq!((meta.dh, meta.di, meta.maxseq, meta.voc), (128, 8960, 4096, 151936));
        assert_eq!(meta.end_token, 151643);
    }

    #[test]
    fn type_codes() {
        assert_eq!(data_type_code(DType::F32), 13);
        assert_eq!(device_code(DeviceType::Cpu), 0);
        assert_eq!(device_code(DeviceType::Nvidia), 1);
    }
}
