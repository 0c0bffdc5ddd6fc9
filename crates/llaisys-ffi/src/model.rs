//! Safe handles over the native Qwen2 model.

use crate::error::{FfiError, Result};
use crate::sys::{self, LlaisysDataType, LlaisysDeviceType, LlaisysQwen2Meta};
use crate::data_type_size;
use std::ffi::{c_int, c_void};
use std::ptr::NonNull;
use tracing::{debug, trace};

/// Number of per-layer weight arrays in the native table.
pub const LAYER_ARRAYS: usize = 12;

/// A weight tensor owned by a [`Qwen2Model`].
///
/// Valid only while the model that produced it is alive.
#[derive(Debug)]
pub struct TensorRef {
    raw: NonNull<c_void>,
}

// SAFETY: the handle is an opaque pointer into engine-owned storage with no
// thread affinity; exclusive access is enforced through `&mut self`.
unsafe impl Send for TensorRef {}

impl TensorRef {
    fn new(raw: sys::LlaisysTensor, what: &str) -> Result<Self> {
        NonNull::new(raw)
            .map(|raw| Self { raw })
            .ok_or_else(|| FfiError::NullTensor(what.to_string()))
    }

    /// Shape reported by the engine.
    pub fn shape(&self) -> Vec<usize> {
        // SAFETY: `raw` is a live tensor handle; the buffer has `ndim` entries.
        unsafe {
            let ndim = sys::tensorGetNdim(self.raw.as_ptr());
            let mut shape = vec![0usize; ndim];
            sys::tensorGetShape(self.raw.as_ptr(), shape.as_mut_ptr());
            shape
        }
    }

    /// Engine data type code.
    pub fn data_type(&self) -> LlaisysDataType {
        // SAFETY: `raw` is a live tensor handle.
        unsafe { sys::tensorGetDataType(self.raw.as_ptr()) }
    }

    /// Storage size in bytes.
    pub fn byte_len(&self) -> Result<usize> {
        let code = self.data_type();
        let elem = data_type_size(code).ok_or(FfiError::UnknownDataType(code))?;
        Ok(self.shape().iter().product::<usize>() * elem)
    }

    /// Copy `data` into the tensor.
    ///
    /// `data` must be exactly [`byte_len`](Self::byte_len) bytes.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        let expected = self.byte_len()?;
        if data.len() != expected {
            return Err(FfiError::InvalidArgument(format!(
                "tensor holds {} bytes, got {}",
                expected,
                data.len()
            )));
        }
        // SAFETY: the engine reads exactly `expected` bytes, which `data` provides.
        unsafe { sys::tensorLoad(self.raw.as_ptr(), data.as_ptr().cast()) };
        Ok(())
    }
}

/// The model's weight tensors, read once after creation.
#[derive(Debug)]
pub struct WeightTable {
    /// Input embedding.
    pub in_embed: TensorRef,
    /// Output embedding.
    pub out_embed: TensorRef,
    /// Final norm weight.
    pub out_norm_w: TensorRef,
    /// Per-layer arrays in declaration order, each `nlayer` long.
    pub layers: Vec<Vec<TensorRef>>,
}

/// Owned native model. Destroyed on drop.
#[derive(Debug)]
pub struct Qwen2Model {
    raw: NonNull<sys::LlaisysQwen2Model>,
    nlayer: usize,
}

// SAFETY: the engine model is not tied to the creating thread; every call
// that touches it goes through `&mut self`.
unsafe impl Send for Qwen2Model {}

impl Qwen2Model {
    /// Create a model on `device` using `device_ids`.
    pub fn create(
        meta: &LlaisysQwen2Meta,
        device: LlaisysDeviceType,
        device_ids: &[i32],
    ) -> Result<Self> {
        let mut ids: Vec<c_int> = device_ids.to_vec();
        let ndevice = c_int::try_from(ids.len())
            .map_err(|_| FfiError::InvalidArgument(format!("{} device ids", ids.len())))?;

        // SAFETY: `meta` and `ids` outlive the call.
        let raw = unsafe { sys::llaisysQwen2ModelCreate(meta, device, ids.as_mut_ptr(), ndevice) };
        let raw = NonNull::new(raw).ok_or_else(|| {
            FfiError::NullModel(format!(
                "{} layers, dtype code {}, device {} {:?}",
                meta.nlayer, meta.dtype, device, device_ids
            ))
        })?;

        debug!(nlayer = meta.nlayer, device, "created native model");
        Ok(Self {
            raw,
            nlayer: meta.nlayer,
        })
    }

    /// Number of layers the model was created with.
    pub fn nlayer(&self) -> usize {
        self.nlayer
    }

    /// Read the weight table. Null tensors fail with [`FfiError::NullTensor`].
    pub fn weight_table(&mut self) -> Result<WeightTable> {
        // SAFETY: `raw` is live; the returned table is owned by the model.
        let table = unsafe { sys::llaisysQwen2ModelWeights(self.raw.as_ptr()) };
        // SAFETY: non-null tables stay valid for the model's lifetime.
        let table = unsafe { table.as_ref() }
            .ok_or_else(|| FfiError::NullTensor("weight table".into()))?;

        let mut layers = Vec::with_capacity(LAYER_ARRAYS);
        for (index, array) in table.layer_arrays().into_iter().enumerate() {
            if array.is_null() && self.nlayer > 0 {
                return Err(FfiError::NullTensor(format!("layer array {}", index)));
            }
            let refs = (0..self.nlayer)
                .map(|layer| {
                    // SAFETY: the engine allocates every array with `nlayer` entries.
                    let raw = unsafe { *array.add(layer) };
                    TensorRef::new(raw, &format!("layer array {} entry {}", index, layer))
                })
                .collect::<Result<Vec<_>>>()?;
            layers.push(refs);
        }

        Ok(WeightTable {
            in_embed: TensorRef::new(table.in_embed, "in_embed")?,
            out_embed: TensorRef::new(table.out_embed, "out_embed")?,
            out_norm_w: TensorRef::new(table.out_norm_w, "out_norm_w")?,
            layers,
        })
    }

    /// Run the model over `tokens` and return the next token.
    pub fn infer(&mut self, tokens: &[i64], temperature: f32, top_p: f32, top_k: usize) -> Result<i64> {
        if tokens.is_empty() {
            return Err(FfiError::InvalidArgument("empty token sequence".into()));
        }
        let top_k = c_int::try_from(top_k)
            .map_err(|_| FfiError::InvalidArgument(format!("top_k {} out of range", top_k)))?;
        let mut ids = tokens.to_vec();

        // SAFETY: `ids` holds `ids.len()` tokens and outlives the call.
        let next = unsafe {
            sys::llaisysQwen2ModelInfer(
                self.raw.as_ptr(),
                ids.as_mut_ptr(),
                ids.len(),
                temperature,
                top_p,
                top_k,
            )
        };
        trace!(ntoken = tokens.len(), next, "native infer");
        Ok(next)
    }
}

impl Drop for Qwen2Model {
    fn drop(&mut self) {
        // SAFETY: `raw` came from `llaisysQwen2ModelCreate` and is destroyed once.
        unsafe { sys::llaisysQwen2ModelDestroy(self.raw.as_ptr()) };
        debug!("destroyed native model");
    }
}
