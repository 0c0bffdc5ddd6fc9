//! Raw C declarations of the llaisys model API.

#![allow(non_snake_case, missing_docs)]

use std::ffi::{c_int, c_void};

/// Opaque engine tensor handle.
pub type LlaisysTensor = *mut c_void;

/// Engine data type code.
pub type LlaisysDataType = c_int;

/// Engine device type code.
pub type LlaisysDeviceType = c_int;

/// 16-bit IEEE float.
pub const LLAISYS_DTYPE_F16: LlaisysDataType = 12;
/// 32-bit IEEE float.
pub const LLAISYS_DTYPE_F32: LlaisysDataType = 13;
/// bfloat16.
pub const LLAISYS_DTYPE_BF16: LlaisysDataType = 19;

/// Host CPU.
pub const LLAISYS_DEVICE_CPU: LlaisysDeviceType = 0;
/// NVIDIA GPU.
pub const LLAISYS_DEVICE_NVIDIA: LlaisysDeviceType = 1;

/// Model hyperparameters passed to `llaisysQwen2ModelCreate`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LlaisysQwen2Meta {
    pub dtype: LlaisysDataType,
    pub nlayer: usize,
    pub hs: usize,
    pub nh: usize,
    pub nkvh: usize,
    pub dh: usize,
    pub di: usize,
    pub maxseq: usize,
    pub voc: usize,
    pub epsilon: f32,
    pub theta: f32,
    pub end_token: i64,
}

/// Weight table owned by the model; per-layer fields point at `nlayer` handles.
#[repr(C)]
#[derive(Debug)]
pub struct LlaisysQwen2Weights {
    pub in_embed: LlaisysTensor,
    pub out_embed: LlaisysTensor,
    pub out_norm_w: LlaisysTensor,
    pub attn_norm_w: *mut LlaisysTensor,
    pub attn_q_w: *mut LlaisysTensor,
    pub attn_q_b: *mut LlaisysTensor,
    pub attn_k_w: *mut LlaisysTensor,
    pub attn_k_b: *mut LlaisysTensor,
    pub attn_v_w: *mut LlaisysTensor,
    pub attn_v_b: *mut LlaisysTensor,
    pub attn_o_w: *mut LlaisysTensor,
    pub mlp_norm_w: *mut LlaisysTensor,
    pub mlp_gate_w: *mut LlaisysTensor,
    pub mlp_up_w: *mut LlaisysTensor,
    pub mlp_down_w: *mut LlaisysTensor,
}

impl LlaisysQwen2Weights {
    /// Per-layer array pointers in declaration order.
    pub fn layer_arrays(&self) -> [*mut LlaisysTensor; 12] {
        [
            self.attn_norm_w,
            self.attn_q_w,
            self.attn_q_b,
            self.attn_k_w,
            self.attn_k_b,
            self.attn_v_w,
            self.attn_v_b,
            self.attn_o_w,
            self.mlp_norm_w,
            self.mlp_gate_w,
            self.mlp_up_w,
            self.mlp_down_w,
        ]
    }
}

/// Opaque model object.
#[repr(C)]
pub struct LlaisysQwen2Model {
    _private: [u8; 0],
}

#[cfg(feature = "link")]
extern "C" {
    pub fn llaisysQwen2ModelCreate(
        meta: *const LlaisysQwen2Meta,
        device: LlaisysDeviceType,
        device_ids: *mut c_int,
        ndevice: c_int,
    ) -> *mut LlaisysQwen2Model;

    pub fn llaisysQwen2ModelDestroy(model: *mut LlaisysQwen2Model);

    pub fn llaisysQwen2ModelWeights(model: *mut LlaisysQwen2Model) -> *mut LlaisysQwen2Weights;

    pub fn llaisysQwen2ModelInfer(
        model: *mut LlaisysQwen2Model,
        token_ids: *mut i64,
        ntoken: usize,
        temperature: f32,
        top_p: f32,
        top_k: c_int,
    ) -> i64;

    pub fn tensorGetNdim(tensor: LlaisysTensor) -> usize;

    pub fn tensorGetShape(tensor: LlaisysTensor, shape: *mut usize);

    pub fn tensorGetDataType(tensor: LlaisysTensor) -> LlaisysDataType;

    pub fn tensorLoad(tensor: LlaisysTensor, data: *const c_void);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn meta_layout_matches_c() {
        // int dtype, 8 size_t, 2 floats, int64_t, with natural alignment.
        assert_eq!(align_of::<LlaisysQwen2Meta>(), 8);
        assert_eq!(size_of::<LlaisysQwen2Meta>(), 8 + 8 * 8 + 8 + 8);
    }

    #[test]
    fn weights_layout_is_fifteen_pointers() {
        assert_eq!(
            size_of::<LlaisysQwen2Weights>(),
            15 * size_of::<*mut c_void>()
        );
    }
}
