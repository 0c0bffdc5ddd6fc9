//! # llaisys FFI
//!
//! Bindings for the llaisys C inference engine.
//!
//! This crate provides:
//! - `#[repr(C)]` mirrors of the Qwen2 model structs and engine type codes
//! - Extern declarations of the model and tensor functions (feature `link`)
//! - Safe model and tensor handles (feature `link`)

#![warn(missing_docs)]

pub mod error;
pub mod sys;

#[cfg(feature = "link")]
pub mod model;

pub use error::{FfiError, Result};

#[cfg(feature = "link")]
pub use model::{Qwen2Model, TensorRef, WeightTable};

/// Element size in bytes for an engine data type code.
pub fn data_type_size(code: sys::LlaisysDataType) -> Option<usize> {
    match code {
        sys::LLAISYS_DTYPE_F16 | sys::LLAISYS_DTYPE_BF16 => Some(2),
        sys::LLAISYS_DTYPE_F32 => Some(4),
        _ => None,
    }
}

/// Whether the crate was built to link `libllaisys`.
pub fn native_available() -> bool {
    cfg!(feature = "link")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_type_sizes() {
        assert_eq!(data_type_size(sys::LLAISYS_DTYPE_F16), Some(2));
        assert_eq!(data_type_size(sys::LLAISYS_DTYPE_BF16), Some(2));
        assert_eq!(data_type_size(sys::LLAISYS_DTYPE_F32), Some(4));
        assert_eq!(data_type_size(0), None);
    }
}
