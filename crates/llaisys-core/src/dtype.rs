//! Compute precisions supported by the engine.

use crate::error::{LlaisysError, Result};
use safetensors::Dtype;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type the engine computes in.
///
/// The engine has no native bfloat16 path; bfloat16 checkpoints run as
/// [`DType::F16`] and every tensor is converted while loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit IEEE float.
    F32,
    /// 16-bit IEEE float.
    F16,
}

impl DType {
    /// Width of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
        }
    }

    /// Matching candle dtype.
    pub fn as_candle(self) -> candle_core::DType {
        match self {
            Self::F32 => candle_core::DType::F32,
            Self::F16 => candle_core::DType::F16,
        }
    }

    /// Resolve a declared precision label such as `torch_dtype`.
    ///
    /// Returns the compute dtype and whether tensors stored in the wide
    /// 16-bit format must be downcast on load.
    pub fn from_label(label: &str) -> (Self, bool) {
        let label = label.trim().to_ascii_lowercase();
        if label.contains("float32") || matches!(label.as_str(), "fp32" | "f32") {
            (Self::F32, false)
        } else if (label.contains("float16") && !label.contains("bfloat16"))
            || matches!(label.as_str(), "fp16" | "f16")
        {
            (Self::F16, false)
        } else {
            (Self::F16, true)
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => write!(f, "f32"),
            Self::F16 => write!(f, "f16"),
        }
    }
}

/// Map a checkpoint dtype onto a candle dtype the mapper can convert from.
///
/// Only floating formats that convert losslessly or by rounding into the
/// compute set are accepted.
pub fn source_dtype(dtype: Dtype) -> Result<candle_core::DType> {
    match dtype {
        Dtype::F32 => Ok(candle_core::DType::F32),
        Dtype::F16 => Ok(candle_core::DType::F16),
        Dtype::BF16 => Ok(candle_core::DType::BF16),
        other => Err(LlaisysError::UnsupportedDType(format!(
            "cannot load {:?} tensors into an f16/f32 engine",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float32_labels() {
        for label in ["float32", "torch.float32", "fp32", "f32", "FLOAT32"] {
            assert_eq!(DType::from_label(label), (DType::F32, false), "{label}");
        }
    }

    #[test]
    fn float16_labels() {
        for label in ["float16", "torch.float16", "fp16", "f16"] {
            assert_eq!(DType::from_label(label), (DType::F16, false), "{label}");
        }
    }

    #[test]
    fn other_labels_downcast_to_f16() {
        for label in ["bfloat16", "bf16", "", "float64", "int8"] {
            assert_eq!(DType::from_label(label), (DType::F16, true), "{label}");
        }
    }

    #[test]
    fn element_widths() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
    }

    #[test]
    fn source_dtypes() {
        assert_eq!(source_dtype(Dtype::BF16).unwrap(), candle_core::DType::BF16);
        assert!(matches!(
            source_dtype(Dtype::I64),
            Err(LlaisysError::UnsupportedDType(_))
        ));
    }
}
