//! Tensor records read from checkpoint files.

use crate::dtype::{self, DType};
use crate::error::{LlaisysError, Result};
use candle_core::{Device, Tensor};
use safetensors::Dtype;
use std::borrow::Cow;

/// One named tensor borrowed from a checkpoint file.
#[derive(Debug, Clone)]
pub struct TensorRecord<'a> {
    /// Tensor name as stored in the checkpoint.
    pub name: &'a str,
    /// Stored element type.
    pub dtype: Dtype,
    /// Logical shape.
    pub shape: Vec<usize>,
    /// Element strides; `None` means row-major contiguous.
    pub strides: Option<Vec<usize>>,
    /// Raw little-endian bytes.
    pub data: &'a [u8],
}

impl<'a> TensorRecord<'a> {
    /// A row-major contiguous record.
    pub fn new(name: &'a str, dtype: Dtype, shape: Vec<usize>, data: &'a [u8]) -> Self {
        Self {
            name,
            dtype,
            shape,
            strides: None,
            data,
        }
    }

    /// Attach element strides describing a non-contiguous view over `data`.
    pub fn with_strides(mut self, strides: Vec<usize>) -> Self {
        self.strides = Some(strides);
        self
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the logical tensor in bytes.
    pub fn byte_len(&self) -> usize {
        self.numel() * self.dtype.size()
    }

    /// Whether the strides describe a row-major layout.
    ///
    /// Dimensions of extent 1 may carry any stride.
    pub fn is_contiguous(&self) -> bool {
        let Some(strides) = &self.strides else {
            return true;
        };
        if strides.len() != self.shape.len() {
            return false;
        }
        let mut expected = 1;
        for (&extent, &stride) in self.shape.iter().zip(strides).rev() {
            if extent == 1 {
                continue;
            }
            if stride != expected {
                return false;
            }
            expected *= extent;
        }
        true
    }

    /// Whether loading into `target` requires an element conversion.
    pub fn needs_conversion(&self, target: DType) -> bool {
        !matches!(
            (self.dtype, target),
            (Dtype::F32, DType::F32) | (Dtype::F16, DType::F16)
        )
    }

    /// The tensor's bytes as one row-major run.
    ///
    /// Borrowed when the record is already contiguous; strided records are
    /// gathered into a fresh buffer.
    pub fn contiguous_data(&self) -> Result<Cow<'a, [u8]>> {
        if self.is_contiguous() {
            if self.data.len() != self.byte_len() {
                return Err(LlaisysError::ShapeMismatch(format!(
                    "tensor {} has shape {:?} ({} bytes) but stores {} bytes",
                    self.name,
                    self.shape,
                    self.byte_len(),
                    self.data.len()
                )));
            }
            return Ok(Cow::Borrowed(self.data));
        }

        let strides = self.strides.as_deref().unwrap_or_default();
        if strides.len() != self.shape.len() {
            return Err(LlaisysError::ShapeMismatch(format!(
                "tensor {} has {} dims but {} strides",
                self.name,
                self.shape.len(),
                strides.len()
            )));
        }
        gather(self.name, self.data, self.dtype.size(), &self.shape, strides).map(Cow::Owned)
    }

    /// Contiguous bytes in the `target` element type, ready for the engine.
    pub fn prepare(&self, target: DType) -> Result<Cow<'a, [u8]>> {
        let source = dtype::source_dtype(self.dtype)?;
        let bytes = self.contiguous_data()?;
        if !self.needs_conversion(target) {
            return Ok(bytes);
        }

        let tensor = Tensor::from_raw_buffer(&bytes, source, &self.shape, &Device::Cpu)?
            .to_dtype(target.as_candle())?
            .flatten_all()?;
        let converted: Vec<u8> = match target {
            DType::F16 => bytemuck::cast_slice(&tensor.to_vec1::<half::f16>()?).to_vec(),
            DType::F32 => bytemuck::cast_slice(&tensor.to_vec1::<f32>()?).to_vec(),
        };
        Ok(Cow::Owned(converted))
    }
}

/// Copy a strided view into a row-major buffer.
fn gather(
    name: &str,
    data: &[u8],
    elem: usize,
    shape: &[usize],
    strides: &[usize],
) -> Result<Vec<u8>> {
    let numel: usize = shape.iter().product();
    if numel == 0 {
        return Ok(Vec::new());
    }

    let last = shape
        .iter()
        .zip(strides)
        .map(|(&extent, &stride)| (extent - 1) * stride)
        .sum::<usize>();
    if (last + 1) * elem > data.len() {
        return Err(LlaisysError::ShapeMismatch(format!(
            "strided tensor {} reaches element {} but stores only {} bytes",
            name,
            last,
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(numel * elem);
    let mut index = vec![0usize; shape.len()];
    for _ in 0..numel {
        let offset: usize = index.iter().zip(strides).map(|(i, s)| i * s).sum();
        let start = offset * elem;
        out.extend_from_slice(&data[start..start + elem]);

        for dim in (0..shape.len()).rev() {
            index[dim] += 1;
            if index[dim] < shape[dim] {
                break;
            }
            index[dim] = 0;
        }
    }
    Ok(out)
}
