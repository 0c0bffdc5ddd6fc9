//! Engine-ready model metadata.

use crate::dtype::DType;
use crate::error::{LlaisysError, Result};
use crate::weights::{GlobalSlot, LayerSlot, SlotId};
use serde::{Deserialize, Serialize};

/// Sentinel end token meaning "no end token configured".
pub const NO_END_TOKEN: i64 = -1;

/// Hyperparameters handed to the engine when a model is created.
///
/// Field names follow the engine's metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Compute dtype.
    pub dtype: DType,
    /// Number of transformer layers.
    pub nlayer: usize,
    /// Hidden size.
    pub hs: usize,
    /// Attention heads.
    pub nh: usize,
    /// Key/value heads.
    pub nkvh: usize,
    /// Head dimension.
    pub dh: usize,
    /// Feed-forward inner size.
    pub di: usize,
    /// Maximum sequence length.
    pub maxseq: usize,
    /// Vocabulary size.
    pub voc: usize,
    /// RMS norm epsilon.
    pub epsilon: f32,
    /// Rotary embedding base.
    pub theta: f32,
    /// End-of-sequence token, [`NO_END_TOKEN`] when absent.
    pub end_token: i64,
}

impl ModelMetadata {
    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.nh == 0 {
            return Err(LlaisysError::Config(
                "num_attention_heads must be positive".into(),
            ));
        }
        if self.nkvh == 0 || self.nkvh > self.nh {
            return Err(LlaisysError::Config(format!(
                "num_key_value_heads must be in 1..={}, got {}",
                self.nh, self.nkvh
            )));
        }
        if self.nh % self.nkvh != 0 {
            return Err(LlaisysError::Config(format!(
                "num_attention_heads ({}) must be a multiple of num_key_value_heads ({})",
                self.nh, self.nkvh
            )));
        }
        if self.dh == 0 {
            return Err(LlaisysError::Config("head_dim must be positive".into()));
        }
        if self.voc == 0 {
            return Err(LlaisysError::Config("vocab_size must be positive".into()));
        }
        Ok(())
    }

    /// The configured end token, if any.
    pub fn stop_token(&self) -> Option<i64> {
        (self.end_token != NO_END_TOKEN).then_some(self.end_token)
    }

    /// Whether key/value heads are shared between query heads.
    pub fn is_gqa(&self) -> bool {
        self.nkvh != self.nh
    }

    /// Number of slots a complete load writes.
    pub fn slot_count(&self) -> usize {
        GlobalSlot::ALL.len() + self.nlayer * LayerSlot::ALL.len()
    }

    /// Canonical row-major shape of a weight slot.
    pub fn slot_shape(&self, slot: SlotId) -> Vec<usize> {
        let q = self.nh * self.dh;
        let kv = self.nkvh * self.dh;
        match slot {
            SlotId::Global(GlobalSlot::InEmbed) | SlotId::Global(GlobalSlot::OutEmbed) => {
                vec![self.voc, self.hs]
            }
            SlotId::Global(GlobalSlot::OutNorm) => vec![self.hs],
            SlotId::Layer { kind, .. } => match kind {
                LayerSlot::AttnNorm | LayerSlot::MlpNorm => vec![self.hs],
                LayerSlot::AttnQ => vec![q, self.hs],
                LayerSlot::AttnQBias => vec![q],
                LayerSlot::AttnK | LayerSlot::AttnV => vec![kv, self.hs],
                LayerSlot::AttnKBias | LayerSlot::AttnVBias => vec![kv],
                LayerSlot::AttnO => vec![self.hs, q],
                LayerSlot::MlpGate | LayerSlot::MlpUp => vec![self.di, self.hs],
                LayerSlot::MlpDown => vec![self.hs, self.di],
            },
        }
    }
}

/// Two-layer GQA metadata used across unit tests.
#[cfg(test)]
pub(crate) fn tiny() -> ModelMetadata {
    ModelMetadata {
        dtype: DType::F32,
        nlayer: 2,
        hs: 8,
        nh: 4,
        nkvh: 2,
        dh: 2,
        di: 16,
        maxseq: 64,
        voc: 32,
        epsilon: 1e-6,
        theta: 10000.0,
        end_token: 3,
    }
}
