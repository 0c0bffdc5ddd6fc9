//! Checkpoint tensor names to engine slots.
//!
//! Qwen2/Llama-style naming conventions:
//! - `model.embed_tokens.weight` -> `in_embed`
//! - `lm_head.weight` -> `out_embed`
//! - `model.norm.weight` -> `out_norm_w`
//! - `model.layers.0.self_attn.q_proj.weight` -> `attn_q_w[0]`
//! - `model.layers.0.mlp.gate_proj.weight` -> `mlp_gate_w[0]`

use super::{GlobalSlot, LayerSlot, SlotId};
use crate::error::{LlaisysError, Result};

const LAYER_SUFFIXES: [(&str, LayerSlot); 12] = [
    ("input_layernorm.weight", LayerSlot::AttnNorm),
    ("self_attn.q_proj.weight", LayerSlot::AttnQ),
    ("self_attn.q_proj.bias", LayerSlot::AttnQBias),
    ("self_attn.k_proj.weight", LayerSlot::AttnK),
    ("self_attn.k_proj.bias", LayerSlot::AttnKBias),
    ("self_attn.v_proj.weight", LayerSlot::AttnV),
    ("self_attn.v_proj.bias", LayerSlot::AttnVBias),
    ("self_attn.o_proj.weight", LayerSlot::AttnO),
    ("post_attention_layernorm.weight", LayerSlot::MlpNorm),
    ("mlp.gate_proj.weight", LayerSlot::MlpGate),
    ("mlp.up_proj.weight", LayerSlot::MlpUp),
    ("mlp.down_proj.weight", LayerSlot::MlpDown),
];

/// Resolve a checkpoint tensor name to its destination slot.
///
/// Returns `Ok(None)` for tensors the engine has no slot for, such as
/// rotary caches. A recognised per-layer name whose index is not below
/// `nlayer` is a [`LlaisysError::ShapeMismatch`].
pub fn resolve(name: &str, nlayer: usize) -> Result<Option<SlotId>> {
    let name = name.strip_prefix("model.").unwrap_or(name);

    let global = match name {
        "embed_tokens.weight" => Some(GlobalSlot::InEmbed),
        "lm_head.weight" => Some(GlobalSlot::OutEmbed),
        "norm.weight" => Some(GlobalSlot::OutNorm),
        _ => None,
    };
    if let Some(slot) = global {
        return Ok(Some(SlotId::Global(slot)));
    }

    let Some(rest) = name.strip_prefix("layers.") else {
        return Ok(None);
    };
    let Some((index, suffix)) = rest.split_once('.') else {
        return Ok(None);
    };
    let Some(kind) = LAYER_SUFFIXES
        .iter()
        .find(|(known, _)| *known == suffix)
        .map(|(_, kind)| *kind)
    else {
        return Ok(None);
    };
    // Canonical decimal only: no sign, no leading zeros.
    let canonical = !index.is_empty()
        && index.bytes().all(|b| b.is_ascii_digit())
        && (index == "0" || !index.starts_with('0'));
    if !canonical {
        return Ok(None);
    }
    let Ok(layer) = index.parse::<usize>() else {
        return Ok(None);
    };

    if layer >= nlayer {
        return Err(LlaisysError::ShapeMismatch(format!(
            "tensor {} targets layer {} but the model has {} layers",
            name, layer, nlayer
        )));
    }
    Ok(Some(SlotId::layer(kind, layer)))
}
