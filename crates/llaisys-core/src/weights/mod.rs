//! Engine weight layout and checkpoint loading.
//!
//! The engine exposes a fixed table of weight slots: three global tensors
//! plus one array per layer component, each holding exactly `nlayer`
//! entries. This module provides:
//! - [`SlotId`] - Addresses a single slot
//! - [`WeightSet`] - Bounds-checked slot table
//! - [`SlotLedger`] - Tracks which slots have been written
//! - [`WeightMapper`] - Copies checkpoint tensors into the table

mod checkpoint;
mod mapper;
mod names;
mod record;

pub use checkpoint::{Checkpoint, CONFIG_FILE, WEIGHTS_EXTENSION};
pub use mapper::{LoadOptions, LoadReport, WeightMapper};
pub use names::resolve as resolve_name;
pub use record::TensorRecord;

use crate::error::{LlaisysError, Result};
use std::fmt;

/// Model-wide weight slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalSlot {
    /// Input token embedding.
    InEmbed,
    /// Output projection (LM head).
    OutEmbed,
    /// Final normalization weight.
    OutNorm,
}

impl GlobalSlot {
    /// Every global slot, in table order.
    pub const ALL: [GlobalSlot; 3] = [Self::InEmbed, Self::OutEmbed, Self::OutNorm];

    /// Engine-side field name.
    pub fn name(self) -> &'static str {
        match self {
            Self::InEmbed => "in_embed",
            Self::OutEmbed => "out_embed",
            Self::OutNorm => "out_norm_w",
        }
    }
}

/// Per-layer weight slot arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerSlot {
    /// Attention input norm.
    AttnNorm,
    /// Query projection weight.
    AttnQ,
    /// Query projection bias.
    AttnQBias,
    /// Key projection weight.
    AttnK,
    /// Key projection bias.
    AttnKBias,
    /// Value projection weight.
    AttnV,
    /// Value projection bias.
    AttnVBias,
    /// Attention output projection.
    AttnO,
    /// Post-attention norm.
    MlpNorm,
    /// Gate projection.
    MlpGate,
    /// Up projection.
    MlpUp,
    /// Down projection.
    MlpDown,
}

impl LayerSlot {
    /// Every per-layer array, in table order.
    pub const ALL: [LayerSlot; 12] = [
        Self::AttnNorm,
        Self::AttnQ,
        Self::AttnQBias,
        Self::AttnK,
        Self::AttnKBias,
        Self::AttnV,
        Self::AttnVBias,
        Self::AttnO,
        Self::MlpNorm,
        Self::MlpGate,
        Self::MlpUp,
        Self::MlpDown,
    ];

    /// Engine-side field name.
    pub fn name(self) -> &'static str {
        match self {
            Self::AttnNorm => "attn_norm_w",
            Self::AttnQ => "attn_q_w",
            Self::AttnQBias => "attn_q_b",
            Self::AttnK => "attn_k_w",
            Self::AttnKBias => "attn_k_b",
            Self::AttnV => "attn_v_w",
            Self::AttnVBias => "attn_v_b",
            Self::AttnO => "attn_o_w",
            Self::MlpNorm => "mlp_norm_w",
            Self::MlpGate => "mlp_gate_w",
            Self::MlpUp => "mlp_up_w",
            Self::MlpDown => "mlp_down_w",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Address of one weight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    /// A model-wide slot.
    Global(GlobalSlot),
    /// Element `layer` of a per-layer array.
    Layer {
        /// Which array.
        kind: LayerSlot,
        /// Layer index.
        layer: usize,
    },
}

impl SlotId {
    /// Shorthand for a per-layer slot.
    pub fn layer(kind: LayerSlot, layer: usize) -> Self {
        Self::Layer { kind, layer }
    }

    /// Position in a flat table of `3 + nlayer * 12` entries.
    fn flat_index(self, nlayer: usize) -> Option<usize> {
        match self {
            Self::Global(slot) => Some(slot as usize),
            Self::Layer { kind, layer } if layer < nlayer => {
                Some(GlobalSlot::ALL.len() + kind.index() * nlayer + layer)
            }
            Self::Layer { .. } => None,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global(slot) => f.write_str(slot.name()),
            Self::Layer { kind, layer } => write!(f, "{}[{}]", kind.name(), layer),
        }
    }
}

fn out_of_range(id: SlotId, nlayer: usize) -> LlaisysError {
    LlaisysError::ShapeMismatch(format!(
        "slot {} is outside the {} allocated layers",
        id, nlayer
    ))
}

/// The engine's weight table.
///
/// Per-layer arrays always hold exactly `nlayer` entries; every lookup is
/// bounds-checked.
#[derive(Debug)]
pub struct WeightSet<S> {
    nlayer: usize,
    in_embed: S,
    out_embed: S,
    out_norm_w: S,
    /// Indexed by [`LayerSlot`] order.
    layers: Vec<Vec<S>>,
}

impl<S> WeightSet<S> {
    /// Build a table by producing every slot in order.
    pub fn try_from_fn<F>(nlayer: usize, mut make: F) -> Result<Self>
    where
        F: FnMut(SlotId) -> Result<S>,
    {
        let in_embed = make(SlotId::Global(GlobalSlot::InEmbed))?;
        let out_embed = make(SlotId::Global(GlobalSlot::OutEmbed))?;
        let out_norm_w = make(SlotId::Global(GlobalSlot::OutNorm))?;

        let mut layers = Vec::with_capacity(LayerSlot::ALL.len());
        for kind in LayerSlot::ALL {
            let array = (0..nlayer)
                .map(|layer| make(SlotId::layer(kind, layer)))
                .collect::<Result<Vec<_>>>()?;
            layers.push(array);
        }

        Ok(Self {
            nlayer,
            in_embed,
            out_embed,
            out_norm_w,
            layers,
        })
    }

    /// Number of layers the per-layer arrays were sized for.
    pub fn nlayer(&self) -> usize {
        self.nlayer
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        GlobalSlot::ALL.len() + self.nlayer * LayerSlot::ALL.len()
    }

    /// Always false: the global slots exist even for zero layers.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// A model-wide slot.
    pub fn global(&self, slot: GlobalSlot) -> &S {
        match slot {
            GlobalSlot::InEmbed => &self.in_embed,
            GlobalSlot::OutEmbed => &self.out_embed,
            GlobalSlot::OutNorm => &self.out_norm_w,
        }
    }

    /// One per-layer array.
    pub fn layer_array(&self, kind: LayerSlot) -> &[S] {
        &self.layers[kind.index()]
    }

    /// Look up a slot.
    pub fn slot(&self, id: SlotId) -> Result<&S> {
        match id {
            SlotId::Global(slot) => Ok(self.global(slot)),
            SlotId::Layer { kind, layer } => self.layers[kind.index()]
                .get(layer)
                .ok_or_else(|| out_of_range(id, self.nlayer)),
        }
    }

    /// Look up a slot for writing.
    pub fn slot_mut(&mut self, id: SlotId) -> Result<&mut S> {
        let nlayer = self.nlayer;
        match id {
            SlotId::Global(GlobalSlot::InEmbed) => Ok(&mut self.in_embed),
            SlotId::Global(GlobalSlot::OutEmbed) => Ok(&mut self.out_embed),
            SlotId::Global(GlobalSlot::OutNorm) => Ok(&mut self.out_norm_w),
            SlotId::Layer { kind, layer } => self.layers[kind.index()]
                .get_mut(layer)
                .ok_or_else(|| out_of_range(id, nlayer)),
        }
    }

    /// Every slot id in table order.
    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        slot_ids(self.nlayer)
    }

    /// Every slot with its id.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &S)> + '_ {
        self.slot_ids().map(move |id| {
            let slot = match id {
                SlotId::Global(g) => self.global(g),
                SlotId::Layer { kind, layer } => &self.layers[kind.index()][layer],
            };
            (id, slot)
        })
    }
}

fn slot_ids(nlayer: usize) -> impl Iterator<Item = SlotId> {
    let globals = GlobalSlot::ALL.into_iter().map(SlotId::Global);
    let layers = LayerSlot::ALL
        .into_iter()
        .flat_map(move |kind| (0..nlayer).map(move |layer| SlotId::layer(kind, layer)));
    globals.chain(layers)
}

/// Record of which slots received their single write.
#[derive(Debug, Clone)]
pub struct SlotLedger {
    nlayer: usize,
    written: Vec<bool>,
}

impl SlotLedger {
    /// Empty ledger for a model with `nlayer` layers.
    pub fn new(nlayer: usize) -> Self {
        Self {
            nlayer,
            written: vec![false; GlobalSlot::ALL.len() + nlayer * LayerSlot::ALL.len()],
        }
    }

    /// Check that `id` exists and has not been written yet.
    pub fn check(&self, id: SlotId) -> Result<()> {
        let index = id
            .flat_index(self.nlayer)
            .ok_or_else(|| out_of_range(id, self.nlayer))?;
        if self.written[index] {
            return Err(LlaisysError::DuplicateWeight(format!(
                "slot {} was already written",
                id
            )));
        }
        Ok(())
    }

    /// Mark `id` as written; a second mark is an error.
    pub fn mark(&mut self, id: SlotId) -> Result<()> {
        self.check(id)?;
        if let Some(index) = id.flat_index(self.nlayer) {
            self.written[index] = true;
        }
        Ok(())
    }

    /// Whether `id` has been written.
    pub fn is_written(&self, id: SlotId) -> bool {
        id.flat_index(self.nlayer)
            .map_or(false, |index| self.written[index])
    }

    /// Number of slots written so far.
    pub fn written_count(&self) -> usize {
        self.written.iter().filter(|w| **w).count()
    }

    /// Slots still waiting for a write, in table order.
    pub fn missing(&self) -> Vec<SlotId> {
        slot_ids(self.nlayer)
            .filter(|id| !self.is_written(*id))
            .collect()
    }

    /// True once every slot has been written.
    pub fn is_complete(&self) -> bool {
        self.written.iter().all(|w| *w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(nlayer: usize) -> WeightSet<String> {
        WeightSet::try_from_fn(nlayer, |id| Ok(id.to_string())).unwrap()
    }

    #[test]
    fn per_layer_arrays_have_nlayer_entries() {
        let set = numbered(3);
        for kind in LayerSlot::ALL {
            assert_eq!(set.layer_array(kind).len(), 3);
        }
        assert_eq!(set.len(), 3 + 3 * 12);
        assert_eq!(set.iter().count(), set.len());
    }

    #[test]
    fn slot_lookup_hits_matching_element() {
        let set = numbered(4);
        for kind in LayerSlot::ALL {
            for layer in [0, 3] {
                let id = SlotId::layer(kind, layer);
                assert_eq!(set.slot(id).unwrap(), &id.to_string());
            }
        }
        assert_eq!(set.slot(SlotId::Global(GlobalSlot::OutNorm)).unwrap(), "out_norm_w");
    }

    #[test]
    fn out_of_range_layer_is_shape_mismatch() {
        let mut set = numbered(2);
        let id = SlotId::layer(LayerSlot::MlpDown, 2);
        assert!(matches!(set.slot(id), Err(LlaisysError::ShapeMismatch(_))));
        assert!(matches!(set.slot_mut(id), Err(LlaisysError::ShapeMismatch(_))));
    }

    #[test]
    fn construction_error_propagates() {
        let result: Result<WeightSet<()>> = WeightSet::try_from_fn(2, |id| match id {
            SlotId::Layer { kind: LayerSlot::AttnV, layer: 1 } => {
                Err(LlaisysError::Create("null slot".into()))
            }
            _ => Ok(()),
        });
        assert!(matches!(result, Err(LlaisysError::Create(_))));
    }

    #[test]
    fn slot_display_names() {
        assert_eq!(SlotId::Global(GlobalSlot::InEmbed).to_string(), "in_embed");
        assert_eq!(SlotId::layer(LayerSlot::AttnKBias, 7).to_string(), "attn_k_b[7]");
    }

    #[test]
    fn ledger_tracks_writes() {
        let mut ledger = SlotLedger::new(1);
        assert_eq!(ledger.missing().len(), 15);

        ledger.mark(SlotId::Global(GlobalSlot::InEmbed)).unwrap();
        assert!(ledger.is_written(SlotId::Global(GlobalSlot::InEmbed)));
        assert_eq!(ledger.written_count(), 1);

        let dup = ledger.mark(SlotId::Global(GlobalSlot::InEmbed));
        assert!(matches!(dup, Err(LlaisysError::DuplicateWeight(_))));

        let oob = ledger.mark(SlotId::layer(LayerSlot::AttnQ, 1));
        assert!(matches!(oob, Err(LlaisysError::ShapeMismatch(_))));

        for id in ledger.missing() {
            ledger.mark(id).unwrap();
        }
        assert!(ledger.is_complete());
        assert!(ledger.missing().is_empty());
    }

    #[test]
    fn flat_indices_are_distinct() {
        let nlayer = 3;
        let mut seen: Vec<usize> = slot_ids(nlayer)
            .map(|id| id.flat_index(nlayer).unwrap())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 3 + nlayer * 12);
        assert_eq!(*seen.last().unwrap(), 3 + nlayer * 12 - 1);
    }
}
