//! Copies checkpoint tensors into the engine's weight table.

use super::checkpoint::{self, Checkpoint};
use super::names;
use super::record::TensorRecord;
use super::{GlobalSlot, SlotId, SlotLedger, WeightSet};
use crate::dtype::DType;
use crate::engine::WeightSlot;
use crate::error::{LlaisysError, Result};
use crate::model::{ModelMetadata, ResolvedConfig};
use std::path::Path;
use tracing::{debug, info, trace};

/// Missing slot names listed in an error before truncating.
const MAX_LISTED_MISSING: usize = 16;

/// Checkpoint-dependent loading behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Fill the output embedding from the input embedding tensor.
    pub tie_word_embeddings: bool,
}

impl From<&ResolvedConfig> for LoadOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            tie_word_embeddings: config.tie_word_embeddings,
        }
    }
}

/// Summary of a completed load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Weight files read.
    pub files: usize,
    /// Tensors encountered across all files.
    pub tensors_seen: usize,
    /// Slots written.
    pub slots_written: usize,
    /// Tensors without a destination slot.
    pub ignored: usize,
    /// Tensors that needed an element conversion.
    pub converted: usize,
}

/// Populates every slot of a [`WeightSet`] exactly once.
///
/// Feed it records or whole files in any order, then call
/// [`finish`](Self::finish) to confirm nothing is missing.
pub struct WeightMapper<'w, S> {
    weights: &'w mut WeightSet<S>,
    dtype: DType,
    options: LoadOptions,
    ledger: SlotLedger,
    report: LoadReport,
}

impl<'w, S: WeightSlot> WeightMapper<'w, S> {
    /// Create a mapper writing into `weights`.
    pub fn new(
        weights: &'w mut WeightSet<S>,
        metadata: &ModelMetadata,
        options: LoadOptions,
    ) -> Result<Self> {
        if weights.nlayer() != metadata.nlayer {
            return Err(LlaisysError::ShapeMismatch(format!(
                "engine allocated {} layers but the model declares {}",
                weights.nlayer(),
                metadata.nlayer
            )));
        }
        Ok(Self {
            ledger: SlotLedger::new(metadata.nlayer),
            weights,
            dtype: metadata.dtype,
            options,
            report: LoadReport::default(),
        })
    }

    /// Slots written so far.
    pub fn ledger(&self) -> &SlotLedger {
        &self.ledger
    }

    /// Copy one tensor into its slot.
    ///
    /// Returns the primary destination, or `None` when the tensor has no
    /// slot and was skipped.
    pub fn load_record(&mut self, record: &TensorRecord<'_>) -> Result<Option<SlotId>> {
        self.report.tensors_seen += 1;

        let Some(slot) = names::resolve(record.name, self.weights.nlayer())? else {
            trace!(tensor = record.name, "no slot for tensor, skipping");
            self.report.ignored += 1;
            return Ok(None);
        };

        let tied = self.options.tie_word_embeddings;
        let targets = match slot {
            SlotId::Global(GlobalSlot::OutEmbed) if tied => {
                debug!(tensor = record.name, "output embedding is tied, skipping");
                self.report.ignored += 1;
                return Ok(None);
            }
            SlotId::Global(GlobalSlot::InEmbed) if tied => vec![
                SlotId::Global(GlobalSlot::InEmbed),
                SlotId::Global(GlobalSlot::OutEmbed),
            ],
            _ => vec![slot],
        };

        for &target in &targets {
            self.ledger.check(target)?;
        }

        let bytes = record.prepare(self.dtype)?;

        for &target in &targets {
            let expected = self.weights.slot(target)?.byte_len();
            if bytes.len() != expected {
                return Err(LlaisysError::ShapeMismatch(format!(
                    "tensor {} {:?} provides {} bytes as {} but slot {} holds {} bytes",
                    record.name,
                    record.shape,
                    bytes.len(),
                    self.dtype,
                    target,
                    expected
                )));
            }
        }

        for &target in &targets {
            self.weights.slot_mut(target)?.copy_from(&bytes)?;
            self.ledger.mark(target)?;
            self.report.slots_written += 1;
        }
        if record.needs_conversion(self.dtype) {
            self.report.converted += 1;
        }

        trace!(tensor = record.name, slot = %slot, bytes = bytes.len(), "loaded tensor");
        Ok(Some(slot))
    }

    /// Load every tensor of one SafeTensors file.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let before = self.report.slots_written;
        let count = checkpoint::visit_file(path, |record| self.load_record(&record).map(|_| ()))?;
        self.report.files += 1;
        debug!(
            file = %path.display(),
            tensors = count,
            slots = self.report.slots_written - before,
            "loaded weight file"
        );
        Ok(())
    }

    /// Load several files, in the order given.
    pub fn load_files<I, P>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.load_file(path.as_ref())?;
        }
        Ok(())
    }

    /// Load every weight file of a checkpoint.
    pub fn load_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.load_files(checkpoint.weight_files())
    }

    /// Confirm every slot was written and return the load summary.
    pub fn finish(self) -> Result<LoadReport> {
        let missing = self.ledger.missing();
        if !missing.is_empty() {
            let mut listed: Vec<String> = missing
                .iter()
                .take(MAX_LISTED_MISSING)
                .map(ToString::to_string)
                .collect();
            if missing.len() > MAX_LISTED_MISSING {
                listed.push(format!("and {} more", missing.len() - MAX_LISTED_MISSING));
            }
            return Err(LlaisysError::MissingWeights(format!(
                "{} of {} slots unwritten: {}",
                missing.len(),
                self.weights.len(),
                listed.join(", ")
            )));
        }

        let report = self.report;
        info!(
            files = report.files,
            tensors = report.tensors_seen,
            slots = report.slots_written,
            ignored = report.ignored,
            converted = report.converted,
            dtype = %self.dtype,
            "weights loaded"
        );
        Ok(report)
    }
}
