//! Checkpoint directory discovery and SafeTensors reading.
//!
//! A checkpoint is a HuggingFace-style model directory:
//!
//! ```text
//! model/
//! ├── config.json
//! ├── model-00001-of-00002.safetensors
//! └── model-00002-of-00002.safetensors
//! ```

use super::record::TensorRecord;
use crate::error::{LlaisysError, Result};
use crate::model::ResolvedConfig;
use memmap2::Mmap;
use safetensors::SafeTensors;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Hyperparameter file name.
pub const CONFIG_FILE: &str = "config.json";
/// Weight container extension.
pub const WEIGHTS_EXTENSION: &str = "safetensors";

/// A model directory with its config and weight shards.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    dir: PathBuf,
    weight_files: Vec<PathBuf>,
}

impl Checkpoint {
    /// Open a checkpoint directory.
    ///
    /// Requires `config.json` and at least one `.safetensors` file.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.join(CONFIG_FILE).is_file() {
            return Err(LlaisysError::Config(format!(
                "no {} in {}",
                CONFIG_FILE,
                dir.display()
            )));
        }

        let mut weight_files: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |e| e == WEIGHTS_EXTENSION) {
                weight_files.push(path);
            }
        }

        // Sort for deterministic loading order
        weight_files.sort();

        if weight_files.is_empty() {
            return Err(LlaisysError::MissingWeights(format!(
                "no .{} files found in {}",
                WEIGHTS_EXTENSION,
                dir.display()
            )));
        }

        debug!(dir = %dir.display(), files = weight_files.len(), "opened checkpoint");
        Ok(Self { dir, weight_files })
    }

    /// Checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of `config.json`.
    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Weight shards, sorted by path.
    pub fn weight_files(&self) -> &[PathBuf] {
        &self.weight_files
    }

    /// Read and resolve the hyperparameters.
    pub fn config(&self) -> Result<ResolvedConfig> {
        ResolvedConfig::from_file(&self.config_path())
    }
}

/// Visit every tensor stored in one SafeTensors file.
///
/// The file is memory-mapped for the duration of the call; records borrow
/// from the mapping. Returns the number of tensors visited.
pub(crate) fn visit_file<F>(path: &Path, mut visit: F) -> Result<usize>
where
    F: FnMut(TensorRecord<'_>) -> Result<()>,
{
    let file = File::open(path)?;
    // SAFETY: the mapping is read-only and dropped before this function
    // returns; checkpoint files are not expected to change while loading.
    let mmap = unsafe { Mmap::map(&file)? };
    let safetensors = SafeTensors::deserialize(&mmap).map_err(|e| {
        warn!(file = %path.display(), error = %e, "failed to deserialize weight file");
        e
    })?;

    let tensors = safetensors.tensors();
    let count = tensors.len();
    for (name, view) in &tensors {
        visit(TensorRecord::new(
            name,
            view.dtype(),
            view.shape().to_vec(),
            view.data(),
        ))?;
    }
    Ok(count)
}
