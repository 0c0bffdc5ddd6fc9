//! # llaisys
//!
//! Load Qwen2-style checkpoints into the llaisys inference engine and
//! generate tokens.
//!
//! - **Checkpoint loading**: `config.json` plus SafeTensors shards mapped
//!   into the engine's weight table, every slot written exactly once
//! - **Generation**: blocking token loop with end-token, budget and
//!   cancellation stops
//! - **Engines**: the native `libllaisys` engine (feature `native`) or the
//!   in-memory host engine for dry runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use llaisys::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let model = Model::construct("models/qwen2-1.5b", Device::cpu())?;
//!     let tokens = model.generate(&[151644, 872, 198], 32, 1, 0.8, 0.8)?;
//!     println!("{:?}", tokens);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use llaisys_core::*;

// Re-export FFI crate (for advanced users)
pub use llaisys_ffi as ffi;

mod handle;

#[cfg(feature = "native")]
mod native;

pub use handle::{Model, ModelBuilder};

#[cfg(feature = "native")]
pub use native::{NativeEngine, NativeModel, NativeSlot};

/// Commonly used types.
pub mod prelude {
    pub use crate::handle::{Model, ModelBuilder};
    #[cfg(feature = "native")]
    pub use crate::native::{NativeEngine, NativeModel};
    pub use llaisys_core::prelude::*;

    // Re-export useful external types
    pub use tracing;
}
