//! Device placement passed through to the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of device the engine places a model on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceType {
    /// Host CPU.
    #[default]
    Cpu,
    /// NVIDIA GPU.
    Nvidia,
}

/// Device type plus the device ordinals a model is spread over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Device kind.
    pub kind: DeviceType,
    /// Device ordinals, never empty.
    pub ids: Vec<i32>,
}

impl Device {
    /// Host CPU, device 0.
    pub fn cpu() -> Self {
        Self {
            kind: DeviceType::Cpu,
            ids: vec![0],
        }
    }

    /// A single NVIDIA GPU.
    pub fn nvidia(ordinal: i32) -> Self {
        Self {
            kind: DeviceType::Nvidia,
            ids: vec![ordinal],
        }
    }

    /// Replace the device ordinals. An empty list falls back to device 0.
    pub fn with_ids(mut self, ids: Vec<i32>) -> Self {
        self.ids = if ids.is_empty() { vec![0] } else { ids };
        self
    }

    /// Number of devices.
    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

impl From<DeviceType> for Device {
    fn from(kind: DeviceType) -> Self {
        Self { kind, ids: vec![0] }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DeviceType::Cpu => "cpu",
            DeviceType::Nvidia => "nvidia",
        };
        write!(f, "{}{:?}", kind, self.ids)
    }
}
