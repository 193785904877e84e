//! Engine configuration
//!
//! [`EngineConfig`] is loaded from YAML with [`load_config`]; every field has
//! a default so partial files work.
//!
//! ```ignore
//! use cadence_core::config::{default_config_path, load_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path("config.yaml"));
//! let session = Session::new(&config);
//! ```

mod io;
mod paths;

pub use io::{load_config, read_config, save_config};
pub use paths::{default_config_dir, default_config_path};

use serde::{Deserialize, Serialize};

use crate::audio::{AudioConfig, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::engine::command::COMMAND_QUEUE_CAPACITY;
use crate::types::{Frames, DEFAULT_BLOCK_SIZE, DEFAULT_CHANNEL_COUNT, SAMPLE_RATE};

/// A device input exposed as a capture bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureBusConfig {
    pub name: String,
    pub channels: usize,
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest block the graph renders in one call (frames)
    pub block_size: Frames,

    /// Rate used for plugin instantiation until a device reports its own
    pub sample_rate: u32,

    /// Transport command queue capacity
    pub command_queue_capacity: usize,

    /// Channel count of newly created tracks
    pub default_channel_count: usize,

    /// Name of the master output bus
    pub master_bus: String,

    /// Channel count of the master output bus
    pub master_channels: usize,

    /// Capture buses created at startup
    pub capture_buses: Vec<CaptureBusConfig>,

    /// Output device selection
    pub audio: AudioConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            sample_rate: SAMPLE_RATE,
            command_queue_capacity: COMMAND_QUEUE_CAPACITY,
            default_channel_count: DEFAULT_CHANNEL_COUNT,
            master_bus: "Master".to_string(),
            master_channels: 2,
            capture_buses: vec![CaptureBusConfig {
                name: "Capture 1".to_string(),
                channels: 2,
            }],
            audio: AudioConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Block size clamped to what the engine supports
    pub fn effective_block_size(&self) -> Frames {
        self.block_size
            .clamp(MIN_BUFFER_SIZE as Frames, MAX_BUFFER_SIZE as Frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml() {
        let config: EngineConfig = serde_yaml::from_str(
            "master_bus: Main\ncapture_buses:\n  - name: Mic\n    channels: 1\naudio:\n  output_device: Speakers\n",
        )
        .unwrap();
        assert_eq!(config.master_bus, "Main");
        assert_eq!(config.block_size, 512);
        assert_eq!(config.capture_buses[0].channels, 1);
        assert_eq!(config.audio.output_device.as_deref(), Some("Speakers"));
    }

    #[test]
    fn test_block_size_clamped() {
        let config = EngineConfig {
            block_size: 3,
            ..EngineConfig::default()
        };
        assert_eq!(config.effective_block_size(), 16);
    }
}
