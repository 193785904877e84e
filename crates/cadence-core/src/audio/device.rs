//! Audio device abstraction and the offline null device

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::engine::AudioProcessor;
use crate::error::{EngineError, EngineResult};
use crate::routing::AudioChannel;
use crate::types::{Frames, DEFAULT_BLOCK_SIZE, SAMPLE_RATE};

/// Kind of driver behind an [`AudioDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverType {
    /// Port-based server; channels can be exposed as named ports
    Jack,
    /// Cross-platform device stream (cpal)
    Cpal,
    /// No hardware; blocks are pulled manually
    Null,
}

impl DriverType {
    /// Whether channels can be registered as externally visible ports
    pub fn supports_ports(self) -> bool {
        matches!(self, DriverType::Jack)
    }
}

/// What the engine needs to know about the device driving it
pub trait AudioDevice {
    /// Frames per callback
    fn block_size(&self) -> Frames;

    fn sample_rate(&self) -> u32;

    fn driver_type(&self) -> DriverType;

    /// Expose a channel as a device port
    fn register_channel(&self, channel: &AudioChannel) -> EngineResult<()>;

    /// Remove a previously registered port by channel name
    fn unregister_channel(&self, name: &str);
}

/// A device without hardware, for tests and offline rendering
///
/// Blocks are produced by calling [`NullDevice::render`]. The driver type
/// can be overridden to exercise port registration without a server.
pub struct NullDevice {
    block_size: Frames,
    sample_rate: u32,
    driver: DriverType,
    ports: Mutex<Vec<String>>,
}

impl NullDevice {
    pub fn new(block_size: Frames, sample_rate: u32) -> Self {
        Self {
            block_size,
            sample_rate,
            driver: DriverType::Null,
            ports: Mutex::new(Vec::new()),
        }
    }

    /// Report a different driver type
    pub fn with_driver(mut self, driver: DriverType) -> Self {
        self.driver = driver;
        self
    }

    /// Names of the currently registered ports
    pub fn ports(&self) -> Vec<String> {
        self.ports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Pull `blocks` blocks through the processor, as a driver callback would
    pub fn render(&self, processor: &mut AudioProcessor, blocks: usize) {
        processor.graph().set_running(true);
        for _ in 0..blocks {
            processor.process(self.block_size);
        }
        processor.graph().set_running(false);
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, SAMPLE_RATE)
    }
}

impl AudioDevice for NullDevice {
    fn block_size(&self) -> Frames {
        self.block_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn driver_type(&self) -> DriverType {
        self.driver
    }

    fn register_channel(&self, channel: &AudioChannel) -> EngineResult<()> {
        if !self.driver.supports_ports() {
            return Err(EngineError::DriverUnsupported(self.driver));
        }
        log::debug!("NullDevice: registered port '{}'", channel.name());
        self.ports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(channel.name().to_string());
        Ok(())
    }

    fn unregister_channel(&self, name: &str) {
        self.ports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|port| port != name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_jack_supports_ports() {
        assert!(DriverType::Jack.supports_ports());
        assert!(!DriverType::Cpal.supports_ports());
        assert!(!DriverType::Null.supports_ports());
    }

    #[test]
    fn test_null_device_rejects_ports() {
        let device = NullDevice::default();
        let channel = AudioChannel::new("x", 0, 8);
        assert_eq!(
            device.register_channel(&channel),
            Err(EngineError::DriverUnsupported(DriverType::Null))
        );
    }

    #[test]
    fn test_port_registration() {
        let device = NullDevice::new(64, 44100).with_driver(DriverType::Jack);
        device.register_channel(&AudioChannel::new("a", 0, 8)).unwrap();
        device.register_channel(&AudioChannel::new("b", 1, 8)).unwrap();
        device.unregister_channel("a");
        assert_eq!(device.ports(), vec!["b"]);
        assert_eq!(device.block_size(), 64);
        assert_eq!(device.sample_rate(), 44100);
    }
}
