//! Gain - simple volume control

use crate::plugin::hosted::{InstanceInfo, PluginInstance};
use crate::plugin::PortInfo;
use crate::mixer::Mixer;
use crate::types::{Frames, Sample};

pub const URI: &str = "urn:cadence:native:gain";

/// Mono gain stage
///
/// Parameters:
/// - Gain: Volume multiplier (0.0 = silence, 1.0 = unity, 2.0 = +6dB)
///
/// Zero latency.
pub struct NativeGain {
    info: InstanceInfo,
    gain: f32,
}

impl NativeGain {
    pub fn new() -> Self {
        let info = InstanceInfo::new("Gain", URI, 1, 1)
            .with_port(PortInfo::new("Gain", 1.0).with_range(0.0, 2.0).with_unit("×"));
        Self { info, gain: 1.0 }
    }
}

impl Default for NativeGain {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginInstance for NativeGain {
    fn info(&self) -> &InstanceInfo {
        &self.info
    }

    fn activate(&mut self, _sample_rate: u32) {}

    fn set_param(&mut self, index: usize, value: f32) {
        if index == 0 {
            self.gain = value;
        }
    }

    fn run(&mut self, channels: &mut [&mut [Sample]], frames: Frames) {
        for channel in channels.iter_mut() {
            Mixer::apply_gain_to_buffer(channel, frames, self.gain);
        }
    }

    fn reset(&mut self) {
        // No state to reset
    }
}
