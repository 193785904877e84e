//! One-pole lowpass filter

use crate::plugin::hosted::{InstanceInfo, PluginInstance};
use crate::plugin::PortInfo;
use crate::types::{Frames, Sample, SAMPLE_RATE};

pub const URI: &str = "urn:cadence:native:lowpass";

/// 6dB/octave lowpass, mono
///
/// Parameters:
/// - Cutoff: corner frequency in Hz (20-20000)
///
/// Keeps one sample of filter memory, so a muted track that keeps
/// processing continues its tail seamlessly.
pub struct OnePoleLowpass {
    info: InstanceInfo,
    sample_rate: f32,
    cutoff: f32,
    coeff: f32,
    z1: f32,
}

impl OnePoleLowpass {
    pub fn new() -> Self {
        let info = InstanceInfo::new("Lowpass", URI, 1, 1).with_port(
            PortInfo::new("Cutoff", 1000.0)
                .with_range(20.0, 20000.0)
                .with_unit("Hz"),
        );
        let mut filter = Self {
            info,
            sample_rate: SAMPLE_RATE as f32,
            cutoff: 1000.0,
            coeff: 0.0,
            z1: 0.0,
        };
        filter.update_coeff();
        filter
    }

    fn update_coeff(&mut self) {
        let cutoff = self.cutoff.clamp(20.0, self.sample_rate * 0.49);
        self.coeff = 1.0 - (-2.0 * std::f32::consts::PI * cutoff / self.sample_rate).exp();
    }

    /// Current filter memory
    pub fn state(&self) -> f32 {
        self.z1
    }
}

impl Default for OnePoleLowpass {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginInstance for OnePoleLowpass {
    fn info(&self) -> &InstanceInfo {
        &self.info
    }

    fn activate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.update_coeff();
    }

    fn set_param(&mut self, index: usize, value: f32) {
        if index == 0 && value != self.cutoff {
            self.cutoff = value;
            self.update_coeff();
        }
    }

    fn run(&mut self, channels: &mut [&mut [Sample]], frames: Frames) {
        // Mono instance; a slave handles the second channel
        let Some(channel) = channels.first_mut() else {
            return;
        };
        for s in channel.iter_mut().take(frames) {
            self.z1 += self.coeff * (*s - self.z1);
            *s = self.z1;
        }
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_converges() {
        let mut filter = OnePoleLowpass::new();
        filter.activate(48000);
        let mut buf = vec![1.0; 4800];
        filter.run(&mut [&mut buf[..]], 4800);
        assert!((buf[4799] - 1.0).abs() < 1e-3);
        assert!(buf[0] < 0.5);
    }

    #[test]
    fn test_reset_clears_memory() {
        let mut filter = OnePoleLowpass::new();
        let mut buf = [1.0; 16];
        filter.run(&mut [&mut buf[..]], 16);
        assert!(filter.state() > 0.0);
        filter.reset();
        assert_eq!(filter.state(), 0.0);
    }
}
