//! GainEnvelope - the track fader

use std::sync::Arc;

use super::{apply_port_states, control_ports, ControlPorts, Plugin, PluginState, PortInfo};
use crate::error::EngineResult;
use crate::mixer::Mixer;
use crate::routing::AudioBus;
use crate::types::{AtomicF32, Frames};

/// Index of the gain control port
pub const GAIN_PORT: usize = 0;

/// The fader every plugin chain contains exactly once
///
/// Applies the fader gain, then the owning track's pan as a balance law:
/// positive pan attenuates channel 0 by `1 - pan`, negative pan attenuates
/// channel 1 by `1 + pan`. Gain is a control port (persisted with the
/// chain); pan belongs to the track and is shared through [`Self::pan_handle`].
pub struct GainEnvelope {
    ports: ControlPorts,
    pan: Arc<AtomicF32>,
}

impl GainEnvelope {
    pub const TYPE_NAME: &'static str = "GainEnvelope";

    pub fn new() -> Self {
        Self {
            ports: control_ports(&[PortInfo::new("Gain", 1.0).with_range(0.0, 2.0)]),
            pan: Arc::new(AtomicF32::new(0.0)),
        }
    }

    /// Shared pan value applied after the gain
    pub fn pan_handle(&self) -> Arc<AtomicF32> {
        self.pan.clone()
    }

    /// Effective multiplier for `channel`
    #[inline]
    pub fn channel_factor(gain: f32, pan: f32, channel: usize) -> f32 {
        match channel {
            0 if pan > 0.0 => gain * (1.0 - pan),
            1 if pan < 0.0 => gain * (1.0 + pan),
            _ => gain,
        }
    }
}

impl Default for GainEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for GainEnvelope {
    fn name(&self) -> &str {
        "Gain Envelope"
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn process(&mut self, bus: &AudioBus, frames: Frames) {
        let gain = self.ports[GAIN_PORT].value();
        let pan = self.pan.load();

        for channel in 0..bus.channel_count() {
            let factor = Self::channel_factor(gain, pan, channel);
            if factor == 1.0 {
                continue;
            }
            if let Some(mut buf) = bus.get_buffer(channel, frames) {
                Mixer::apply_gain_to_buffer(&mut buf, frames, factor);
            }
        }
    }

    fn control_ports(&self) -> ControlPorts {
        self.ports.clone()
    }

    fn get_state(&self) -> PluginState {
        let mut state = PluginState::new(Self::TYPE_NAME);
        state.ports = self.ports.iter().map(|p| p.to_state()).collect();
        state
    }

    fn set_state(&mut self, state: &PluginState) -> EngineResult<()> {
        apply_port_states(&self.ports, &state.ports);
        Ok(())
    }
}
