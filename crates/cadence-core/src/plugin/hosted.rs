//! Hosted plugins - generic processors behind the `PluginInstance` seam
//!
//! A [`PluginInstance`] is the minimal "run a buffer" contract a plugin
//! format adapter has to provide. [`HostedPlugin`] adapts an instance to the
//! chain's [`Plugin`] trait: it maps bus channels onto the instance's audio
//! ports and pushes control port values into the instance before each run.
//!
//! Mono instances (one audio input, one audio output) get a second
//! instance, the slave, so a stereo bus is processed as two independent
//! mono streams: the master runs on channel 0, the slave on channel 1.

use std::sync::Arc;

use super::{apply_port_states, control_ports, ControlPorts, Plugin, PluginState, PortInfo};
use crate::error::{EngineError, EngineResult};
use crate::routing::AudioBus;
use crate::types::{Frames, Sample};

/// Static description of a plugin instance
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    /// Plugin name for display
    pub name: String,
    /// Unique identifier used to recreate the plugin on load
    pub uri: String,
    pub audio_inputs: usize,
    pub audio_outputs: usize,
    /// Control ports, indexed in order
    pub ports: Vec<PortInfo>,
    /// Processing latency in samples
    pub latency_samples: u32,
}

impl InstanceInfo {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, inputs: usize, outputs: usize) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            audio_inputs: inputs,
            audio_outputs: outputs,
            ports: Vec::new(),
            latency_samples: 0,
        }
    }

    /// Add a control port
    pub fn with_port(mut self, port: PortInfo) -> Self {
        self.ports.push(port);
        self
    }

    pub fn is_mono(&self) -> bool {
        self.audio_inputs == 1 && self.audio_outputs == 1
    }
}

/// A running plugin instance
///
/// `run` processes the given channels in place; `channels.len()` never
/// exceeds the instance's audio output count.
pub trait PluginInstance: Send {
    fn info(&self) -> &InstanceInfo;

    /// Prepare for processing at `sample_rate`
    fn activate(&mut self, sample_rate: u32);

    /// Set a control value by port index (actual units)
    fn set_param(&mut self, index: usize, value: f32);

    fn run(&mut self, channels: &mut [&mut [Sample]], frames: Frames);

    /// Clear internal state
    fn reset(&mut self);
}

/// Creates fresh instances of one plugin
pub type InstanceConstructor = Arc<dyn Fn() -> Box<dyn PluginInstance> + Send + Sync>;

/// A [`PluginInstance`] hosted in a plugin chain
pub struct HostedPlugin {
    name: String,
    uri: String,
    latency: u32,
    channels: usize,
    instance: Box<dyn PluginInstance>,
    slave: Option<Box<dyn PluginInstance>>,
    ports: ControlPorts,
}

impl HostedPlugin {
    pub const TYPE_NAME: &'static str = "HostedPlugin";

    /// Instantiate and activate a plugin, plus its slave for mono instances
    pub fn new(constructor: &InstanceConstructor, sample_rate: u32) -> EngineResult<Self> {
        let mut instance = constructor();
        let info = instance.info().clone();

        if info.audio_inputs == 0 || info.audio_outputs == 0 {
            return Err(EngineError::PluginInit {
                name: info.name,
                reason: "plugin has no audio ports".to_string(),
            });
        }

        instance.activate(sample_rate);

        let slave = if info.is_mono() {
            let mut slave = constructor();
            slave.activate(sample_rate);
            log::debug!("HostedPlugin '{}': created slave for channel 1", info.name);
            Some(slave)
        } else {
            None
        };

        log::info!(
            "HostedPlugin '{}' ({}): {} in / {} out, {} ports",
            info.name,
            info.uri,
            info.audio_inputs,
            info.audio_outputs,
            info.ports.len()
        );

        Ok(Self {
            ports: control_ports(&info.ports),
            channels: info.audio_outputs.min(info.audio_inputs).min(2),
            latency: info.latency_samples,
            name: info.name,
            uri: info.uri,
            instance,
            slave,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn has_slave(&self) -> bool {
        self.slave.is_some()
    }

    fn sync_params(&mut self) {
        for port in self.ports.iter() {
            self.instance.set_param(port.index(), port.value());
            if let Some(slave) = self.slave.as_mut() {
                slave.set_param(port.index(), port.value());
            }
        }
    }
}

impl Plugin for HostedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn process(&mut self, bus: &AudioBus, frames: Frames) {
        self.sync_params();

        if self.channels == 1 {
            if let Some(mut left) = bus.get_buffer(0, frames) {
                self.instance.run(&mut [&mut left[..]], frames);
            }
            if let (Some(slave), Some(mut right)) = (self.slave.as_mut(), bus.get_buffer(1, frames)) {
                slave.run(&mut [&mut right[..]], frames);
            }
            return;
        }

        let left = bus.get_buffer(0, frames);
        let right = bus.get_buffer(1, frames);
        match (left, right) {
            (Some(mut left), Some(mut right)) => {
                self.instance.run(&mut [&mut left[..], &mut right[..]], frames);
            }
            (Some(mut left), None) if bus.channel_count() == 1 => {
                self.instance.run(&mut [&mut left[..]], frames);
            }
            _ => log::trace!("HostedPlugin '{}': channels busy, skipping block", self.name),
        }
    }

    fn control_ports(&self) -> ControlPorts {
        self.ports.clone()
    }

    fn latency_samples(&self) -> u32 {
        self.latency
    }

    fn get_state(&self) -> PluginState {
        let mut state = PluginState::new(Self::TYPE_NAME);
        state.uri = Some(self.uri.clone());
        state.ports = self.ports.iter().map(|p| p.to_state()).collect();
        state
    }

    fn set_state(&mut self, state: &PluginState) -> EngineResult<()> {
        if let Some(uri) = state.uri.as_deref() {
            if uri != self.uri {
                return Err(EngineError::InvalidState(format!(
                    "state for '{}' applied to '{}'",
                    uri, self.uri
                )));
            }
        }
        apply_port_states(&self.ports, &state.ports);
        Ok(())
    }

    fn reset(&mut self) {
        self.instance.reset();
        if let Some(slave) = self.slave.as_mut() {
            slave.reset();
        }
    }
}
