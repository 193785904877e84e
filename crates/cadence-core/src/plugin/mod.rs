//! Plugin system - trait, control ports, slots and chains
//!
//! Every processor in a track's signal path implements [`Plugin`]:
//! - [`GainEnvelope`]: the fader, present exactly once in every chain
//! - [`HostedPlugin`]: a generic hosted processor wrapping a [`PluginInstance`]
//!
//! Plugins are placed in a [`PluginSlot`] which carries the lock-free flags
//! (prefader, bypass) and control ports, and guards the processor itself
//! with a mutex the audio thread only ever `try_lock`s.

pub mod chain;
pub mod gain_envelope;
pub mod hosted;
pub mod native;
pub mod registry;

pub use chain::{ChainNode, PluginChain, PluginChainState, PluginList};
pub use gain_envelope::GainEnvelope;
pub use hosted::{HostedPlugin, InstanceInfo, PluginInstance};
pub use registry::{PluginFactory, PluginRegistry};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::routing::AudioBus;
use crate::types::{AtomicF32, Frames, PluginId};

/// Description of a plugin control port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name for display
    pub name: String,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    /// Unit label (e.g., "ms", "Hz")
    pub unit: String,
}

impl PortInfo {
    /// Create a port with a 0.0-1.0 range
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default,
            min: 0.0,
            max: 1.0,
            unit: String::new(),
        }
    }

    /// Set the value range
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the unit label
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// A live control value shared between control and audio threads
///
/// Values are in actual units (not normalized) and clamped to the port range.
#[derive(Debug)]
pub struct ControlPort {
    index: usize,
    info: PortInfo,
    value: AtomicF32,
}

impl ControlPort {
    pub fn new(index: usize, info: PortInfo) -> Self {
        let value = AtomicF32::new(info.default);
        Self { index, info, value }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value.load()
    }

    pub fn set_value(&self, value: f32) {
        self.value.store(value.clamp(self.info.min, self.info.max));
    }

    pub fn to_state(&self) -> ControlPortState {
        ControlPortState {
            index: self.index,
            name: self.info.name.clone(),
            value: self.value(),
            min: self.info.min,
            max: self.info.max,
            default: self.info.default,
        }
    }
}

/// Shared set of control ports for one plugin
pub type ControlPorts = Arc<[ControlPort]>;

/// Build a port set from descriptions, indexed in order
pub fn control_ports(infos: &[PortInfo]) -> ControlPorts {
    infos
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, info)| ControlPort::new(index, info))
        .collect::<Vec<_>>()
        .into()
}

/// Apply persisted port values by index; unknown indices are ignored
pub fn apply_port_states(ports: &[ControlPort], states: &[ControlPortState]) {
    for state in states {
        match ports.iter().find(|p| p.index() == state.index) {
            Some(port) => port.set_value(state.value),
            None => log::debug!("Ignoring state for unknown control port {}", state.index),
        }
    }
}

/// Persisted control port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPortState {
    pub index: usize,
    #[serde(default)]
    pub name: String,
    pub value: f32,
    #[serde(default)]
    pub min: f32,
    #[serde(default)]
    pub max: f32,
    #[serde(default)]
    pub default: f32,
}

/// Persisted plugin; `type` selects the constructor on load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginState {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub prefader: bool,
    #[serde(default)]
    pub bypassed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub ports: Vec<ControlPortState>,
}

impl PluginState {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            prefader: false,
            bypassed: false,
            uri: None,
            ports: Vec::new(),
        }
    }
}

/// The processing contract shared by the fader and hosted plugins
///
/// `process` runs on the audio thread and works in place on the bus
/// channels. It must not allocate, block or log above trace level.
pub trait Plugin: Send {
    /// Display name
    fn name(&self) -> &str;

    /// Persisted `type` discriminator
    fn type_name(&self) -> &'static str;

    /// Process `frames` samples of every channel in `bus`, in place
    fn process(&mut self, bus: &AudioBus, frames: Frames);

    /// Control ports, shared with the slot for lock-free updates
    fn control_ports(&self) -> ControlPorts;

    /// Processing latency in samples
    fn latency_samples(&self) -> u32 {
        0
    }

    /// Type, uri and port values; slot-level fields are filled by the slot
    fn get_state(&self) -> PluginState;

    /// Apply persisted port values and plugin specific settings
    fn set_state(&mut self, state: &PluginState) -> EngineResult<()>;

    /// Clear internal DSP state (delay lines, filter memory)
    fn reset(&mut self) {}
}

/// A plugin placed in a chain
///
/// Flags and control ports are atomics so they can be changed while the
/// transport is rolling. The processor is guarded by a mutex: the audio
/// thread uses `try_lock` and skips the plugin for one block on contention,
/// the control thread only locks it for state transfer.
pub struct PluginSlot {
    id: PluginId,
    name: String,
    type_name: &'static str,
    latency: u32,
    prefader: AtomicBool,
    bypassed: AtomicBool,
    controls: ControlPorts,
    processor: Mutex<Box<dyn Plugin>>,
}

impl PluginSlot {
    pub fn new(plugin: Box<dyn Plugin>, prefader: bool) -> Self {
        Self::with_id(PluginId::new(), plugin, prefader)
    }

    pub fn with_id(id: PluginId, plugin: Box<dyn Plugin>, prefader: bool) -> Self {
        Self {
            id,
            name: plugin.name().to_string(),
            type_name: plugin.type_name(),
            latency: plugin.latency_samples(),
            prefader: AtomicBool::new(prefader),
            bypassed: AtomicBool::new(false),
            controls: plugin.control_ports(),
            processor: Mutex::new(plugin),
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_fader(&self) -> bool {
        self.type_name == GainEnvelope::TYPE_NAME
    }

    pub fn is_prefader(&self) -> bool {
        self.prefader.load(Ordering::Relaxed)
    }

    pub fn set_prefader(&self, prefader: bool) {
        self.prefader.store(prefader, Ordering::Relaxed);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Relaxed)
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypassed.store(bypass, Ordering::Relaxed);
    }

    pub fn latency_samples(&self) -> u32 {
        self.latency
    }

    pub fn controls(&self) -> &[ControlPort] {
        &self.controls
    }

    /// Set a control port by index; false if no such port
    pub fn set_control(&self, index: usize, value: f32) -> bool {
        match self.controls.iter().find(|p| p.index() == index) {
            Some(port) => {
                port.set_value(value);
                true
            }
            None => false,
        }
    }

    /// Run the plugin on the audio thread
    ///
    /// Bypassed plugins leave the bus untouched. If the processor is held
    /// by the control thread, this block is skipped.
    pub fn process(&self, bus: &AudioBus, frames: Frames) {
        if self.is_bypassed() {
            return;
        }
        let mut processor = match self.processor.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::trace!("Plugin '{}': processor busy, skipping block", self.name);
                return;
            }
        };
        processor.process(bus, frames);
    }

    pub fn get_state(&self) -> PluginState {
        let mut state = self.lock_processor().get_state();
        state.id = Some(self.id.0);
        state.prefader = self.is_prefader();
        state.bypassed = self.is_bypassed();
        state
    }

    pub fn set_state(&self, state: &PluginState) -> EngineResult<()> {
        if state.kind != self.type_name {
            return Err(EngineError::InvalidState(format!(
                "plugin '{}' is a {}, state is for {}",
                self.name, self.type_name, state.kind
            )));
        }
        self.lock_processor().set_state(state)?;
        self.set_bypass(state.bypassed);
        Ok(())
    }

    /// Clear DSP memory (control thread)
    pub fn reset(&self) {
        self.lock_processor().reset();
    }

    fn lock_processor(&self) -> MutexGuard<'_, Box<dyn Plugin>> {
        self.processor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSlot")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("prefader", &self.is_prefader())
            .field("bypassed", &self.is_bypassed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::BusConfig;

    fn stereo_bus(value: f32) -> AudioBus {
        let bus = AudioBus::new(BusConfig::software("test", 2), 4);
        for ch in 0..2 {
            bus.get_buffer(ch, 4).unwrap().fill(value);
        }
        bus
    }

    #[test]
    fn test_port_info() {
        let info = PortInfo::new("Time", 250.0).with_range(1.0, 2000.0).with_unit("ms");
        assert_eq!(info.name, "Time");
        assert_eq!(info.max, 2000.0);
        assert_eq!(info.unit, "ms");
    }

    #[test]
    fn test_control_port_clamps() {
        let ports = control_ports(&[PortInfo::new("Mix", 0.3)]);
        ports[0].set_value(4.0);
        assert_eq!(ports[0].value(), 1.0);
        assert_eq!(ports[0].index(), 0);
    }

    #[test]
    fn test_slot_bypass_leaves_bus() {
        let slot = PluginSlot::new(Box::new(GainEnvelope::new()), true);
        slot.set_control(0, 0.5);
        let bus = stereo_bus(1.0);

        slot.set_bypass(true);
        slot.process(&bus, 4);
        assert_eq!(bus.get_buffer(0, 4).unwrap()[0], 1.0);

        slot.set_bypass(false);
        slot.process(&bus, 4);
        assert_eq!(bus.get_buffer(0, 4).unwrap()[0], 0.5);
    }

    #[test]
    fn test_slot_state_carries_flags() {
        let slot = PluginSlot::new(Box::new(GainEnvelope::new()), false);
        slot.set_bypass(true);
        slot.set_control(0, 0.25);

        let state = slot.get_state();
        assert_eq!(state.kind, "GainEnvelope");
        assert_eq!(state.id, Some(slot.id().0));
        assert!(state.bypassed);
        assert_eq!(state.ports[0].value, 0.25);
    }

    #[test]
    fn test_slot_rejects_foreign_state() {
        let slot = PluginSlot::new(Box::new(GainEnvelope::new()), false);
        let result = slot.set_state(&PluginState::new("HostedPlugin"));
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_plugin_state_yaml_defaults() {
        let state: PluginState = serde_yaml::from_str("type: HostedPlugin\nuri: urn:x\n").unwrap();
        assert!(!state.prefader);
        assert!(state.ports.is_empty());
        assert_eq!(state.uri.as_deref(), Some("urn:x"));
    }
}
