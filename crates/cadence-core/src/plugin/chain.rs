//! Plugin chain - ordered plugins around a mandatory fader
//!
//! The chain keeps two views of the same ordering:
//!
//! - **Authoritative list** ([`PluginChain`]): owned by the control thread,
//!   mutated by add/remove/reorder and used for state and UI queries.
//! - **Real-time list** ([`PluginList`] behind a [`ChainNode`]): an immutable
//!   snapshot published with one atomic swap after every mutation. The audio
//!   thread takes one snapshot per block and never sees a partial list.
//!
//! Retired snapshots, and the plugins only they still reference, are freed
//! on the GC thread (see [`crate::engine::gc`]).
//!
//! Ordering invariant (both views): prefader plugins come before the fader,
//! postfader plugins after it. A new prefader plugin is inserted directly
//! before the fader, a new postfader plugin is appended.

use std::sync::Arc;

use basedrop::{Shared, SharedCell};
use serde::{Deserialize, Serialize};

use super::gain_envelope::GAIN_PORT;
use super::{GainEnvelope, Plugin, PluginFactory, PluginSlot, PluginState};
use crate::engine::gc::gc_handle;
use crate::error::{EngineError, EngineResult};
use crate::routing::AudioBus;
use crate::types::{AtomicF32, Frames, PluginId};

/// Immutable real-time view of a chain
///
/// Carries the prefader tags as they were at publish time, so a snapshot
/// still in use never disagrees with itself while the control thread
/// retags the shared slots.
pub struct PluginList {
    slots: Vec<Shared<PluginSlot>>,
    prefader: Vec<bool>,
}

impl PluginList {
    fn new(slots: Vec<Shared<PluginSlot>>) -> Self {
        let fader_pos = slots.iter().position(|s| s.is_fader()).unwrap_or(0);
        let prefader = (0..slots.len()).map(|pos| pos < fader_pos).collect();
        Self { slots, prefader }
    }

    pub fn slots(&self) -> &[Shared<PluginSlot>] {
        &self.slots
    }

    /// Prefader tag of the slot at `index` in this snapshot
    pub fn is_prefader(&self, index: usize) -> bool {
        self.prefader.get(index).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Process every plugin before the fader, in order
    pub fn process_pre_fader(&self, bus: &AudioBus, frames: Frames) {
        for slot in &self.slots {
            if slot.is_fader() {
                return;
            }
            slot.process(bus, frames);
        }
    }

    /// Process the fader only
    pub fn process_fader(&self, bus: &AudioBus, frames: Frames) {
        if let Some(fader) = self.slots.iter().find(|s| s.is_fader()) {
            fader.process(bus, frames);
        }
    }

    /// Process every plugin after the fader, in order
    ///
    /// Returns false only for an empty list.
    pub fn process_post_fader(&self, bus: &AudioBus, frames: Frames) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let mut fader_passed = false;
        for slot in &self.slots {
            if fader_passed {
                slot.process(bus, frames);
            } else if slot.is_fader() {
                fader_passed = true;
            }
        }
        true
    }
}

/// Audio-side handle to a chain's published list
pub struct ChainNode {
    list: SharedCell<PluginList>,
}

impl ChainNode {
    fn new(slots: Vec<Shared<PluginSlot>>) -> Self {
        Self {
            list: SharedCell::new(Shared::new(&gc_handle(), PluginList::new(slots))),
        }
    }

    /// Current list; a refcount increment, no allocation, no lock
    #[inline]
    pub fn snapshot(&self) -> Shared<PluginList> {
        self.list.get()
    }

    fn publish(&self, slots: Vec<Shared<PluginSlot>>) {
        self.list.set(Shared::new(&gc_handle(), PluginList::new(slots)));
    }
}

/// Persisted chain: user plugins in order, then the fader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginChainState {
    #[serde(default)]
    pub plugins: Vec<PluginState>,
}

/// Control-side owner of a track's plugins
pub struct PluginChain {
    plugins: Vec<Shared<PluginSlot>>,
    fader: Shared<PluginSlot>,
    pan: Arc<AtomicF32>,
    node: Shared<ChainNode>,
}

impl PluginChain {
    /// A chain containing only the fader
    pub fn new() -> Self {
        let envelope = GainEnvelope::new();
        let pan = envelope.pan_handle();
        let fader = Shared::new(&gc_handle(), PluginSlot::new(Box::new(envelope), false));
        let plugins = vec![fader.clone()];
        let node = Shared::new(&gc_handle(), ChainNode::new(plugins.clone()));
        Self {
            plugins,
            fader,
            pan,
            node,
        }
    }

    /// Audio-side handle for the track node
    pub fn node(&self) -> Shared<ChainNode> {
        self.node.clone()
    }

    pub fn snapshot(&self) -> Shared<PluginList> {
        self.node.snapshot()
    }

    /// Wrap and insert a plugin; see [`PluginChain::add_slot`]
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>, prefader: bool) -> EngineResult<PluginId> {
        let slot = Shared::new(&gc_handle(), PluginSlot::new(plugin, prefader));
        self.add_slot(slot)
    }

    /// Insert an existing slot according to its prefader tag and publish
    pub fn add_slot(&mut self, slot: Shared<PluginSlot>) -> EngineResult<PluginId> {
        if slot.is_fader() {
            log::warn!("PluginChain: refusing to add a second fader");
            return Err(EngineError::InvalidState(
                "a plugin chain has exactly one fader".to_string(),
            ));
        }
        let id = slot.id();
        log::debug!(
            "PluginChain: adding '{}' ({}) {}",
            slot.name(),
            id,
            if slot.is_prefader() { "prefader" } else { "postfader" }
        );
        self.insert(slot);
        self.publish();
        Ok(id)
    }

    /// Remove a plugin and publish; returns the slot for undo
    pub fn remove_plugin(&mut self, id: PluginId) -> EngineResult<Shared<PluginSlot>> {
        if id == self.fader.id() {
            log::warn!("Gain Envelope (Fader) is not removable");
            return Err(EngineError::FaderNotRemovable);
        }
        let Some(pos) = self.position(id) else {
            log::warn!("PluginChain: plugin {} not found, nothing removed", id);
            return Err(EngineError::UnknownPlugin(id));
        };
        let slot = self.plugins.remove(pos);
        self.publish();
        log::debug!("PluginChain: removed '{}' ({})", slot.name(), id);
        Ok(slot)
    }

    /// Swap a plugin with its neighbour (`up` = towards the start)
    ///
    /// No-op at the list boundaries. After the swap, the non-fader plugins
    /// involved are retagged from their position relative to the fader, so
    /// moving across the fader flips prefader/postfader. Returns whether the
    /// plugin moved.
    pub fn change_plugin_order(&mut self, id: PluginId, up: bool) -> EngineResult<bool> {
        let Some(first) = self.position(id) else {
            log::warn!("PluginChain: plugin {} not found, order unchanged", id);
            return Err(EngineError::UnknownPlugin(id));
        };
        let second = if up {
            match first.checked_sub(1) {
                Some(second) => second,
                None => return Ok(false),
            }
        } else {
            if first + 1 >= self.plugins.len() {
                return Ok(false);
            }
            first + 1
        };

        self.plugins.swap(first, second);
        self.publish();

        let fader_pos = self.fader_position();
        for pos in [first, second] {
            let slot = &self.plugins[pos];
            if !slot.is_fader() {
                slot.set_prefader(pos < fader_pos);
            }
        }
        Ok(true)
    }

    /// Authoritative order, fader included
    pub fn get_plugins(&self) -> &[Shared<PluginSlot>] {
        &self.plugins
    }

    pub fn get_pre_fader_plugins(&self) -> Vec<Shared<PluginSlot>> {
        self.plugins
            .iter()
            .take_while(|s| !s.is_fader())
            .cloned()
            .collect()
    }

    pub fn get_post_fader_plugins(&self) -> Vec<Shared<PluginSlot>> {
        self.plugins
            .iter()
            .skip_while(|s| !s.is_fader())
            .skip(1)
            .cloned()
            .collect()
    }

    pub fn get_fader(&self) -> &Shared<PluginSlot> {
        &self.fader
    }

    pub fn find_plugin(&self, id: PluginId) -> Option<&Shared<PluginSlot>> {
        self.plugins.iter().find(|s| s.id() == id)
    }

    pub fn set_gain(&self, gain: f32) {
        self.fader.set_control(GAIN_PORT, gain);
    }

    pub fn gain(&self) -> f32 {
        self.fader
            .controls()
            .get(GAIN_PORT)
            .map(|p| p.value())
            .unwrap_or(1.0)
    }

    /// Balance applied by the fader after its gain
    pub fn pan_handle(&self) -> &Arc<AtomicF32> {
        &self.pan
    }

    /// Sum of plugin latencies in samples
    pub fn total_latency(&self) -> u32 {
        self.plugins.iter().map(|s| s.latency_samples()).sum()
    }

    pub fn get_state(&self) -> PluginChainState {
        let mut plugins: Vec<PluginState> = self
            .plugins
            .iter()
            .filter(|s| !s.is_fader())
            .map(|s| s.get_state())
            .collect();
        plugins.push(self.fader.get_state());
        PluginChainState { plugins }
    }

    /// Restore plugins from state, appending to the current chain
    ///
    /// Fader state is applied to the existing fader. Plugins the factory
    /// cannot build are skipped with a warning; loading continues.
    pub fn set_state(&mut self, state: &PluginChainState, factory: &dyn PluginFactory) {
        for plugin_state in &state.plugins {
            if plugin_state.kind == GainEnvelope::TYPE_NAME {
                if let Err(e) = self.fader.set_state(plugin_state) {
                    log::warn!("PluginChain: fader state not applied: {}", e);
                }
                continue;
            }

            let plugin = match factory.create_plugin(plugin_state) {
                Ok(plugin) => plugin,
                Err(e) => {
                    log::warn!(
                        "PluginChain: skipping plugin of type '{}': {}",
                        plugin_state.kind,
                        e
                    );
                    continue;
                }
            };

            let id = plugin_state
                .id
                .map(PluginId::restore)
                .unwrap_or_else(PluginId::new);
            let slot = PluginSlot::with_id(id, plugin, plugin_state.prefader);
            slot.set_bypass(plugin_state.bypassed);
            self.insert(Shared::new(&gc_handle(), slot));
        }
        self.publish();
    }

    fn insert(&mut self, slot: Shared<PluginSlot>) {
        if slot.is_prefader() {
            let fader_pos = self.fader_position();
            self.plugins.insert(fader_pos, slot);
        } else {
            self.plugins.push(slot);
        }
    }

    fn position(&self, id: PluginId) -> Option<usize> {
        self.plugins.iter().position(|s| s.id() == id)
    }

    fn fader_position(&self) -> usize {
        self.plugins
            .iter()
            .position(|s| s.is_fader())
            .unwrap_or(0)
    }

    fn publish(&self) {
        self.node.publish(self.plugins.clone());
    }
}

impl Default for PluginChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::native::{GAIN_URI, LOWPASS_URI};
    use crate::plugin::{control_ports, ControlPorts, PluginRegistry};
    use crate::routing::BusConfig;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    /// Appends its label to a shared log when processed
    struct Tracer {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        ports: ControlPorts,
    }

    impl Tracer {
        fn boxed(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Box<dyn Plugin> {
            Box::new(Tracer {
                label,
                log: log.clone(),
                ports: control_ports(&[]),
            })
        }
    }

    impl Plugin for Tracer {
        fn name(&self) -> &str {
            self.label
        }

        fn type_name(&self) -> &'static str {
            "Tracer"
        }

        fn process(&mut self, _bus: &AudioBus, _frames: Frames) {
            self.log.lock().unwrap().push(self.label);
        }

        fn control_ports(&self) -> ControlPorts {
            self.ports.clone()
        }

        fn get_state(&self) -> PluginState {
            PluginState::new("Tracer")
        }

        fn set_state(&mut self, _state: &PluginState) -> EngineResult<()> {
            Ok(())
        }
    }

    fn names(slots: &[Shared<PluginSlot>]) -> Vec<String> {
        slots.iter().map(|s| s.name().to_string()).collect()
    }

    fn bus() -> AudioBus {
        AudioBus::new(BusConfig::software("chain", 2), 16)
    }

    #[test]
    fn test_new_chain_has_only_fader() {
        let chain = PluginChain::new();
        assert_eq!(chain.get_plugins().len(), 1);
        assert!(chain.get_plugins()[0].is_fader());
        assert_eq!(chain.snapshot().len(), 1);
    }

    #[test]
    fn test_insertion_policy() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::new();
        chain.add_plugin(Tracer::boxed("post1", &log), false).unwrap();
        chain.add_plugin(Tracer::boxed("pre1", &log), true).unwrap();
        chain.add_plugin(Tracer::boxed("pre2", &log), true).unwrap();
        chain.add_plugin(Tracer::boxed("post2", &log), false).unwrap();

        let expected = vec!["pre1", "pre2", "Gain Envelope", "post1", "post2"];
        assert_eq!(names(chain.get_plugins()), expected);
        assert_eq!(names(chain.snapshot().slots()), expected);
        assert_eq!(names(&chain.get_pre_fader_plugins()), vec!["pre1", "pre2"]);
        assert_eq!(names(&chain.get_post_fader_plugins()), vec!["post1", "post2"]);
    }

    #[test]
    fn test_pre_post_processing_and_reorder_retag() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::new();
        chain.add_plugin(Tracer::boxed("A", &log), true).unwrap();
        let b = chain.add_plugin(Tracer::boxed("B", &log), false).unwrap();
        let bus = bus();

        chain.snapshot().process_pre_fader(&bus, 16);
        assert_eq!(*log.lock().unwrap(), vec!["A"]);
        log.lock().unwrap().clear();

        assert!(chain.snapshot().process_post_fader(&bus, 16));
        assert_eq!(*log.lock().unwrap(), vec!["B"]);
        log.lock().unwrap().clear();

        // Move B up past the fader
        assert!(chain.change_plugin_order(b, true).unwrap());
        assert!(chain.find_plugin(b).unwrap().is_prefader());
        assert_eq!(names(chain.get_plugins()), vec!["A", "B", "Gain Envelope"]);

        chain.snapshot().process_pre_fader(&bus, 16);
        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
        log.lock().unwrap().clear();
        chain.snapshot().process_post_fader(&bus, 16);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_moving_fader_retags_neighbour() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::new();
        let a = chain.add_plugin(Tracer::boxed("A", &log), true).unwrap();
        let fader = chain.get_fader().id();

        chain.change_plugin_order(fader, true).unwrap();
        assert_eq!(names(chain.get_plugins()), vec!["Gain Envelope", "A"]);
        assert!(!chain.find_plugin(a).unwrap().is_prefader());
    }

    #[test]
    fn test_snapshot_tags_fixed_at_publish() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::new();
        let a = chain.add_plugin(Tracer::boxed("A", &log), true).unwrap();

        let before = chain.snapshot();
        assert!(chain.change_plugin_order(a, false).unwrap());
        let after = chain.snapshot();

        // Old snapshot: [A, Fader]; new snapshot: [Fader, A]
        assert!(before.is_prefader(0));
        assert!(!before.is_prefader(1));
        assert!(!after.is_prefader(0));
        assert!(!after.is_prefader(1));
        assert!(!chain.find_plugin(a).unwrap().is_prefader());
    }

    #[test]
    fn test_reorder_at_boundaries_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::new();
        let a = chain.add_plugin(Tracer::boxed("A", &log), true).unwrap();
        let b = chain.add_plugin(Tracer::boxed("B", &log), false).unwrap();

        assert!(!chain.change_plugin_order(a, true).unwrap());
        assert!(!chain.change_plugin_order(b, false).unwrap());
        assert_eq!(names(chain.get_plugins()), vec!["A", "Gain Envelope", "B"]);
        assert!(chain.find_plugin(a).unwrap().is_prefader());
        assert!(!chain.find_plugin(b).unwrap().is_prefader());
    }

    #[test]
    fn test_fader_not_removable() {
        let mut chain = PluginChain::new();
        let fader = chain.get_fader().id();
        assert_eq!(chain.remove_plugin(fader).err(), Some(EngineError::FaderNotRemovable));
        assert_eq!(chain.get_plugins().len(), 1);
    }

    #[test]
    fn test_remove_unknown_plugin() {
        let mut chain = PluginChain::new();
        let missing = PluginId::new();
        assert_eq!(
            chain.remove_plugin(missing).err(),
            Some(EngineError::UnknownPlugin(missing))
        );
    }

    #[test]
    fn test_second_fader_rejected() {
        let mut chain = PluginChain::new();
        let result = chain.add_plugin(Box::new(GainEnvelope::new()), false);
        assert!(result.is_err());
        assert_eq!(chain.get_plugins().len(), 1);
    }

    #[test]
    fn test_snapshot_outlives_removal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::new();
        let a = chain.add_plugin(Tracer::boxed("A", &log), true).unwrap();
        let held = chain.snapshot();

        chain.remove_plugin(a).unwrap();
        assert_eq!(chain.snapshot().len(), 1);

        held.process_pre_fader(&bus(), 16);
        assert_eq!(*log.lock().unwrap(), vec!["A"]);
    }

    #[test]
    fn test_total_latency() {
        let chain = PluginChain::new();
        assert_eq!(chain.total_latency(), 0);
    }

    #[test]
    fn test_state_round_trip_keeps_order_and_tags() {
        let registry = PluginRegistry::default();
        let mut chain = PluginChain::new();
        chain.add_plugin(Box::new(registry.create_hosted(GAIN_URI).unwrap()), true).unwrap();
        chain.add_plugin(Box::new(registry.create_hosted(LOWPASS_URI).unwrap()), false).unwrap();
        chain.set_gain(0.5);

        let state = chain.get_state();
        assert_eq!(state.plugins.len(), 3);
        assert_eq!(state.plugins.last().unwrap().kind, "GainEnvelope");

        let yaml = serde_yaml::to_string(&state).unwrap();
        let parsed: PluginChainState = serde_yaml::from_str(&yaml).unwrap();

        let mut restored = PluginChain::new();
        restored.set_state(&parsed, &registry);
        assert_eq!(names(restored.get_plugins()), names(chain.get_plugins()));
        assert_eq!(restored.gain(), 0.5);
        assert_eq!(restored.get_pre_fader_plugins().len(), 1);
        assert_eq!(restored.get_post_fader_plugins().len(), 1);
        assert_eq!(
            restored.get_plugins()[0].id(),
            chain.get_plugins()[0].id()
        );
    }

    #[test]
    fn test_set_state_skips_unknown_types() {
        let registry = PluginRegistry::default();
        let state = PluginChainState {
            plugins: vec![PluginState::new("LADSPA"), PluginState::new("GainEnvelope")],
        };
        let mut chain = PluginChain::new();
        chain.set_state(&state, &registry);
        assert_eq!(chain.get_plugins().len(), 1);
    }

    #[test]
    fn test_concurrent_add_while_processing() {
        let chain = Arc::new(Mutex::new(PluginChain::new()));
        let node = chain.lock().unwrap().node();
        let stop = Arc::new(AtomicBool::new(false));
        let blocks = Arc::new(AtomicUsize::new(0));
        let registry = PluginRegistry::default();

        let audio = {
            let stop = stop.clone();
            let blocks = blocks.clone();
            thread::spawn(move || {
                let bus = AudioBus::new(BusConfig::software("rt", 2), 64);
                while !stop.load(Ordering::Relaxed) {
                    let list = node.snapshot();
                    let faders = list.slots().iter().filter(|s| s.is_fader()).count();
                    assert_eq!(faders, 1, "partial list observed");
                    let fader_pos = list.slots().iter().position(|s| s.is_fader()).unwrap();
                    for pos in 0..list.len() {
                        assert_eq!(list.is_prefader(pos), pos < fader_pos, "tag contradicts position");
                    }
                    list.process_pre_fader(&bus, 64);
                    list.process_fader(&bus, 64);
                    list.process_post_fader(&bus, 64);
                    blocks.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let mut added = Vec::new();
        for i in 0..200 {
            let mut chain = chain.lock().unwrap();
            let plugin = Box::new(registry.create_hosted(GAIN_URI).unwrap());
            let id = chain.add_plugin(plugin, i % 2 == 0).unwrap();
            added.push(id);
            if i % 3 == 0 {
                let victim = added.remove(0);
                chain.remove_plugin(victim).unwrap();
            }
            // Walk plugins across the fader in both directions
            if let Some(&moving) = added.last() {
                chain.change_plugin_order(moving, i % 4 < 2).unwrap();
            }
            let fader = chain.get_fader().id();
            chain.change_plugin_order(fader, i % 5 == 0).unwrap();
        }
        while blocks.load(Ordering::Relaxed) < 10 {
            thread::yield_now();
        }
        stop.store(true, Ordering::Relaxed);
        audio.join().unwrap();

        let chain = chain.lock().unwrap();
        assert_eq!(chain.get_plugins().len(), added.len() + 1);
        assert_eq!(chain.snapshot().len(), added.len() + 1);
        let fader_pos = chain.get_plugins().iter().position(|s| s.is_fader()).unwrap();
        for (pos, slot) in chain.get_plugins().iter().enumerate() {
            if !slot.is_fader() {
                assert_eq!(slot.is_prefader(), pos < fader_pos);
            }
        }
    }
}
