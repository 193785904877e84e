//! Project - owner of the shared buses tracks and sends route through

use basedrop::Shared;

use super::bus::{AudioBus, BusConfig, BusDirection, BusKind};
use crate::engine::gc::gc_handle;
use crate::types::{BusId, Frames};

/// Resolves bus references for tracks and sends
pub trait BusProvider {
    /// Any bus known to the project, by id
    fn audio_bus(&self, id: BusId) -> Option<Shared<AudioBus>>;

    /// The master output bus
    fn master_out_bus(&self) -> Shared<AudioBus>;

    /// A capture (input) bus by name
    fn capture_bus(&self, name: &str) -> Option<Shared<AudioBus>>;
}

/// The bus registry of a session
///
/// Owns the master output bus, user buses (groups, effect returns) and the
/// device capture buses. Everything is handed out as `Shared` handles so the
/// audio thread can keep a bus alive after it was removed here.
pub struct Project {
    master: Shared<AudioBus>,
    buses: Vec<Shared<AudioBus>>,
    capture: Vec<Shared<AudioBus>>,
    buffer_size: Frames,
}

impl Project {
    pub fn new(master_name: &str, channel_count: usize, buffer_size: Frames) -> Self {
        let master = Shared::new(
            &gc_handle(),
            AudioBus::new(
                BusConfig::hardware(master_name, channel_count, BusDirection::Output),
                buffer_size,
            ),
        );
        log::info!(
            "Project created: master '{}' ({} channels, {} frames)",
            master_name,
            channel_count,
            buffer_size
        );
        Self {
            master,
            buses: Vec::new(),
            capture: Vec::new(),
            buffer_size,
        }
    }

    pub fn buffer_size(&self) -> Frames {
        self.buffer_size
    }

    /// Create a bus and register it with the project
    pub fn add_bus(&mut self, config: BusConfig) -> Shared<AudioBus> {
        let bus = Shared::new(&gc_handle(), AudioBus::new(config, self.buffer_size));
        self.insert_bus(bus.clone());
        bus
    }

    /// Register an externally created bus
    pub fn insert_bus(&mut self, bus: Shared<AudioBus>) {
        if bus.direction() == BusDirection::Input && bus.kind() == BusKind::Hardware {
            self.capture.push(bus);
        } else {
            self.buses.push(bus);
        }
    }

    /// Create a hardware capture bus
    pub fn add_capture_bus(&mut self, name: &str, channel_count: usize) -> Shared<AudioBus> {
        self.add_bus(BusConfig::hardware(name, channel_count, BusDirection::Input))
    }

    /// Forget a bus; handles still held elsewhere stay valid
    pub fn remove_bus(&mut self, id: BusId) -> Option<Shared<AudioBus>> {
        if let Some(pos) = self.buses.iter().position(|b| b.id() == id) {
            return Some(self.buses.remove(pos));
        }
        let pos = self.capture.iter().position(|b| b.id() == id)?;
        Some(self.capture.remove(pos))
    }

    /// Master plus every output bus; these are silenced once per block
    pub fn output_buses(&self) -> Vec<Shared<AudioBus>> {
        std::iter::once(self.master.clone())
            .chain(
                self.buses
                    .iter()
                    .filter(|b| b.direction() == BusDirection::Output)
                    .cloned(),
            )
            .collect()
    }

    pub fn capture_buses(&self) -> &[Shared<AudioBus>] {
        &self.capture
    }

    /// Resize every bus (audio stopped)
    pub fn set_buffer_size(&mut self, size: Frames) {
        self.buffer_size = size;
        self.master.set_buffer_size(size);
        for bus in self.buses.iter().chain(&self.capture) {
            bus.set_buffer_size(size);
        }
    }
}

impl BusProvider for Project {
    fn audio_bus(&self, id: BusId) -> Option<Shared<AudioBus>> {
        if self.master.id() == id {
            return Some(self.master.clone());
        }
        self.buses
            .iter()
            .chain(&self.capture)
            .find(|b| b.id() == id)
            .cloned()
    }

    fn master_out_bus(&self) -> Shared<AudioBus> {
        self.master.clone()
    }

    fn capture_bus(&self, name: &str) -> Option<Shared<AudioBus>> {
        self.capture.iter().find(|b| b.name() == name).cloned()
    }
}
