//! AudioGraph - the real-time entry point
//!
//! One `process` call renders one block:
//! 1. every registered output bus is silenced (sends only accumulate)
//! 2. every track node renders into its process bus and routes via sends
//! 3. the transport advances if rolling
//!
//! The track list and output bus list are `SharedCell` snapshots published
//! by the control thread; the audio thread reads each once per block.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use basedrop::{Shared, SharedCell};

use super::gc::gc_handle;
use super::track::TrackNode;
use crate::routing::AudioBus;
use crate::types::Frames;

/// Transport state shared between the control and audio threads
///
/// Only the audio thread writes it (commands are applied at block
/// boundaries); the control thread reads it for display.
pub struct Transport {
    rolling: AtomicBool,
    position: AtomicU64,
}

impl Transport {
    fn new() -> Self {
        Self {
            rolling: AtomicBool::new(false),
            position: AtomicU64::new(0),
        }
    }

    pub fn is_rolling(&self) -> bool {
        self.rolling.load(Ordering::Acquire)
    }

    /// Timeline position in frames
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn set_rolling(&self, rolling: bool) {
        self.rolling.store(rolling, Ordering::Release);
    }

    pub(crate) fn locate(&self, frame: u64) {
        self.position.store(frame, Ordering::Release);
    }

    fn advance(&self, frames: Frames) {
        self.position.fetch_add(frames as u64, Ordering::AcqRel);
    }
}

/// Root of the real-time graph
pub struct AudioGraph {
    master: Shared<AudioBus>,
    tracks: SharedCell<Vec<Shared<TrackNode>>>,
    outputs: SharedCell<Vec<Shared<AudioBus>>>,
    transport: Transport,
    running: AtomicBool,
    block_size: AtomicUsize,
}

impl AudioGraph {
    pub fn new(master: Shared<AudioBus>, block_size: Frames) -> Self {
        let handle = gc_handle();
        Self {
            outputs: SharedCell::new(Shared::new(&handle, vec![master.clone()])),
            tracks: SharedCell::new(Shared::new(&handle, Vec::new())),
            master,
            transport: Transport::new(),
            running: AtomicBool::new(false),
            block_size: AtomicUsize::new(block_size),
        }
    }

    pub fn master(&self) -> &Shared<AudioBus> {
        &self.master
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// True while a device callback may call [`AudioGraph::process`]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set by the device when its stream starts and stops
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
        log::debug!("AudioGraph: running = {}", running);
    }

    /// Largest block the buffers can hold
    pub fn block_size(&self) -> Frames {
        self.block_size.load(Ordering::Acquire)
    }

    pub(crate) fn set_block_size(&self, frames: Frames) {
        self.block_size.store(frames, Ordering::Release);
    }

    /// Replace the track list (control thread)
    pub fn publish_tracks(&self, tracks: Vec<Shared<TrackNode>>) {
        self.tracks.set(Shared::new(&gc_handle(), tracks));
    }

    /// Replace the list of buses silenced every block (control thread)
    pub fn publish_outputs(&self, outputs: Vec<Shared<AudioBus>>) {
        self.outputs.set(Shared::new(&gc_handle(), outputs));
    }

    pub fn track_count(&self) -> usize {
        self.tracks.get().len()
    }

    /// Render one block (audio thread)
    pub fn process(&self, frames: Frames) {
        let frames = frames.min(self.block_size());

        let outputs = self.outputs.get();
        for bus in outputs.iter() {
            bus.silence_buffers(frames);
        }

        let rolling = self.transport.is_rolling();
        let position = rolling.then(|| self.transport.position());

        let tracks = self.tracks.get();
        for track in tracks.iter() {
            track.process(frames, position);
        }

        // Master peaks are taken by the driver when it reads the block
        for bus in outputs.iter().filter(|b| b.id() != self.master.id()) {
            bus.monitor_peaks();
        }

        if rolling {
            self.transport.advance(frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::BusConfig;

    fn master() -> Shared<AudioBus> {
        Shared::new(&gc_handle(), AudioBus::new(BusConfig::software("Master", 2), 64))
    }

    #[test]
    fn test_outputs_silenced_each_block() {
        let graph = AudioGraph::new(master(), 64);
        graph.master().get_buffer(0, 64).unwrap().fill(1.0);
        graph.process(64);
        assert!(graph.master().get_buffer(0, 64).unwrap().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_transport_advances_only_when_rolling() {
        let graph = AudioGraph::new(master(), 64);
        graph.process(64);
        assert_eq!(graph.transport().position(), 0);

        graph.transport().set_rolling(true);
        graph.process(64);
        graph.process(32);
        assert_eq!(graph.transport().position(), 96);

        graph.transport().locate(1000);
        graph.process(64);
        assert_eq!(graph.transport().position(), 1064);
    }

    #[test]
    fn test_frames_clamped_to_block_size() {
        let graph = AudioGraph::new(master(), 64);
        graph.transport().set_rolling(true);
        graph.process(4096);
        assert_eq!(graph.transport().position(), 64);
    }

    #[test]
    fn test_running_flag() {
        let graph = AudioGraph::new(master(), 64);
        assert!(!graph.is_running());
        graph.set_running(true);
        assert!(graph.is_running());
    }
}
