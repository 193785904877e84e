//! Sends - gain/pan taps from a track into a destination bus

use basedrop::Shared;
use serde::{Deserialize, Serialize};

use super::bus::AudioBus;
use crate::mixer::Mixer;
use crate::types::{AtomicF32, BusId, Frames, SendId};

/// Tap point of a send relative to the track's plugin chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendKind {
    /// Taps the signal before any chain processing
    PreSend,
    /// Taps the signal after the full chain (fader included)
    PostSend,
}

impl SendKind {
    pub fn label(self) -> &'static str {
        match self {
            SendKind::PreSend => "pre-send",
            SendKind::PostSend => "post-send",
        }
    }
}

/// Per-channel pan multiplier for a send
///
/// Channel 0 is scaled by `1 - pan`, channel 1 by `1 + pan`, any other
/// channel is left at unity. The two stereo factors always sum to 2.
#[inline]
pub fn pan_factor(channel: usize, pan: f32) -> f32 {
    match channel {
        0 => 1.0 - pan,
        1 => 1.0 + pan,
        _ => 1.0,
    }
}

/// A routing connection from a track's process bus into another bus
///
/// The destination bus is shared, not owned. Gain and pan are atomics so
/// they can be changed while the transport is rolling.
pub struct AudioSend {
    id: SendId,
    kind: SendKind,
    bus: Shared<AudioBus>,
    gain: AtomicF32,
    pan: AtomicF32,
}

impl AudioSend {
    pub fn new(bus: Shared<AudioBus>, kind: SendKind) -> Self {
        Self::with_id(SendId::new(), bus, kind)
    }

    pub fn with_id(id: SendId, bus: Shared<AudioBus>, kind: SendKind) -> Self {
        Self {
            id,
            kind,
            bus,
            gain: AtomicF32::new(1.0),
            pan: AtomicF32::new(0.0),
        }
    }

    pub fn id(&self) -> SendId {
        self.id
    }

    pub fn kind(&self) -> SendKind {
        self.kind
    }

    /// A send is named after its destination bus
    pub fn name(&self) -> &str {
        self.bus.name()
    }

    pub fn bus(&self) -> &Shared<AudioBus> {
        &self.bus
    }

    pub fn bus_id(&self) -> BusId {
        self.bus.id()
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0));
    }

    pub fn pan(&self) -> f32 {
        self.pan.load()
    }

    /// Pan in [-1, 1]
    pub fn set_pan(&self, pan: f32) {
        self.pan.store(pan.clamp(-1.0, 1.0));
    }

    /// Mix `sender` into the destination bus (real-time)
    ///
    /// Only channels present on both buses are mixed. The destination is
    /// accumulated into, never cleared. Channels whose buffers are
    /// momentarily unavailable are skipped for this block.
    pub fn process(&self, sender: &AudioBus, frames: Frames) {
        let gain = self.gain.load();
        let pan = self.pan.load();
        let count = sender.channel_count().min(self.bus.channel_count());

        for i in 0..count {
            let Some(src) = sender.get_buffer(i, frames) else {
                continue;
            };
            let Some(mut dst) = self.bus.get_buffer(i, frames) else {
                continue;
            };

            let factor = pan_factor(i, pan) * gain;
            if factor == 1.0 {
                Mixer::mix_buffers_no_gain(&mut dst, &src, frames);
            } else {
                Mixer::mix_buffers_with_gain(&mut dst, &src, frames, factor);
            }
        }
    }

    pub fn get_state(&self) -> SendState {
        SendState {
            id: self.id.0,
            bus: self.bus_id().0,
            gain: self.gain(),
            pan: self.pan(),
            kind: self.kind,
        }
    }

    /// Rebuild a send from persisted state against an already-resolved bus
    pub fn from_state(state: &SendState, bus: Shared<AudioBus>) -> Self {
        let send = Self::with_id(SendId::restore(state.id), bus, state.kind);
        send.set_gain(state.gain);
        send.set_pan(state.pan);
        send
    }
}

impl std::fmt::Debug for AudioSend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSend")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("bus", &self.name())
            .field("gain", &self.gain())
            .field("pan", &self.pan())
            .finish()
    }
}

fn default_gain() -> f32 {
    1.0
}

/// Persisted form of a send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendState {
    pub id: i64,
    pub bus: i64,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default)]
    pub pan: f32,
    #[serde(rename = "type")]
    pub kind: SendKind,
}
