//! AudioBus - an ordered set of channels with an identity

use serde::{Deserialize, Serialize};

use super::channel::{AudioChannel, ChannelBufferGuard};
use crate::types::{BusId, Frames, Sample};

/// Whether a bus is backed by device ports or only lives in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusKind {
    Hardware,
    Software,
}

/// Signal direction as seen from the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusDirection {
    /// Audio enters the graph (capture)
    Input,
    /// Audio leaves the graph (playback)
    Output,
}

/// Construction parameters for an [`AudioBus`]
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub name: String,
    pub channel_count: usize,
    pub kind: BusKind,
    pub direction: BusDirection,
    /// Explicit channel names; generated as `"<bus>_<n>"` when empty
    pub channel_names: Vec<String>,
}

impl BusConfig {
    /// Software output bus, the common case for internal routing
    pub fn software(name: impl Into<String>, channel_count: usize) -> Self {
        Self {
            name: name.into(),
            channel_count,
            kind: BusKind::Software,
            direction: BusDirection::Output,
            channel_names: Vec::new(),
        }
    }

    /// Hardware bus in the given direction
    pub fn hardware(name: impl Into<String>, channel_count: usize, direction: BusDirection) -> Self {
        Self {
            name: name.into(),
            channel_count,
            kind: BusKind::Hardware,
            direction,
            channel_names: Vec::new(),
        }
    }

    pub fn with_direction(mut self, direction: BusDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_channel_names(mut self, names: Vec<String>) -> Self {
        self.channel_count = names.len();
        self.channel_names = names;
        self
    }
}

/// A named group of channels addressed positionally (left = 0, right = 1)
///
/// The channel count is fixed for the lifetime of the bus. Buses are shared
/// between the project, tracks and sends via `basedrop::Shared`, so all
/// mutation goes through the channels' interior mutability.
#[derive(Debug)]
pub struct AudioBus {
    id: BusId,
    name: String,
    kind: BusKind,
    direction: BusDirection,
    channels: Vec<AudioChannel>,
}

impl AudioBus {
    pub fn new(config: BusConfig, buffer_size: Frames) -> Self {
        Self::with_id(BusId::new(), config, buffer_size)
    }

    pub fn with_id(id: BusId, config: BusConfig, buffer_size: Frames) -> Self {
        let channels = (0..config.channel_count)
            .map(|n| {
                let name = config
                    .channel_names
                    .get(n)
                    .cloned()
                    .unwrap_or_else(|| format!("{}_{}", config.name, n));
                AudioChannel::new(name, n, buffer_size)
            })
            .collect();

        log::debug!(
            "AudioBus '{}' ({}): {} channels, {:?} {:?}",
            config.name,
            id,
            config.channel_count,
            config.kind,
            config.direction
        );

        Self {
            id,
            name: config.name,
            kind: config.kind,
            direction: config.direction,
            channels,
        }
    }

    pub fn id(&self) -> BusId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    pub fn direction(&self) -> BusDirection {
        self.direction
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel at position `index`, `None` when out of range
    pub fn get_channel(&self, index: usize) -> Option<&AudioChannel> {
        self.channels.get(index)
    }

    pub fn channels(&self) -> &[AudioChannel] {
        &self.channels
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Real-time buffer access for one channel; see [`AudioChannel::get_buffer`]
    pub fn get_buffer(&self, channel: usize, frames: Frames) -> Option<ChannelBufferGuard<'_>> {
        self.channels.get(channel)?.get_buffer(frames)
    }

    pub fn silence_buffers(&self, frames: Frames) {
        for channel in &self.channels {
            channel.silence_buffer(frames);
        }
    }

    /// Resize every channel (control thread, audio stopped)
    pub fn set_buffer_size(&self, size: Frames) {
        for channel in &self.channels {
            channel.set_buffer_size(size);
        }
    }

    pub fn set_monitor_peaks(&self, monitor: bool) {
        for channel in &self.channels {
            channel.set_monitor_peaks(monitor);
        }
    }

    /// Record a block peak on every channel
    pub fn monitor_peaks(&self) {
        for channel in &self.channels {
            channel.monitor_peaks();
        }
    }

    /// Per-channel peak since the last call
    pub fn get_peak_values(&self) -> Vec<Sample> {
        self.channels.iter().map(AudioChannel::get_peak_value).collect()
    }
}
