//! In-memory audio clips placed on a track timeline

use std::sync::atomic::{AtomicBool, Ordering};

use crate::mixer::Mixer;
use crate::routing::AudioBus;
use crate::source::AudioSourceInfo;
use crate::types::{AtomicF32, ClipId, Frames, Sample};

/// Decoded audio placed at a timeline position
///
/// Sample data is immutable once the clip is created; gain and mute are
/// atomics so they can change while the clip is being played. Clips are
/// shared with the audio thread through the track's clip snapshot.
pub struct AudioClip {
    id: ClipId,
    name: String,
    start: u64,
    sample_rate: u32,
    channels: Vec<Vec<Sample>>,
    gain: AtomicF32,
    muted: AtomicBool,
}

impl AudioClip {
    /// `channels` holds one sample vector per channel; shorter ones are padded
    pub fn new(name: impl Into<String>, start: u64, sample_rate: u32, mut channels: Vec<Vec<Sample>>) -> Self {
        let len = channels.iter().map(Vec::len).max().unwrap_or(0);
        for channel in &mut channels {
            channel.resize(len, 0.0);
        }
        Self {
            id: ClipId::new(),
            name: name.into(),
            start,
            sample_rate,
            channels,
            gain: AtomicF32::new(1.0),
            muted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timeline position of the first frame
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn len(&self) -> u64 {
        self.channels.first().map_or(0, |c| c.len() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> u64 {
        self.start + self.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0));
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Mix the part of the clip under `[position, position + frames)` into `bus`
    ///
    /// A mono clip feeds every bus channel.
    pub fn process(&self, bus: &AudioBus, position: u64, frames: Frames) {
        if self.is_muted() || self.channels.is_empty() {
            return;
        }
        let block_end = position + frames as u64;
        if block_end <= self.start || position >= self.end() {
            return;
        }

        let clip_offset = position.saturating_sub(self.start) as usize;
        let bus_offset = self.start.saturating_sub(position) as usize;
        let n = (frames - bus_offset).min(self.len() as usize - clip_offset);
        let gain = self.gain();

        for ch in 0..bus.channel_count() {
            let source = &self.channels[ch.min(self.channels.len() - 1)];
            let Some(mut buf) = bus.get_buffer(ch, frames) else {
                continue;
            };
            let src = &source[clip_offset..clip_offset + n];
            let Some(dst) = buf.get_mut(bus_offset..bus_offset + n) else {
                continue;
            };
            if gain == 1.0 {
                Mixer::mix_buffers_no_gain(dst, src, n);
            } else {
                Mixer::mix_buffers_with_gain(dst, src, n, gain);
            }
        }
    }

    /// Source metadata for persistence
    pub fn source_info(&self) -> AudioSourceInfo {
        AudioSourceInfo {
            id: self.id.0,
            name: self.name.clone(),
            channel_count: self.channel_count(),
            length: self.len(),
            rate: self.sample_rate,
            ..AudioSourceInfo::default()
        }
    }
}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start", &self.start)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::BusConfig;

    fn ramp(len: usize) -> Vec<Sample> {
        (1..=len).map(|i| i as Sample).collect()
    }

    #[test]
    fn test_block_inside_clip() {
        let clip = AudioClip::new("ramp", 0, 48000, vec![ramp(16), ramp(16)]);
        let bus = AudioBus::new(BusConfig::software("t", 2), 4);
        clip.process(&bus, 4, 4);
        assert_eq!(&*bus.get_buffer(0, 4).unwrap(), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_clip_starts_mid_block() {
        let clip = AudioClip::new("ramp", 10, 48000, vec![ramp(4)]);
        let bus = AudioBus::new(BusConfig::software("t", 2), 4);
        clip.process(&bus, 8, 4);
        assert_eq!(&*bus.get_buffer(0, 4).unwrap(), &[0.0, 0.0, 1.0, 2.0]);
        // Mono clip feeds both channels
        assert_eq!(&*bus.get_buffer(1, 4).unwrap(), &[0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_clip_ends_mid_block() {
        let clip = AudioClip::new("ramp", 0, 48000, vec![ramp(6)]);
        let bus = AudioBus::new(BusConfig::software("t", 1), 4);
        clip.process(&bus, 4, 4);
        assert_eq!(&*bus.get_buffer(0, 4).unwrap(), &[5.0, 6.0, 0.0, 0.0]);
    }

    #[test]
    fn test_outside_and_muted() {
        let clip = AudioClip::new("ramp", 100, 48000, vec![ramp(4)]);
        let bus = AudioBus::new(BusConfig::software("t", 1), 4);
        clip.process(&bus, 0, 4);
        clip.set_muted(true);
        clip.process(&bus, 100, 4);
        assert!(bus.get_buffer(0, 4).unwrap().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_gain_and_source_info() {
        let clip = AudioClip::new("take", 0, 44100, vec![vec![1.0; 4], vec![1.0; 2]]);
        clip.set_gain(0.5);
        let bus = AudioBus::new(BusConfig::software("t", 2), 4);
        clip.process(&bus, 0, 4);
        assert_eq!(&*bus.get_buffer(1, 4).unwrap(), &[0.5, 0.5, 0.0, 0.0]);

        let info = clip.source_info();
        assert_eq!(info.channel_count, 2);
        assert_eq!(info.length, 4);
        assert_eq!(info.rate, 44100);
    }
}
