//! AudioChannel - a single mono buffer with peak metering

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use crate::mixer::Mixer;
use crate::types::{Frames, Sample, PEAK_HISTORY_LEN};

/// Sample storage plus the audio-side end of the peak ring
struct ChannelBuffer {
    samples: Vec<Sample>,
    peaks: rtrb::Producer<Sample>,
}

/// Real-time view onto `frames` samples of a channel buffer
///
/// Holding the guard gives exclusive access; it is released on drop.
pub struct ChannelBufferGuard<'a> {
    guard: MutexGuard<'a, ChannelBuffer>,
    len: usize,
}

impl Deref for ChannelBufferGuard<'_> {
    type Target = [Sample];

    fn deref(&self) -> &[Sample] {
        &self.guard.samples[..self.len]
    }
}

impl DerefMut for ChannelBufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut [Sample] {
        &mut self.guard.samples[..self.len]
    }
}

/// A mono audio buffer owned by a bus
///
/// The sample buffer is touched by the audio thread every block and only
/// resized by the control thread while audio is stopped. The audio thread
/// never blocks on it: [`AudioChannel::get_buffer`] uses `try_lock` and
/// returns `None` on contention so the caller can skip the channel.
///
/// Peaks are written into a lock-free `rtrb` ring by the audio thread and
/// drained by [`AudioChannel::get_peak_value`] on the control thread.
pub struct AudioChannel {
    name: String,
    number: usize,
    buffer: Mutex<ChannelBuffer>,
    peak_reader: Mutex<rtrb::Consumer<Sample>>,
    latency: AtomicU32,
    monitoring: AtomicBool,
    has_data: AtomicBool,
}

impl AudioChannel {
    /// Create a channel with `buffer_size` frames of capacity
    pub fn new(name: impl Into<String>, number: usize, buffer_size: Frames) -> Self {
        let (producer, consumer) = rtrb::RingBuffer::new(PEAK_HISTORY_LEN);
        Self {
            name: name.into(),
            number,
            buffer: Mutex::new(ChannelBuffer {
                samples: vec![0.0; buffer_size],
                peaks: producer,
            }),
            peak_reader: Mutex::new(consumer),
            latency: AtomicU32::new(0),
            monitoring: AtomicBool::new(false),
            has_data: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of this channel inside its bus
    pub fn number(&self) -> usize {
        self.number
    }

    /// Current capacity in frames
    pub fn buffer_size(&self) -> Frames {
        self.lock_control().samples.len()
    }

    /// Exclusive real-time access to `frames` samples (clamped to capacity)
    ///
    /// Never blocks. Returns `None` if the buffer is momentarily held
    /// elsewhere; audio-path callers treat that as "skip this channel".
    pub fn get_buffer(&self, frames: Frames) -> Option<ChannelBufferGuard<'_>> {
        let guard = match self.buffer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::trace!("AudioChannel '{}': buffer contention, skipping", self.name);
                return None;
            }
        };
        self.has_data.store(true, Ordering::Relaxed);
        let len = frames.min(guard.samples.len());
        Some(ChannelBufferGuard { guard, len })
    }

    /// Zero the first `frames` samples
    pub fn silence_buffer(&self, frames: Frames) {
        if let Some(mut buf) = self.get_buffer(frames) {
            buf.fill(0.0);
        }
    }

    /// Resize the buffer (control thread only, allocates)
    ///
    /// Precondition: the audio thread is not running on this channel.
    pub fn set_buffer_size(&self, size: Frames) {
        let mut buffer = self.lock_control();
        buffer.samples = vec![0.0; size];
        log::debug!("AudioChannel '{}': buffer size set to {}", self.name, size);
    }

    pub fn set_latency(&self, latency: u32) {
        self.latency.store(latency, Ordering::Relaxed);
    }

    pub fn latency(&self) -> u32 {
        self.latency.load(Ordering::Relaxed)
    }

    /// Enable continuous peak metering even when nothing writes the channel
    pub fn set_monitor_peaks(&self, monitor: bool) {
        self.monitoring.store(monitor, Ordering::Relaxed);
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Relaxed)
    }

    /// True if the channel was written this cycle or is being monitored
    pub fn has_data(&self) -> bool {
        self.has_data.load(Ordering::Relaxed) || self.is_monitoring()
    }

    /// Compute this block's peak and push it into the peak ring
    ///
    /// Real-time safe. The value is dropped if the ring is full (nobody is
    /// reading meters).
    pub fn monitor_peaks(&self) {
        let mut buffer = match self.buffer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        let ChannelBuffer { samples, peaks } = &mut *buffer;
        let peak = Mixer::compute_peak(samples, samples.len(), 0.0);
        let _ = peaks.push(peak);
    }

    /// Hand the block to a consumer (driver or meter)
    ///
    /// Clears the has-data flag and records the block peak.
    pub fn take_data(&self) {
        self.has_data.store(false, Ordering::Relaxed);
        self.monitor_peaks();
    }

    /// Highest peak recorded since the previous call (control thread)
    pub fn get_peak_value(&self) -> Sample {
        let mut reader = self
            .peak_reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut peak: Sample = 0.0;
        while let Ok(value) = reader.pop() {
            peak = peak.max(value);
        }
        peak
    }

    fn lock_control(&self) -> MutexGuard<'_, ChannelBuffer> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for AudioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChannel")
            .field("name", &self.name)
            .field("number", &self.number)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_buffer_clamps_to_capacity() {
        let channel = AudioChannel::new("test", 0, 64);
        let buf = channel.get_buffer(128).unwrap();
        assert_eq!(buf.len(), 64);
    }

    #[test]
    fn test_buffer_contention_returns_none() {
        let channel = AudioChannel::new("test", 0, 16);
        let _held = channel.get_buffer(16).unwrap();
        assert!(channel.get_buffer(16).is_none());
    }

    #[test]
    fn test_silence_and_write() {
        let channel = AudioChannel::new("test", 0, 8);
        channel.get_buffer(8).unwrap().fill(0.5);
        channel.silence_buffer(4);
        let buf = channel.get_buffer(8).unwrap();
        assert_eq!(&buf[..4], &[0.0; 4]);
        assert_eq!(&buf[4..], &[0.5; 4]);
    }

    #[test]
    fn test_resize() {
        let channel = AudioChannel::new("test", 0, 8);
        channel.set_buffer_size(1024);
        assert_eq!(channel.buffer_size(), 1024);
        assert_eq!(channel.get_buffer(1024).unwrap().len(), 1024);
    }

    #[test]
    fn test_peak_metering() {
        let channel = AudioChannel::new("test", 0, 4);
        channel.get_buffer(4).unwrap().copy_from_slice(&[0.1, -0.8, 0.2, 0.0]);
        channel.take_data();
        channel.get_buffer(4).unwrap().copy_from_slice(&[0.3, 0.0, 0.0, 0.0]);
        channel.monitor_peaks();

        assert_eq!(channel.get_peak_value(), 0.8);
        // Ring drained, nothing new recorded
        assert_eq!(channel.get_peak_value(), 0.0);
    }

    #[test]
    fn test_has_data_flag() {
        let channel = AudioChannel::new("test", 0, 4);
        assert!(!channel.has_data());
        drop(channel.get_buffer(4));
        assert!(channel.has_data());
        channel.take_data();
        assert!(!channel.has_data());
        channel.set_monitor_peaks(true);
        assert!(channel.has_data());
    }
}
