//! Audio backend configuration
//!
//! Device selection and buffer settings for the output stream.

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_BLOCK_SIZE, SAMPLE_RATE};

/// Largest block size the engine accepts (frames)
pub const MAX_BUFFER_SIZE: u32 = 8192;

/// Smallest block size the engine accepts (frames)
pub const MIN_BUFFER_SIZE: u32 = 16;

/// Preferred buffer size for audio streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Use the engine default block size
    #[default]
    Default,
    /// Request a specific buffer size in frames (clamped to supported bounds)
    Fixed(u32),
}

impl BufferSize {
    /// Buffer size in frames
    pub fn as_frames(&self) -> u32 {
        match self {
            BufferSize::Default => DEFAULT_BLOCK_SIZE as u32,
            BufferSize::Fixed(frames) => (*frames).clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE),
        }
    }

    /// Latency in milliseconds for a given sample rate
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        (self.as_frames() as f32 / sample_rate.max(1) as f32) * 1000.0
    }
}

/// Configuration for the audio backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default)
    pub output_device: Option<String>,

    /// Audio host name, e.g. "Alsa" or "CoreAudio" (None = default host)
    pub host: Option<String>,

    /// Preferred buffer size
    pub buffer_size: BufferSize,

    /// Preferred sample rate (None = engine default)
    pub sample_rate: Option<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            host: None,
            buffer_size: BufferSize::default(),
            sample_rate: None,
        }
    }
}

impl AudioConfig {
    /// Set the output device
    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }

    /// Set the buffer size
    pub fn with_buffer_size(mut self, size: BufferSize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Requested sample rate or the engine default
    pub fn target_sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(SAMPLE_RATE)
    }
}
