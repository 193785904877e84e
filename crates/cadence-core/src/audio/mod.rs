//! Audio devices
//!
//! The engine only needs a small view of the device driving it
//! ([`AudioDevice`]). Two implementations ship here:
//! - [`CpalBackend`]: a cpal output stream (ALSA, WASAPI, CoreAudio, ...)
//! - [`NullDevice`]: no hardware, blocks are pulled by hand (tests, offline)

mod config;
mod cpal_backend;
mod device;

pub use config::{AudioConfig, BufferSize, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use cpal_backend::CpalBackend;
pub use device::{AudioDevice, DriverType, NullDevice};
