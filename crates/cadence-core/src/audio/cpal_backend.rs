//! cpal output stream driving the graph
//!
//! ```text
//! control thread ──CommandSender──► rtrb ──► AudioProcessor (in cpal callback)
//!        │                                          │
//!        └── SharedCell snapshots ─────────────────►│ AudioGraph::process
//! ```
//!
//! The callback owns the [`AudioProcessor`] exclusively; nothing is shared
//! with it through a lock.

use basedrop::Shared;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::config::{AudioConfig, BufferSize};
use super::device::{AudioDevice, DriverType};
use crate::engine::{AudioGraph, AudioProcessor};
use crate::error::{EngineError, EngineResult};
use crate::routing::AudioChannel;
use crate::types::Frames;

fn device_error(context: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Device(format!("{}: {}", context, e))
}

/// Find a host by its cpal name, case-insensitive
fn host_by_name(name: &str) -> Option<cpal::Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(name))
        .and_then(|id| cpal::host_from_id(id).ok())
}

fn select_device(config: &AudioConfig) -> EngineResult<cpal::Device> {
    let host = match &config.host {
        Some(name) => host_by_name(name).unwrap_or_else(|| {
            log::warn!("Audio host '{}' not available, using default host", name);
            cpal::default_host()
        }),
        None => cpal::default_host(),
    };

    match &config.output_device {
        Some(name) => host
            .output_devices()
            .map_err(|e| device_error("Failed to enumerate output devices", e))?
            .find(|d| d.name().ok().as_deref() == Some(name.as_str()))
            .ok_or_else(|| EngineError::Device(format!("Output device '{}' not found", name))),
        None => host
            .default_output_device()
            .ok_or_else(|| EngineError::Device("No default output device".to_string())),
    }
}

/// Pick an f32 output configuration at the requested rate if possible
fn output_config(device: &cpal::Device, config: &AudioConfig) -> EngineResult<StreamConfig> {
    let target = config.target_sample_rate();
    let candidates: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| device_error("Failed to query output configs", e))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let in_range = |c: &cpal::SupportedStreamConfigRange| {
        target >= c.min_sample_rate().0 && target <= c.max_sample_rate().0
    };
    let best = candidates
        .iter()
        .find(|c| c.channels() >= 2 && in_range(*c))
        .or_else(|| candidates.iter().find(|c| in_range(*c)))
        .or_else(|| candidates.first())
        .ok_or_else(|| EngineError::Device("No f32 output configuration".to_string()))?;

    let supported = if in_range(best) {
        best.clone().with_sample_rate(cpal::SampleRate(target))
    } else {
        log::warn!(
            "Audio device doesn't support {}Hz, using {}Hz",
            target,
            best.max_sample_rate().0
        );
        best.clone().with_max_sample_rate()
    };

    let mut stream_config = supported.config();
    stream_config.buffer_size = match config.buffer_size {
        BufferSize::Default => CpalBufferSize::Default,
        fixed @ BufferSize::Fixed(_) => CpalBufferSize::Fixed(fixed.as_frames()),
    };
    Ok(stream_config)
}

/// A running cpal output stream
///
/// The stream stops when this is dropped.
pub struct CpalBackend {
    stream: Stream,
    graph: Shared<AudioGraph>,
    sample_rate: u32,
    channels: usize,
    block_size: Frames,
}

impl CpalBackend {
    /// Open the configured device and start rendering `processor` into it
    pub fn start(config: &AudioConfig, mut processor: AudioProcessor) -> EngineResult<Self> {
        let device = select_device(config)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let stream_config = output_config(&device, config)?;
        let channels = stream_config.channels as usize;
        let sample_rate = stream_config.sample_rate.0;
        let block_size = match stream_config.buffer_size {
            CpalBufferSize::Fixed(frames) => frames as Frames,
            CpalBufferSize::Default => processor.graph().block_size(),
        };

        log::info!(
            "Audio output '{}': {} channels, {}Hz, {} frames (~{:.1}ms)",
            device_name,
            channels,
            sample_rate,
            block_size,
            config.buffer_size.latency_ms(sample_rate)
        );

        let graph = processor.graph_handle();
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    processor.process_interleaved(data, channels);
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| device_error("Failed to build output stream", e))?;

        graph.set_running(true);
        if let Err(e) = stream.play() {
            graph.set_running(false);
            return Err(device_error("Failed to start output stream", e));
        }

        Ok(Self {
            stream,
            graph,
            sample_rate,
            channels,
            block_size,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl AudioDevice for CpalBackend {
    fn block_size(&self) -> Frames {
        self.block_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn driver_type(&self) -> DriverType {
        DriverType::Cpal
    }

    fn register_channel(&self, _channel: &AudioChannel) -> EngineResult<()> {
        Err(EngineError::DriverUnsupported(DriverType::Cpal))
    }

    fn unregister_channel(&self, _name: &str) {}
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::warn!("Failed to pause output stream: {}", e);
        }
        self.graph.set_running(false);
        log::info!("Audio output stopped");
    }
}
