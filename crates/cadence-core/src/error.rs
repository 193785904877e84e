//! Engine error types

use thiserror::Error;

use crate::audio::DriverType;
use crate::types::{BusId, PluginId, SendId, TrackId};

/// Errors returned by control-thread operations on the audio graph
///
/// Nothing on the audio path returns these; the real-time side degrades to
/// silence or skips work instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A bus id did not resolve through the bus provider
    #[error("Audio bus {0} could not be found")]
    UnknownBus(BusId),

    /// A capture bus name did not resolve
    #[error("Capture bus '{0}' could not be found")]
    UnknownCaptureBus(String),

    /// Track id not present in the session
    #[error("Track {0} not found")]
    UnknownTrack(TrackId),

    /// Plugin id not present in the chain
    #[error("Plugin {0} not found in plugin chain")]
    UnknownPlugin(PluginId),

    /// Send id not present on the track
    #[error("Send {0} not found")]
    UnknownSend(SendId),

    /// The track already sends to this bus in the same direction
    #[error("Track '{track}' already has bus {bus} as {kind}")]
    DuplicateSend {
        track: String,
        bus: BusId,
        kind: &'static str,
    },

    /// The fader is part of every chain
    #[error("Gain Envelope (Fader) is not removable")]
    FaderNotRemovable,

    /// The plugin factory has no constructor for this type or URI
    #[error("No plugin available for '{0}'")]
    PluginUnavailable(String),

    /// A plugin instance rejected its configuration
    #[error("Plugin '{name}' failed to initialize: {reason}")]
    PluginInit { name: String, reason: String },

    /// Hardware port registration requested on a driver without ports
    #[error("Driver {0:?} does not support port registration")]
    DriverUnsupported(DriverType),

    /// Port connection requested for a track without channels
    #[error("Channel count is 0")]
    NoChannels,

    /// Buffer resize requested while the audio callback may be running
    #[error("Audio device is running; stop it before resizing buffers")]
    AudioRunning,

    /// Audio device or stream failure
    #[error("Audio device error: {0}")]
    Device(String),

    /// Persisted state could not be applied
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
