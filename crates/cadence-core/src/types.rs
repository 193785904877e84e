//! Common types for Cadence
//!
//! Sample and frame types, entity identifiers, and the small atomic helpers
//! shared between the control thread and the audio thread.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Default sample rate used when no device is attached
pub const SAMPLE_RATE: u32 = 48000;

/// Default block size (frames per audio callback)
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Default number of peak values retained per channel for metering
pub const PEAK_HISTORY_LEN: usize = 64;

/// Default channel count for new tracks
pub const DEFAULT_CHANNEL_COUNT: usize = 2;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// Frame count / frame position type
pub type Frames = usize;

static NEXT_ID: AtomicI64 = AtomicI64::new(1);

/// Create a new process-unique identifier
///
/// Ids restored from persisted state are fed back through [`observe_id`]
/// so freshly created ids never collide with loaded ones.
pub fn create_id() -> i64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Make sure future ids are larger than `id`
pub fn observe_id(id: i64) {
    NEXT_ID.fetch_max(id + 1, Ordering::Relaxed);
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Allocate a fresh id
            pub fn new() -> Self {
                Self(create_id())
            }

            /// Wrap a persisted id, reserving it against future allocation
            pub fn restore(raw: i64) -> Self {
                observe_id(raw);
                Self(raw)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Audio bus identifier
    BusId
);
entity_id!(
    /// Track identifier
    TrackId
);
entity_id!(
    /// Plugin instance identifier
    PluginId
);
entity_id!(
    /// Send identifier
    SendId
);
entity_id!(
    /// Clip identifier
    ClipId
);

/// An `f32` that can be shared between threads
///
/// Stored as raw bits in an `AtomicU32`. All operations use
/// `Ordering::Relaxed`: parameters only need eventual visibility, the audio
/// thread reads them once per block.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}
