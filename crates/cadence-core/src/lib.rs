//! Cadence Core - real-time multi-track audio graph
//!
//! Tracks render clips and live input through a plugin chain split around
//! a fader, then route into shared buses through pre- and post-fader sends.
//! The control thread edits the graph through [`engine::Session`]; the audio
//! thread only ever sees published snapshots.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod plugin;
pub mod routing;
pub mod source;
pub mod types;

pub use types::*;
