//! Audio engine - graph, tracks, transport and the control-side session
//!
//! - [`AudioGraph`]: real-time root rendering every track once per block
//! - [`Track`] / [`TrackNode`]: control-side track and its audio-side view
//! - [`AudioProcessor`]: owned by the device callback, drains transport commands
//! - [`Session`]: control-thread owner of tracks, buses and solo state
//! - [`GraphEdit`]: undoable structural edits

pub mod clip;
pub mod command;
pub mod gc;
pub mod graph;
pub mod history;
pub mod session;
pub mod track;

pub use clip::AudioClip;
pub use command::{command_channel, AudioProcessor, CommandSender, EngineCommand, COMMAND_QUEUE_CAPACITY};
pub use graph::{AudioGraph, Transport};
pub use history::GraphEdit;
pub use session::{BusState, Session, SessionEvent, SessionState};
pub use track::{Track, TrackNode, TrackState};
