//! Routing - channels, buses and sends
//!
//! Audio flows from a track's private process bus through its sends into
//! shared buses owned by the [`Project`]. Buses are `basedrop::Shared`, so a
//! bus removed on the control thread stays valid for the audio thread until
//! the last snapshot referencing it is dropped.

pub mod bus;
pub mod channel;
pub mod project;
pub mod send;

pub use bus::{AudioBus, BusConfig, BusDirection, BusKind};
pub use channel::{AudioChannel, ChannelBufferGuard};
pub use project::{BusProvider, Project};
pub use send::{pan_factor, AudioSend, SendKind, SendState};
