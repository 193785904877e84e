//! Undoable graph edits
//!
//! Every structural change is expressed as a [`GraphEdit`]. Applying an edit
//! returns its inverse, so an undo stack is a `Vec<GraphEdit>` and redo is
//! applying what undo returned. Removed plugins, sends and tracks are kept
//! alive inside the inverse edit, which lets undo restore the very same
//! instances (ids, state, buffers).

use basedrop::Shared;

use super::session::Session;
use super::track::Track;
use crate::error::EngineResult;
use crate::plugin::PluginSlot;
use crate::routing::AudioSend;
use crate::types::{PluginId, SendId, TrackId};

pub enum GraphEdit {
    AddPlugin { track: TrackId, slot: Shared<PluginSlot> },
    RemovePlugin { track: TrackId, plugin: PluginId },
    MovePlugin { track: TrackId, plugin: PluginId, up: bool },
    AddSend { track: TrackId, send: Shared<AudioSend> },
    RemoveSend { track: TrackId, send: SendId },
    AddTrack(Box<Track>),
    RemoveTrack(TrackId),
    SetMute { track: TrackId, muted: bool },
    SetPan { track: TrackId, pan: f32 },
    SetGain { track: TrackId, gain: f32 },
}

impl GraphEdit {
    /// Short label for undo menus and logs
    pub fn label(&self) -> &'static str {
        match self {
            GraphEdit::AddPlugin { .. } => "Add Plugin",
            GraphEdit::RemovePlugin { .. } => "Remove Plugin",
            GraphEdit::MovePlugin { .. } => "Move Plugin",
            GraphEdit::AddSend { .. } => "Add Send",
            GraphEdit::RemoveSend { .. } => "Remove Send",
            GraphEdit::AddTrack(_) => "Add Track",
            GraphEdit::RemoveTrack(_) => "Remove Track",
            GraphEdit::SetMute { .. } => "Mute",
            GraphEdit::SetPan { .. } => "Pan",
            GraphEdit::SetGain { .. } => "Gain",
        }
    }

    /// Apply to `session` and return the edit that reverts it
    ///
    /// A failed edit leaves the session unchanged.
    pub fn apply(self, session: &mut Session) -> EngineResult<GraphEdit> {
        let inverse = match self {
            GraphEdit::AddPlugin { track, slot } => {
                let plugin = session.insert_plugin_slot(track, slot)?;
                GraphEdit::RemovePlugin { track, plugin }
            }
            GraphEdit::RemovePlugin { track, plugin } => {
                let slot = session.remove_plugin(track, plugin)?;
                GraphEdit::AddPlugin { track, slot }
            }
            GraphEdit::MovePlugin { track, plugin, up } => {
                if session.move_plugin(track, plugin, up)? {
                    GraphEdit::MovePlugin { track, plugin, up: !up }
                } else {
                    // Already at the boundary; undoing must not move it either
                    GraphEdit::MovePlugin { track, plugin, up }
                }
            }
            GraphEdit::AddSend { track, send } => {
                let send = session.insert_send(track, send)?;
                GraphEdit::RemoveSend { track, send }
            }
            GraphEdit::RemoveSend { track, send } => {
                let send = session.remove_send(track, send)?;
                GraphEdit::AddSend { track, send }
            }
            GraphEdit::AddTrack(track) => GraphEdit::RemoveTrack(session.insert_track(*track)),
            GraphEdit::RemoveTrack(id) => GraphEdit::AddTrack(Box::new(session.remove_track(id)?)),
            GraphEdit::SetMute { track, muted } => {
                let muted = session.set_muted(track, muted)?;
                GraphEdit::SetMute { track, muted }
            }
            GraphEdit::SetPan { track, pan } => {
                let pan = session.set_pan(track, pan)?;
                GraphEdit::SetPan { track, pan }
            }
            GraphEdit::SetGain { track, gain } => {
                let gain = session.set_gain(track, gain)?;
                GraphEdit::SetGain { track, gain }
            }
        };
        Ok(inverse)
    }
}

impl Session {
    /// Apply an edit; returns its inverse
    pub fn execute(&mut self, edit: GraphEdit) -> EngineResult<GraphEdit> {
        log::debug!("Session: {}", edit.label());
        edit.apply(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::EngineError;
    use crate::plugin::native::{DELAY_URI, LOWPASS_URI};

    fn session() -> (Session, TrackId) {
        let mut session = Session::new(&EngineConfig {
            block_size: 64,
            ..EngineConfig::default()
        });
        let track = session.add_track("A").unwrap();
        (session, track)
    }

    fn plugin_ids(session: &Session, track: TrackId) -> Vec<PluginId> {
        let track = session.track(track).unwrap();
        track.plugin_chain().get_plugins().iter().map(|s| s.id()).collect()
    }

    #[test]
    fn test_remove_plugin_undo_restores_instance() {
        let (mut session, track) = session();
        let plugin = session.add_plugin_by_uri(track, LOWPASS_URI, false).unwrap();
        let before = plugin_ids(&session, track);

        let undo = session.execute(GraphEdit::RemovePlugin { track, plugin }).unwrap();
        assert_eq!(plugin_ids(&session, track).len(), 1);

        let redo = session.execute(undo).unwrap();
        assert_eq!(plugin_ids(&session, track), before);
        assert_eq!(redo.label(), "Remove Plugin");
    }

    #[test]
    fn test_move_at_boundary_inverse_is_noop() {
        let (mut session, track) = session();
        let a = session.add_plugin_by_uri(track, LOWPASS_URI, true).unwrap();
        let b = session.add_plugin_by_uri(track, DELAY_URI, true).unwrap();
        let before = plugin_ids(&session, track);

        // First plugin cannot move further up
        let undo = session.execute(GraphEdit::MovePlugin { track, plugin: a, up: true }).unwrap();
        session.execute(undo).unwrap();
        assert_eq!(plugin_ids(&session, track), before);

        let undo = session.execute(GraphEdit::MovePlugin { track, plugin: b, up: true }).unwrap();
        assert_eq!(plugin_ids(&session, track)[0], b);
        session.execute(undo).unwrap();
        assert_eq!(plugin_ids(&session, track), before);
    }

    #[test]
    fn test_remove_send_undo() {
        let (mut session, track) = session();
        let fx = session.add_bus("FX", 2);
        let send = session.add_pre_send(track, fx.id()).unwrap();
        session.track(track).unwrap().get_send(send).unwrap().set_gain(0.3);

        let undo = session.execute(GraphEdit::RemoveSend { track, send }).unwrap();
        assert!(session.track(track).unwrap().get_send(send).is_none());

        session.execute(undo).unwrap();
        let restored = session.track(track).unwrap().get_send(send).unwrap();
        assert_eq!(restored.gain(), 0.3);
        assert_eq!(session.track(track).unwrap().get_pre_sends().len(), 1);
    }

    #[test]
    fn test_remove_track_undo_keeps_id_and_routing() {
        let (mut session, track) = session();
        session.add_plugin_by_uri(track, LOWPASS_URI, false).unwrap();

        let undo = session.execute(GraphEdit::RemoveTrack(track)).unwrap();
        assert_eq!(session.track_count(), 0);
        assert_eq!(session.graph().track_count(), 0);

        let redo = session.execute(undo).unwrap();
        let restored = session.track(track).unwrap();
        assert_eq!(restored.plugin_chain().get_plugins().len(), 2);
        assert_eq!(restored.get_post_sends().len(), 1);
        assert_eq!(session.graph().track_count(), 1);
        assert!(matches!(redo, GraphEdit::RemoveTrack(id) if id == track));
    }

    #[test]
    fn test_parameter_edits_return_previous_values() {
        let (mut session, track) = session();
        let undo = session.execute(GraphEdit::SetPan { track, pan: 0.5 }).unwrap();
        assert!(matches!(undo, GraphEdit::SetPan { pan, .. } if pan == 0.0));
        session.execute(undo).unwrap();
        assert_eq!(session.track(track).unwrap().pan(), 0.0);

        let undo = session.execute(GraphEdit::SetMute { track, muted: true }).unwrap();
        assert!(!session.track(track).unwrap().is_audible());
        session.execute(undo).unwrap();
        assert!(session.track(track).unwrap().is_audible());

        let undo = session.execute(GraphEdit::SetGain { track, gain: 0.25 }).unwrap();
        assert!(matches!(undo, GraphEdit::SetGain { gain, .. } if gain == 1.0));
    }

    #[test]
    fn test_failed_edit_reports_error() {
        let (mut session, track) = session();
        let fader = session.track(track).unwrap().plugin_chain().get_fader().id();
        assert_eq!(
            session
                .execute(GraphEdit::RemovePlugin { track, plugin: fader })
                .err(),
            Some(EngineError::FaderNotRemovable)
        );
    }
}
