//! Session - the control-side owner of tracks, buses and the graph
//!
//! Every mutating method runs on the control thread (`&mut self`) and
//! republishes whatever the audio thread reads. State changes the UI cares
//! about are reported as [`SessionEvent`]s on a crossbeam channel.

use basedrop::Shared;
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use super::command::{command_channel, AudioProcessor, CommandSender};
use super::gc::gc_handle;
use super::graph::AudioGraph;
use super::track::{Track, TrackState};
use crate::audio::AudioDevice;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::plugin::{Plugin, PluginRegistry, PluginSlot};
use crate::audio::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::routing::{AudioBus, AudioSend, BusConfig, BusKind, BusProvider, Project};
use crate::types::{BusId, Frames, PluginId, SendId, TrackId};

/// Notifications drained by the control thread / UI
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TrackAdded(TrackId),
    TrackRemoved(TrackId),
    /// Mute, solo or solo-mute changed the track's audibility
    AudibleStateChanged { track: TrackId, audible: bool },
    SoloChanged { track: TrackId, solo: bool },
    MuteChanged { track: TrackId, muted: bool },
    PluginAdded { track: TrackId, plugin: PluginId },
    PluginRemoved { track: TrackId, plugin: PluginId },
    SendAdded { track: TrackId, send: SendId },
    SendRemoved { track: TrackId, send: SendId },
    BlockSizeChanged(Frames),
}

/// A user bus that is saved with the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    pub id: i64,
    pub name: String,
    #[serde(rename = "channelcount")]
    pub channel_count: usize,
}

/// Persisted session: user buses and tracks in sort order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Id the master bus had when saved; sends to it are remapped on load
    #[serde(default)]
    pub master: i64,
    #[serde(default)]
    pub buses: Vec<BusState>,
    #[serde(default)]
    pub tracks: Vec<TrackState>,
}

/// Resolves a saved master id to the current master bus
struct LoadProvider<'a> {
    project: &'a Project,
    saved_master: BusId,
}

impl BusProvider for LoadProvider<'_> {
    fn audio_bus(&self, id: BusId) -> Option<Shared<AudioBus>> {
        if id == self.saved_master {
            return Some(self.project.master_out_bus());
        }
        self.project.audio_bus(id)
    }

    fn master_out_bus(&self) -> Shared<AudioBus> {
        self.project.master_out_bus()
    }

    fn capture_bus(&self, name: &str) -> Option<Shared<AudioBus>> {
        self.project.capture_bus(name)
    }
}

pub struct Session {
    project: Project,
    tracks: Vec<Track>,
    graph: Shared<AudioGraph>,
    registry: PluginRegistry,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    default_channels: usize,
    command_capacity: usize,
}

impl Session {
    pub fn new(config: &EngineConfig) -> Self {
        let block_size = config.effective_block_size();
        let mut project = Project::new(&config.master_bus, config.master_channels, block_size);
        for capture in &config.capture_buses {
            project.add_capture_bus(&capture.name, capture.channels);
        }

        let graph = Shared::new(
            &gc_handle(),
            AudioGraph::new(project.master_out_bus(), block_size),
        );
        let (events_tx, events_rx) = crossbeam::channel::unbounded();

        log::info!(
            "Session created: {} frames per block, {}Hz",
            block_size,
            config.sample_rate
        );

        Self {
            project,
            tracks: Vec::new(),
            graph,
            registry: PluginRegistry::new(config.sample_rate),
            events_tx,
            events_rx,
            default_channels: config.default_channel_count,
            command_capacity: config.command_queue_capacity,
        }
    }

    /// Command queue plus the processor a device callback should own
    pub fn create_processor(&self) -> (CommandSender, AudioProcessor) {
        command_channel(self.graph.clone(), self.command_capacity)
    }

    pub fn graph(&self) -> &Shared<AudioGraph> {
        &self.graph
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn block_size(&self) -> Frames {
        self.project.buffer_size()
    }

    // -- Events --

    /// A receiver for session events (cloneable, shared queue)
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    /// Everything emitted since the last drain
    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.events_rx.try_iter().collect()
    }

    fn emit(&self, event: SessionEvent) {
        // The session holds a receiver, so the channel is never disconnected
        let _ = self.events_tx.send(event);
    }

    // -- Tracks --

    /// Create a track routed to the master bus
    pub fn add_track(&mut self, name: &str) -> EngineResult<TrackId> {
        let mut track = Track::new(name, self.default_channels, self.block_size());
        track.set_sort_index(self.tracks.len() as i32);
        track.add_post_send(self.project.master_out_bus().id(), &self.project)?;
        Ok(self.insert_track(track))
    }

    /// Register an existing track (load, undo)
    pub fn insert_track(&mut self, track: Track) -> TrackId {
        let id = track.id();
        log::info!("Session: track '{}' ({}) added", track.name(), id);
        if self.tracks.iter().any(|t| t.is_solo()) && !track.is_solo() {
            track.set_muted_by_solo(true);
        }
        self.tracks.push(track);
        self.publish_tracks();
        self.emit(SessionEvent::TrackAdded(id));
        id
    }

    pub fn remove_track(&mut self, id: TrackId) -> EngineResult<Track> {
        let Some(pos) = self.tracks.iter().position(|t| t.id() == id) else {
            log::warn!("Session: track {} not found", id);
            return Err(EngineError::UnknownTrack(id));
        };
        let track = self.tracks.remove(pos);
        self.publish_tracks();
        log::info!("Session: track '{}' ({}) removed", track.name(), id);
        self.emit(SessionEvent::TrackRemoved(id));
        if track.is_solo() {
            self.update_solo_state();
        }
        Ok(track)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id() == id)
    }

    /// Tracks in sort order
    pub fn tracks(&self) -> Vec<&Track> {
        let mut tracks: Vec<&Track> = self.tracks.iter().collect();
        tracks.sort_by_key(|t| t.sort_index());
        tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn get(&self, id: TrackId) -> EngineResult<&Track> {
        self.track(id).ok_or_else(|| {
            log::warn!("Session: track {} not found", id);
            EngineError::UnknownTrack(id)
        })
    }

    fn get_mut(&mut self, id: TrackId) -> EngineResult<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id() == id).ok_or_else(|| {
            log::warn!("Session: track {} not found", id);
            EngineError::UnknownTrack(id)
        })
    }

    /// Tracks in the order the graph renders them
    ///
    /// Sort order, except that a track reading a bus comes after every
    /// track sending into it. Feedback loops fall back to sort order.
    pub fn render_order(&self) -> Vec<&Track> {
        let mut pending = self.tracks();
        let mut order = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready = pending.iter().position(|t| match t.input_bus() {
                Some(input) => !pending
                    .iter()
                    .any(|other| other.id() != t.id() && other.sends_to(input.id())),
                None => true,
            });
            let pos = ready.unwrap_or_else(|| {
                log::warn!(
                    "Session: feedback loop through track '{}', rendering in sort order",
                    pending[0].name()
                );
                0
            });
            order.push(pending.remove(pos));
        }
        order
    }

    fn publish_tracks(&self) {
        self.graph
            .publish_tracks(self.render_order().iter().map(|t| t.node()).collect());
    }

    fn publish_outputs(&self) {
        self.graph.publish_outputs(self.project.output_buses());
    }

    // -- Solo / mute --

    /// Toggle solo on a track; returns the new solo state
    pub fn solo_track(&mut self, id: TrackId) -> EngineResult<bool> {
        let track = self.get(id)?;
        let solo = !track.is_solo();
        track.set_solo(solo);
        let audible = track.is_audible();
        self.emit(SessionEvent::SoloChanged { track: id, solo });
        self.emit(SessionEvent::AudibleStateChanged { track: id, audible });
        self.update_solo_state();
        Ok(solo)
    }

    /// Recompute solo-mutes: with any track soloed, every other track is
    /// muted by solo; with none, nothing is
    fn update_solo_state(&self) {
        let any_solo = self.tracks.iter().any(|t| t.is_solo());
        for track in &self.tracks {
            let muted = any_solo && !track.is_solo();
            if track.is_muted_by_solo() != muted {
                track.set_muted_by_solo(muted);
                self.emit(SessionEvent::AudibleStateChanged {
                    track: track.id(),
                    audible: track.is_audible(),
                });
            }
        }
    }

    /// Mute every track except `id`
    pub fn silence_others(&mut self, id: TrackId) -> EngineResult<()> {
        self.get(id)?;
        let others: Vec<TrackId> = self
            .tracks
            .iter()
            .filter(|t| t.id() != id && !t.is_muted())
            .map(|t| t.id())
            .collect();
        for other in others {
            self.set_muted(other, true)?;
        }
        Ok(())
    }

    /// Returns the previous mute state
    pub fn set_muted(&mut self, id: TrackId, muted: bool) -> EngineResult<bool> {
        let track = self.get(id)?;
        let previous = track.is_muted();
        if previous != muted {
            track.set_muted(muted);
            let audible = track.is_audible();
            self.emit(SessionEvent::MuteChanged { track: id, muted });
            self.emit(SessionEvent::AudibleStateChanged { track: id, audible });
        }
        Ok(previous)
    }

    /// Returns the previous pan
    pub fn set_pan(&mut self, id: TrackId, pan: f32) -> EngineResult<f32> {
        let track = self.get(id)?;
        let previous = track.pan();
        track.set_pan(pan);
        Ok(previous)
    }

    /// Returns the previous fader gain
    pub fn set_gain(&mut self, id: TrackId, gain: f32) -> EngineResult<f32> {
        let track = self.get(id)?;
        let previous = track.gain();
        track.set_gain(gain);
        Ok(previous)
    }

    // -- Buses --

    /// Create a user bus and make sure it is cleared every block
    pub fn add_bus(&mut self, name: &str, channel_count: usize) -> Shared<AudioBus> {
        let bus = self.project.add_bus(BusConfig::software(name, channel_count));
        self.publish_outputs();
        bus
    }

    /// Remove a user bus and every send that targets it
    pub fn remove_bus(&mut self, id: BusId) -> EngineResult<()> {
        if self.project.remove_bus(id).is_none() {
            log::warn!("Session: audio bus {} could not be found", id);
            return Err(EngineError::UnknownBus(id));
        }
        let mut removed = Vec::new();
        for track in &mut self.tracks {
            let targets: Vec<SendId> = track
                .get_pre_sends()
                .iter()
                .chain(track.get_post_sends())
                .filter(|s| s.bus_id() == id)
                .map(|s| s.id())
                .collect();
            for send in targets {
                if track.remove_send(send).is_ok() {
                    removed.push((track.id(), send));
                }
            }
        }
        for (track, send) in removed {
            self.emit(SessionEvent::SendRemoved { track, send });
        }
        self.publish_outputs();
        self.publish_tracks();
        Ok(())
    }

    /// Feed a track from `bus` (an effect return), or detach its input
    pub fn set_input_bus(&mut self, track: TrackId, bus: Option<BusId>) -> EngineResult<()> {
        let bus = match bus {
            Some(id) => Some(self.project.audio_bus(id).ok_or_else(|| {
                log::warn!("Session: audio bus {} could not be found", id);
                EngineError::UnknownBus(id)
            })?),
            None => None,
        };
        self.get_mut(track)?.set_input_bus(bus);
        self.publish_tracks();
        Ok(())
    }

    // -- Sends --

    pub fn add_post_send(&mut self, track: TrackId, bus: BusId) -> EngineResult<SendId> {
        let t = self.tracks.iter_mut().find(|t| t.id() == track);
        let t = t.ok_or(EngineError::UnknownTrack(track))?;
        let send = t.add_post_send(bus, &self.project)?.id();
        self.publish_tracks();
        self.emit(SessionEvent::SendAdded { track, send });
        Ok(send)
    }

    pub fn add_pre_send(&mut self, track: TrackId, bus: BusId) -> EngineResult<SendId> {
        let t = self.tracks.iter_mut().find(|t| t.id() == track);
        let t = t.ok_or(EngineError::UnknownTrack(track))?;
        let send = t.add_pre_send(bus, &self.project)?.id();
        self.publish_tracks();
        self.emit(SessionEvent::SendAdded { track, send });
        Ok(send)
    }

    /// Attach an existing send (undo of a removal)
    pub fn insert_send(&mut self, track: TrackId, send: Shared<AudioSend>) -> EngineResult<SendId> {
        let id = send.id();
        self.get_mut(track)?.insert_send(send)?;
        self.publish_tracks();
        self.emit(SessionEvent::SendAdded { track, send: id });
        Ok(id)
    }

    pub fn remove_send(&mut self, track: TrackId, send: SendId) -> EngineResult<Shared<AudioSend>> {
        let removed = self.get_mut(track)?.remove_send(send)?;
        self.publish_tracks();
        self.emit(SessionEvent::SendRemoved { track, send });
        Ok(removed)
    }

    // -- Plugins --

    pub fn add_plugin(&mut self, track: TrackId, plugin: Box<dyn Plugin>, prefader: bool) -> EngineResult<PluginId> {
        let plugin = self.get_mut(track)?.add_plugin(plugin, prefader)?;
        self.emit(SessionEvent::PluginAdded { track, plugin });
        Ok(plugin)
    }

    /// Instantiate a registered plugin and add it
    pub fn add_plugin_by_uri(&mut self, track: TrackId, uri: &str, prefader: bool) -> EngineResult<PluginId> {
        self.get(track)?;
        let plugin = self.registry.create_hosted(uri)?;
        self.add_plugin(track, Box::new(plugin), prefader)
    }

    /// Re-insert an existing slot (undo of a removal)
    pub fn insert_plugin_slot(&mut self, track: TrackId, slot: Shared<PluginSlot>) -> EngineResult<PluginId> {
        let plugin = self.get_mut(track)?.insert_plugin_slot(slot)?;
        self.emit(SessionEvent::PluginAdded { track, plugin });
        Ok(plugin)
    }

    pub fn remove_plugin(&mut self, track: TrackId, plugin: PluginId) -> EngineResult<Shared<PluginSlot>> {
        let slot = self.get_mut(track)?.remove_plugin(plugin)?;
        self.emit(SessionEvent::PluginRemoved { track, plugin });
        Ok(slot)
    }

    /// Move a plugin one position; returns whether it moved
    pub fn move_plugin(&mut self, track: TrackId, plugin: PluginId, up: bool) -> EngineResult<bool> {
        self.get_mut(track)?.change_plugin_order(plugin, up)
    }

    // -- Ports --

    pub fn connect_track_ports(
        &mut self,
        id: TrackId,
        device: &dyn AudioDevice,
        inports: bool,
        outports: bool,
    ) -> EngineResult<()> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(EngineError::UnknownTrack(id))?;
        let result = track.connect_ports(device, &mut self.project, inports, outports);
        self.publish_outputs();
        self.publish_tracks();
        result
    }

    pub fn disconnect_track_ports(
        &mut self,
        id: TrackId,
        device: &dyn AudioDevice,
        inports: bool,
        outports: bool,
    ) -> EngineResult<()> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(EngineError::UnknownTrack(id))?;
        track.disconnect_ports(device, &mut self.project, inports, outports);
        self.publish_outputs();
        self.publish_tracks();
        Ok(())
    }

    // -- Buffers --

    /// Resize every buffer in the session
    ///
    /// Only allowed while no device is running the graph.
    pub fn set_block_size(&mut self, frames: Frames) -> EngineResult<()> {
        let frames = frames.clamp(MIN_BUFFER_SIZE as Frames, MAX_BUFFER_SIZE as Frames);
        if self.graph.is_running() {
            log::warn!("Session: cannot resize buffers while audio is running");
            return Err(EngineError::AudioRunning);
        }
        self.project.set_buffer_size(frames);
        for track in &mut self.tracks {
            track.set_buffer_size(frames);
        }
        self.graph.set_block_size(frames);
        log::info!("Session: block size set to {} frames", frames);
        self.emit(SessionEvent::BlockSizeChanged(frames));
        Ok(())
    }

    // -- State --

    pub fn get_state(&self) -> SessionState {
        let buses = self
            .project
            .output_buses()
            .iter()
            .filter(|b| b.kind() == BusKind::Software)
            .map(|b| BusState {
                id: b.id().0,
                name: b.name().to_string(),
                channel_count: b.channel_count(),
            })
            .collect();

        SessionState {
            master: self.project.master_out_bus().id().0,
            buses,
            tracks: self.tracks().iter().map(|t| t.get_state()).collect(),
        }
    }

    /// Replace all tracks and user buses with the saved ones
    pub fn load_state(&mut self, state: &SessionState) {
        let existing: Vec<TrackId> = self.tracks.iter().map(|t| t.id()).collect();
        for id in existing {
            let _ = self.remove_track(id);
        }
        let user_buses: Vec<BusId> = self
            .project
            .output_buses()
            .iter()
            .filter(|b| b.kind() == BusKind::Software)
            .map(|b| b.id())
            .collect();
        for id in user_buses {
            self.project.remove_bus(id);
        }

        for bus in &state.buses {
            let config = BusConfig::software(&bus.name, bus.channel_count);
            let bus = AudioBus::with_id(BusId::restore(bus.id), config, self.block_size());
            self.project.insert_bus(Shared::new(&gc_handle(), bus));
        }
        self.publish_outputs();

        let block_size = self.block_size();
        let provider = LoadProvider {
            project: &self.project,
            saved_master: BusId(state.master),
        };
        let tracks: Vec<Track> = state
            .tracks
            .iter()
            .map(|t| Track::from_state(t, &provider, &self.registry, block_size))
            .collect();

        for track in tracks {
            self.insert_track(track);
        }
        self.update_solo_state();
        log::info!("Session: loaded {} tracks", self.tracks.len());
    }
}
