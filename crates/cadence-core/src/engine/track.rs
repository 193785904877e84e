//! Tracks - control-side `Track` and its real-time `TrackNode`
//!
//! A [`Track`] owns everything the control thread needs (plugin chain,
//! authoritative send lists, clips, flags). Each structural change is
//! published to the track's [`TrackNode`] as a fresh immutable list; the
//! audio thread only ever reads the node.
//!
//! Per block the node:
//! 1. silences its process bus and mixes clips and live input into it
//! 2. runs pre-sends (audible tracks only)
//! 3. runs pre-fader plugins, the fader and post-fader plugins
//! 4. runs post-sends, or silences the bus if the track is not audible

use std::sync::atomic::{AtomicBool, Ordering};

use basedrop::{Shared, SharedCell};
use serde::{Deserialize, Serialize};

use super::clip::AudioClip;
use super::gc::gc_handle;
use crate::audio::AudioDevice;
use crate::error::{EngineError, EngineResult};
use crate::mixer::Mixer;
use crate::plugin::{ChainNode, Plugin, PluginChain, PluginChainState, PluginFactory, PluginSlot};
use crate::routing::{
    AudioBus, AudioSend, BusConfig, BusDirection, BusKind, BusProvider, Project, SendKind,
    SendState,
};
use crate::types::{BusId, ClipId, Frames, PluginId, SendId, TrackId, DEFAULT_CHANNEL_COUNT};

type SendList = Vec<Shared<AudioSend>>;

/// Audio-thread view of a track
pub struct TrackNode {
    process_bus: SharedCell<AudioBus>,
    chain: Shared<ChainNode>,
    pre_sends: SharedCell<SendList>,
    post_sends: SharedCell<SendList>,
    input: SharedCell<Option<Shared<AudioBus>>>,
    clips: SharedCell<Vec<Shared<AudioClip>>>,
    muted: AtomicBool,
    muted_by_solo: AtomicBool,
    solo: AtomicBool,
}

impl TrackNode {
    fn new(process_bus: Shared<AudioBus>, chain: Shared<ChainNode>) -> Self {
        let handle = gc_handle();
        Self {
            process_bus: SharedCell::new(process_bus),
            chain,
            pre_sends: SharedCell::new(Shared::new(&handle, Vec::new())),
            post_sends: SharedCell::new(Shared::new(&handle, Vec::new())),
            input: SharedCell::new(Shared::new(&handle, None)),
            clips: SharedCell::new(Shared::new(&handle, Vec::new())),
            muted: AtomicBool::new(false),
            muted_by_solo: AtomicBool::new(false),
            solo: AtomicBool::new(false),
        }
    }

    /// Neither user-muted nor muted by another track's solo
    pub fn is_audible(&self) -> bool {
        !self.muted.load(Ordering::Acquire) && !self.muted_by_solo.load(Ordering::Acquire)
    }

    /// The bus the track renders into
    pub fn process_bus(&self) -> Shared<AudioBus> {
        self.process_bus.get()
    }

    /// Render one block (audio thread)
    ///
    /// `position` is the timeline frame while the transport rolls; clips
    /// only play when it is set. The chain always runs, even when the
    /// track is muted, so plugin state stays continuous.
    pub fn process(&self, frames: Frames, position: Option<u64>) {
        let bus = self.process_bus.get();
        bus.silence_buffers(frames);

        if let Some(position) = position {
            for clip in self.clips.get().iter() {
                clip.process(&bus, position, frames);
            }
        }

        if let Some(input) = self.input.get().as_ref() {
            mix_input(input, &bus, frames);
        }

        let audible = self.is_audible();
        if audible {
            self.process_pre_sends(&bus, frames);
        }

        let plugins = self.chain.snapshot();
        plugins.process_pre_fader(&bus, frames);
        plugins.process_fader(&bus, frames);
        plugins.process_post_fader(&bus, frames);

        if audible {
            self.process_post_sends(&bus, frames);
        } else {
            bus.silence_buffers(frames);
        }

        bus.monitor_peaks();
    }

    /// Mix the unprocessed signal into every pre-fader send destination
    pub fn process_pre_sends(&self, bus: &AudioBus, frames: Frames) {
        for send in self.pre_sends.get().iter() {
            send.process(bus, frames);
        }
    }

    /// Mix the fully processed signal into every post-fader send destination
    pub fn process_post_sends(&self, bus: &AudioBus, frames: Frames) {
        for send in self.post_sends.get().iter() {
            send.process(bus, frames);
        }
    }
}

/// Mix a live input bus into the process bus
///
/// Process channels beyond the input width take the input's last channel,
/// so a mono input feeds both sides of a stereo track.
fn mix_input(input: &AudioBus, bus: &AudioBus, frames: Frames) {
    let count = input.channel_count();
    if count == 0 {
        return;
    }
    for ch in 0..bus.channel_count() {
        let Some(src) = input.get_buffer(ch.min(count - 1), frames) else {
            continue;
        };
        let Some(mut dst) = bus.get_buffer(ch, frames) else {
            continue;
        };
        Mixer::mix_buffers_no_gain(&mut dst, &src, frames);
    }
}

fn default_sort_index() -> i32 {
    -1
}

fn default_channel_count() -> usize {
    DEFAULT_CHANNEL_COUNT
}

fn default_true() -> bool {
    true
}

/// Persisted form of a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(rename = "mutedbysolo", default)]
    pub muted_by_solo: bool,
    #[serde(rename = "sortindex", default = "default_sort_index")]
    pub sort_index: i32,
    #[serde(rename = "channelcount", default = "default_channel_count")]
    pub channel_count: usize,
    #[serde(rename = "jackinports", default = "default_true")]
    pub in_ports: bool,
    #[serde(rename = "jackoutports", default = "default_true")]
    pub out_ports: bool,
    /// Capture bus name feeding the track
    #[serde(rename = "inputbus", default, skip_serializing_if = "Option::is_none")]
    pub input_bus: Option<String>,
    #[serde(rename = "pluginchain", default)]
    pub plugins: PluginChainState,
    #[serde(default)]
    pub sends: Vec<SendState>,
}

/// Control-side track
pub struct Track {
    id: TrackId,
    name: String,
    node: Shared<TrackNode>,
    chain: PluginChain,
    process_bus: Shared<AudioBus>,
    pre_sends: SendList,
    post_sends: SendList,
    /// The post-send carrying the track's own output; kept by id so a
    /// rename does not lose it
    output_send: Option<SendId>,
    input_bus: Option<Shared<AudioBus>>,
    clips: Vec<Shared<AudioClip>>,
    channel_count: usize,
    buffer_size: Frames,
    sort_index: i32,
    in_ports: bool,
    out_ports: bool,
}

impl Track {
    pub fn new(name: impl Into<String>, channel_count: usize, buffer_size: Frames) -> Self {
        Self::with_id(TrackId::new(), name, channel_count, buffer_size)
    }

    pub fn with_id(id: TrackId, name: impl Into<String>, channel_count: usize, buffer_size: Frames) -> Self {
        let name = name.into();
        let chain = PluginChain::new();
        let process_bus = Self::make_process_bus(&name, channel_count, buffer_size);
        let node = Shared::new(&gc_handle(), TrackNode::new(process_bus.clone(), chain.node()));
        log::debug!("Track '{}' ({}) created with {} channels", name, id, channel_count);
        Self {
            id,
            name,
            node,
            chain,
            process_bus,
            pre_sends: Vec::new(),
            post_sends: Vec::new(),
            output_send: None,
            input_bus: None,
            clips: Vec::new(),
            channel_count,
            buffer_size,
            sort_index: -1,
            in_ports: true,
            out_ports: true,
        }
    }

    fn make_process_bus(name: &str, channel_count: usize, buffer_size: Frames) -> Shared<AudioBus> {
        Shared::new(
            &gc_handle(),
            AudioBus::new(BusConfig::software(name, channel_count), buffer_size),
        )
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if let Some(send) = self.output_send.and_then(|id| self.get_send(id)) {
            log::debug!(
                "Track {}: output '{}' stays the track output after rename",
                self.id,
                send.name()
            );
        }
        log::debug!("Track {}: renamed '{}' -> '{}'", self.id, self.name, name);
        self.name = name;
    }

    /// Real-time handle registered with the graph
    pub fn node(&self) -> Shared<TrackNode> {
        self.node.clone()
    }

    pub fn process_bus(&self) -> &Shared<AudioBus> {
        &self.process_bus
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Rebuild the process bus with a new width
    pub fn set_channel_count(&mut self, count: usize) {
        if count == self.channel_count {
            return;
        }
        self.channel_count = count;
        self.process_bus = Self::make_process_bus(&self.name, count, self.buffer_size);
        self.node.process_bus.set(self.process_bus.clone());
    }

    /// Resize the process bus (audio stopped)
    pub fn set_buffer_size(&mut self, size: Frames) {
        self.buffer_size = size;
        self.process_bus.set_buffer_size(size);
    }

    pub fn sort_index(&self) -> i32 {
        self.sort_index
    }

    pub fn set_sort_index(&mut self, index: i32) {
        self.sort_index = index;
    }

    pub fn in_ports(&self) -> bool {
        self.in_ports
    }

    pub fn set_in_ports(&mut self, enabled: bool) {
        self.in_ports = enabled;
    }

    pub fn out_ports(&self) -> bool {
        self.out_ports
    }

    pub fn set_out_ports(&mut self, enabled: bool) {
        self.out_ports = enabled;
    }

    // -- Audible state --

    pub fn is_muted(&self) -> bool {
        self.node.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.node.muted.store(muted, Ordering::Release);
    }

    pub fn is_solo(&self) -> bool {
        self.node.solo.load(Ordering::Acquire)
    }

    /// Soloing a track always lifts its own solo-mute
    pub fn set_solo(&self, solo: bool) {
        self.node.solo.store(solo, Ordering::Release);
        if solo {
            self.node.muted_by_solo.store(false, Ordering::Release);
        }
    }

    pub fn is_muted_by_solo(&self) -> bool {
        self.node.muted_by_solo.load(Ordering::Acquire)
    }

    pub fn set_muted_by_solo(&self, muted: bool) {
        self.node.muted_by_solo.store(muted, Ordering::Release);
    }

    pub fn is_audible(&self) -> bool {
        self.node.is_audible()
    }

    /// Balance applied by the fader, clamped to [-1, 1]
    pub fn set_pan(&self, pan: f32) {
        self.chain.pan_handle().store(pan.clamp(-1.0, 1.0));
    }

    pub fn pan(&self) -> f32 {
        self.chain.pan_handle().load()
    }

    // -- Plugins --

    pub fn plugin_chain(&self) -> &PluginChain {
        &self.chain
    }

    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>, prefader: bool) -> EngineResult<PluginId> {
        self.chain.add_plugin(plugin, prefader)
    }

    pub fn insert_plugin_slot(&mut self, slot: Shared<PluginSlot>) -> EngineResult<PluginId> {
        self.chain.add_slot(slot)
    }

    pub fn remove_plugin(&mut self, id: PluginId) -> EngineResult<Shared<PluginSlot>> {
        self.chain.remove_plugin(id)
    }

    pub fn change_plugin_order(&mut self, id: PluginId, up: bool) -> EngineResult<bool> {
        self.chain.change_plugin_order(id, up)
    }

    pub fn set_gain(&self, gain: f32) {
        self.chain.set_gain(gain);
    }

    pub fn gain(&self) -> f32 {
        self.chain.gain()
    }

    // -- Sends --

    /// Route the processed signal to `bus_id` after the chain
    pub fn add_post_send(&mut self, bus_id: BusId, provider: &dyn BusProvider) -> EngineResult<Shared<AudioSend>> {
        self.add_send(bus_id, SendKind::PostSend, provider)
    }

    /// Route the raw signal to `bus_id` before the chain
    pub fn add_pre_send(&mut self, bus_id: BusId, provider: &dyn BusProvider) -> EngineResult<Shared<AudioSend>> {
        self.add_send(bus_id, SendKind::PreSend, provider)
    }

    fn add_send(&mut self, bus_id: BusId, kind: SendKind, provider: &dyn BusProvider) -> EngineResult<Shared<AudioSend>> {
        let Some(bus) = provider.audio_bus(bus_id) else {
            log::warn!("Track '{}': audio bus {} could not be found", self.name, bus_id);
            return Err(EngineError::UnknownBus(bus_id));
        };
        self.add_send_to_bus(bus, kind)
    }

    /// Create a send to an already resolved bus
    pub fn add_send_to_bus(&mut self, bus: Shared<AudioBus>, kind: SendKind) -> EngineResult<Shared<AudioSend>> {
        let send = Shared::new(&gc_handle(), AudioSend::new(bus, kind));
        self.insert_send(send.clone())?;
        Ok(send)
    }

    /// Attach an existing send; rejected if its bus is already a target
    pub fn insert_send(&mut self, send: Shared<AudioSend>) -> EngineResult<()> {
        let kind = send.kind();
        let list = self.sends(kind);
        if list.iter().any(|s| s.bus_id() == send.bus_id()) {
            log::warn!(
                "Track '{}' already has bus '{}' as {}",
                self.name,
                send.name(),
                kind.label()
            );
            return Err(EngineError::DuplicateSend {
                track: self.name.clone(),
                bus: send.bus_id(),
                kind: kind.label(),
            });
        }

        log::debug!("Track '{}': {} to '{}' added", self.name, kind.label(), send.name());
        if self.output_send.is_none() && kind == SendKind::PostSend && send.name() == self.name {
            self.output_send = Some(send.id());
        }
        self.sends_mut(kind).push(send);
        self.publish_sends(kind);
        Ok(())
    }

    /// Remove post-sends by id; the track's own output send is kept
    pub fn remove_post_sends(&mut self, ids: &[SendId]) -> Vec<Shared<AudioSend>> {
        self.remove_sends(SendKind::PostSend, ids)
    }

    pub fn remove_pre_sends(&mut self, ids: &[SendId]) -> Vec<Shared<AudioSend>> {
        self.remove_sends(SendKind::PreSend, ids)
    }

    /// Drop every post-send except the track's own output
    pub fn remove_all_post_sends(&mut self) -> Vec<Shared<AudioSend>> {
        let ids: Vec<SendId> = self.post_sends.iter().map(|s| s.id()).collect();
        self.remove_post_sends(&ids)
    }

    /// Remove a single send of either kind
    pub fn remove_send(&mut self, id: SendId) -> EngineResult<Shared<AudioSend>> {
        let Some(send) = self.get_send(id) else {
            log::warn!("Track '{}': send {} not found", self.name, id);
            return Err(EngineError::UnknownSend(id));
        };
        if self.is_own_output(&send) {
            return Err(EngineError::InvalidState(format!(
                "send '{}' is the track output and cannot be removed",
                send.name()
            )));
        }
        self.remove_sends(send.kind(), &[id]);
        Ok(send)
    }

    fn remove_sends(&mut self, kind: SendKind, ids: &[SendId]) -> Vec<Shared<AudioSend>> {
        let name = self.name.clone();
        let own = self.output_send;
        let list = self.sends_mut(kind);
        let mut removed = Vec::new();
        list.retain(|send| {
            if !ids.contains(&send.id()) {
                return true;
            }
            if own == Some(send.id()) {
                log::debug!("Track '{}': own output send is not removable", name);
                return true;
            }
            removed.push(send.clone());
            false
        });
        if !removed.is_empty() {
            self.publish_sends(kind);
        }
        removed
    }

    /// Remove a send without the own-output guard (port teardown)
    fn detach_send(&mut self, id: SendId) {
        if self.output_send == Some(id) {
            self.output_send = None;
        }
        for kind in [SendKind::PreSend, SendKind::PostSend] {
            let list = self.sends_mut(kind);
            let before = list.len();
            list.retain(|s| s.id() != id);
            if list.len() != before {
                self.publish_sends(kind);
            }
        }
    }

    fn is_own_output(&self, send: &AudioSend) -> bool {
        self.output_send == Some(send.id())
    }

    /// Whether any send, pre or post, feeds `bus`
    pub fn sends_to(&self, bus: BusId) -> bool {
        self.pre_sends
            .iter()
            .chain(&self.post_sends)
            .any(|s| s.bus_id() == bus)
    }

    pub fn get_send(&self, id: SendId) -> Option<Shared<AudioSend>> {
        self.pre_sends
            .iter()
            .chain(&self.post_sends)
            .find(|s| s.id() == id)
            .cloned()
    }

    pub fn get_post_sends(&self) -> &[Shared<AudioSend>] {
        &self.post_sends
    }

    pub fn get_pre_sends(&self) -> &[Shared<AudioSend>] {
        &self.pre_sends
    }

    fn sends(&self, kind: SendKind) -> &SendList {
        match kind {
            SendKind::PreSend => &self.pre_sends,
            SendKind::PostSend => &self.post_sends,
        }
    }

    fn sends_mut(&mut self, kind: SendKind) -> &mut SendList {
        match kind {
            SendKind::PreSend => &mut self.pre_sends,
            SendKind::PostSend => &mut self.post_sends,
        }
    }

    fn publish_sends(&self, kind: SendKind) {
        let list = Shared::new(&gc_handle(), self.sends(kind).clone());
        match kind {
            SendKind::PreSend => self.node.pre_sends.set(list),
            SendKind::PostSend => self.node.post_sends.set(list),
        };
    }

    // -- Input --

    pub fn input_bus(&self) -> Option<&Shared<AudioBus>> {
        self.input_bus.as_ref()
    }

    /// Attach or detach the live input
    pub fn set_input_bus(&mut self, bus: Option<Shared<AudioBus>>) {
        match &bus {
            Some(bus) => log::debug!("Track '{}': input bus '{}'", self.name, bus.name()),
            None => log::debug!("Track '{}': input bus removed", self.name),
        }
        self.input_bus = bus;
        self.node
            .input
            .set(Shared::new(&gc_handle(), self.input_bus.clone()));
    }

    pub fn set_input_bus_by_name(&mut self, name: &str, provider: &dyn BusProvider) -> EngineResult<()> {
        let Some(bus) = provider.capture_bus(name) else {
            log::warn!("Track '{}': capture bus '{}' could not be found", self.name, name);
            return Err(EngineError::UnknownCaptureBus(name.to_string()));
        };
        self.set_input_bus(Some(bus));
        Ok(())
    }

    // -- Clips --

    pub fn add_clip(&mut self, clip: AudioClip) -> ClipId {
        let id = clip.id();
        self.clips.push(Shared::new(&gc_handle(), clip));
        self.publish_clips();
        id
    }

    pub fn remove_clip(&mut self, id: ClipId) -> Option<Shared<AudioClip>> {
        let pos = self.clips.iter().position(|c| c.id() == id)?;
        let clip = self.clips.remove(pos);
        self.publish_clips();
        Some(clip)
    }

    pub fn clips(&self) -> &[Shared<AudioClip>] {
        &self.clips
    }

    fn publish_clips(&self) {
        self.node
            .clips
            .set(Shared::new(&gc_handle(), self.clips.clone()));
    }

    // -- Device ports --

    /// Expose the track as device ports
    ///
    /// Output: a hardware output bus named after the track (channels
    /// `"<track> : <n> : out"`) fed by the track's own post-send. Input: a
    /// capture bus with channels `"<track> : <n> : in"` set as the input.
    /// Existing buses of the same name are reused. Channels are registered
    /// with the device only when the matching port flag is set.
    pub fn connect_ports(
        &mut self,
        device: &dyn AudioDevice,
        project: &mut Project,
        inports: bool,
        outports: bool,
    ) -> EngineResult<()> {
        let driver = device.driver_type();
        if !driver.supports_ports() {
            return Err(EngineError::DriverUnsupported(driver));
        }
        if self.channel_count == 0 {
            log::error!("Track '{}': channel count is 0", self.name);
            return Err(EngineError::NoChannels);
        }

        if outports {
            let existing = self
                .output_send
                .and_then(|id| self.post_sends.iter().find(|s| s.id() == id))
                .map(|s| s.bus().clone());
            let bus = match existing {
                Some(bus) => bus,
                None => {
                    let config = BusConfig::hardware(&self.name, self.channel_count, BusDirection::Output)
                        .with_channel_names(self.port_names("out"));
                    let bus = project.add_bus(config);
                    self.add_send_to_bus(bus.clone(), SendKind::PostSend)?;
                    bus
                }
            };
            if self.out_ports {
                register_bus(device, &bus, project.buffer_size())?;
            }
        }

        if inports {
            let bus = match project.capture_bus(&self.name) {
                Some(bus) => bus,
                None => {
                    let config = BusConfig::hardware(&self.name, self.channel_count, BusDirection::Input)
                        .with_channel_names(self.port_names("in"));
                    project.add_bus(config)
                }
            };
            if self.in_ports {
                register_bus(device, &bus, project.buffer_size())?;
            }
            self.set_input_bus(Some(bus));
        }

        log::info!("Track '{}': ports connected (in: {}, out: {})", self.name, inports, outports);
        Ok(())
    }

    /// Undo [`Track::connect_ports`]: unregister and drop the port buses
    pub fn disconnect_ports(&mut self, device: &dyn AudioDevice, project: &mut Project, inports: bool, outports: bool) {
        if inports {
            if let Some(bus) = self.input_bus.clone() {
                unregister_bus(device, &bus);
                project.remove_bus(bus.id());
                self.set_input_bus(None);
            }
        }

        if outports {
            let port_sends: Vec<Shared<AudioSend>> = self
                .post_sends
                .iter()
                .filter(|s| s.bus().kind() == BusKind::Hardware && Some(s.id()) == self.output_send)
                .cloned()
                .collect();
            for send in port_sends {
                unregister_bus(device, send.bus());
                project.remove_bus(send.bus_id());
                self.detach_send(send.id());
            }
        }
    }

    fn port_names(&self, suffix: &str) -> Vec<String> {
        (0..self.channel_count)
            .map(|n| format!("{} : {} : {}", self.name, n, suffix))
            .collect()
    }

    // -- State --

    pub fn get_state(&self) -> TrackState {
        TrackState {
            id: self.id.0,
            name: self.name.clone(),
            pan: self.pan(),
            mute: self.is_muted(),
            solo: self.is_solo(),
            muted_by_solo: self.is_muted_by_solo(),
            sort_index: self.sort_index,
            channel_count: self.channel_count,
            in_ports: self.in_ports,
            out_ports: self.out_ports,
            input_bus: self.input_bus.as_ref().map(|b| b.name().to_string()),
            plugins: self.chain.get_state(),
            sends: self
                .pre_sends
                .iter()
                .chain(&self.post_sends)
                .map(|s| s.get_state())
                .collect(),
        }
    }

    /// Rebuild a track from persisted state
    ///
    /// Sends and plugins that cannot be restored are dropped with a warning.
    /// A track left without post-sends is routed to the master bus.
    pub fn from_state(
        state: &TrackState,
        provider: &dyn BusProvider,
        factory: &dyn PluginFactory,
        buffer_size: Frames,
    ) -> Self {
        let mut track = Self::with_id(
            TrackId::restore(state.id),
            state.name.clone(),
            state.channel_count,
            buffer_size,
        );
        track.set_pan(state.pan);
        track.set_muted(state.mute);
        track.set_solo(state.solo);
        track.set_muted_by_solo(state.muted_by_solo);
        track.sort_index = state.sort_index;
        track.in_ports = state.in_ports;
        track.out_ports = state.out_ports;

        if let Some(name) = &state.input_bus {
            // Already logged; the track loads without live input
            let _ = track.set_input_bus_by_name(name, provider);
        }

        track.chain.set_state(&state.plugins, factory);

        for send_state in &state.sends {
            let Some(bus) = provider.audio_bus(BusId::restore(send_state.bus)) else {
                log::warn!(
                    "Track '{}': send {} could not be restored, bus {} missing",
                    track.name,
                    send_state.id,
                    send_state.bus
                );
                continue;
            };
            let send = Shared::new(&gc_handle(), AudioSend::from_state(send_state, bus));
            if let Err(e) = track.insert_send(send) {
                log::warn!("Track '{}': send {} skipped: {}", track.name, send_state.id, e);
            }
        }

        if track.post_sends.is_empty() {
            let master = provider.master_out_bus();
            if let Err(e) = track.add_send_to_bus(master, SendKind::PostSend) {
                log::warn!("Track '{}': master send not added: {}", track.name, e);
            }
        }

        track
    }
}

fn register_bus(device: &dyn AudioDevice, bus: &AudioBus, buffer_size: Frames) -> EngineResult<()> {
    for channel in bus.channels() {
        channel.set_buffer_size(buffer_size);
        device.register_channel(channel)?;
    }
    Ok(())
}

fn unregister_bus(device: &dyn AudioDevice, bus: &AudioBus) {
    for channel in bus.channels() {
        device.unregister_channel(channel.name());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;
    use crate::audio::{DriverType, NullDevice};
    use crate::plugin::native::{DELAY_URI, GAIN_URI, LOWPASS_URI};
    use crate::plugin::{control_ports, ControlPorts, PluginRegistry, PluginState};
    use crate::types::Sample;

    const FRAMES: Frames = 8;

    fn project() -> Project {
        Project::new("Master", 2, FRAMES)
    }

    fn constant_clip(value: Sample) -> AudioClip {
        AudioClip::new("dc", 0, 48000, vec![vec![value; 64], vec![value; 64]])
    }

    fn master_samples(project: &Project, ch: usize) -> Vec<Sample> {
        project.master_out_bus().get_buffer(ch, FRAMES).unwrap().to_vec()
    }

    /// Counts process calls
    struct Counter {
        calls: Arc<AtomicUsize>,
    }

    impl Plugin for Counter {
        fn name(&self) -> &str {
            "Counter"
        }

        fn type_name(&self) -> &'static str {
            "Counter"
        }

        fn process(&mut self, _bus: &AudioBus, _frames: Frames) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }

        fn control_ports(&self) -> ControlPorts {
            control_ports(&[])
        }

        fn get_state(&self) -> PluginState {
            PluginState::new("Counter")
        }

        fn set_state(&mut self, _state: &PluginState) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_duplicate_send_rejected() {
        let mut project = project();
        let fx = project.add_bus(BusConfig::software("FX", 2));
        let mut track = Track::new("Gtr", 2, FRAMES);

        track.add_post_send(fx.id(), &project).unwrap();
        let err = track.add_post_send(fx.id(), &project).err().unwrap();
        assert!(matches!(err, EngineError::DuplicateSend { .. }));
        assert_eq!(track.get_post_sends().len(), 1);

        // Same bus as a pre-send is a different direction
        track.add_pre_send(fx.id(), &project).unwrap();
        assert_eq!(track.get_pre_sends().len(), 1);
    }

    #[test]
    fn test_unknown_bus_rejected() {
        let project = project();
        let mut track = Track::new("Gtr", 2, FRAMES);
        assert_eq!(
            track.add_post_send(BusId(-5), &project).err().unwrap(),
            EngineError::UnknownBus(BusId(-5))
        );
        assert!(track.get_post_sends().is_empty());
    }

    #[test]
    fn test_own_output_send_not_removable() {
        let mut project = project();
        let own = project.add_bus(BusConfig::software("Vox", 2));
        let fx = project.add_bus(BusConfig::software("FX", 2));
        let mut track = Track::new("Vox", 2, FRAMES);
        let own_send = track.add_post_send(own.id(), &project).unwrap();
        let fx_send = track.add_post_send(fx.id(), &project).unwrap();

        let removed = track.remove_post_sends(&[own_send.id()]);
        assert!(removed.is_empty());
        assert_eq!(track.get_post_sends().len(), 2);
        assert!(track.remove_send(own_send.id()).is_err());

        let removed = track.remove_all_post_sends();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), fx_send.id());
        assert_eq!(track.get_post_sends().len(), 1);
    }

    #[test]
    fn test_post_send_reaches_master_with_pan() {
        let project = project();
        let mut track = Track::new("Keys", 2, FRAMES);
        track.add_post_send(project.master_out_bus().id(), &project).unwrap();
        track.add_clip(constant_clip(1.0));
        track.set_pan(0.5);

        track.node().process(FRAMES, Some(0));
        assert!(master_samples(&project, 0).iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert!(master_samples(&project, 1).iter().all(|s| (*s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_clips_silent_while_stopped() {
        let project = project();
        let mut track = Track::new("Keys", 2, FRAMES);
        track.add_post_send(project.master_out_bus().id(), &project).unwrap();
        track.add_clip(constant_clip(1.0));

        track.node().process(FRAMES, None);
        assert!(master_samples(&project, 0).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_pre_send_taps_before_fader() {
        let mut project = project();
        let cue = project.add_bus(BusConfig::software("Cue", 2));
        let mut track = Track::new("Bass", 2, FRAMES);
        track.add_pre_send(cue.id(), &project).unwrap();
        track.add_post_send(project.master_out_bus().id(), &project).unwrap();
        track.add_clip(constant_clip(1.0));
        track.set_gain(0.25);

        track.node().process(FRAMES, Some(0));
        let cue_out = cue.get_buffer(0, FRAMES).unwrap().to_vec();
        assert!(cue_out.iter().all(|s| (*s - 1.0).abs() < 1e-6));
        assert!(master_samples(&project, 0).iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_mute_keeps_processing() {
        let project = project();
        let mut track = Track::new("Pad", 2, FRAMES);
        track.add_post_send(project.master_out_bus().id(), &project).unwrap();
        track.add_clip(constant_clip(1.0));
        let calls = Arc::new(AtomicUsize::new(0));
        track
            .add_plugin(Box::new(Counter { calls: calls.clone() }), false)
            .unwrap();

        track.set_muted(true);
        assert!(!track.is_audible());
        track.node().process(FRAMES, Some(0));
        track.node().process(FRAMES, Some(8));

        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert!(master_samples(&project, 0).iter().all(|s| *s == 0.0));
        assert!(track.process_bus().get_buffer(0, FRAMES).unwrap().iter().all(|s| *s == 0.0));

        track.set_muted(false);
        track.node().process(FRAMES, Some(16));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert!(master_samples(&project, 0).iter().all(|s| *s == 1.0));
    }

    #[test]
    fn test_solo_lifts_own_solo_mute() {
        let track = Track::new("Lead", 2, FRAMES);
        track.set_muted_by_solo(true);
        assert!(!track.is_audible());
        track.set_solo(true);
        assert!(!track.is_muted_by_solo());
        assert!(track.is_audible());
    }

    #[test]
    fn test_mono_input_feeds_stereo_track() {
        let mut project = project();
        let capture = project.add_capture_bus("Mic", 1);
        let mut track = Track::new("Vocal", 2, FRAMES);
        track.set_input_bus_by_name("Mic", &project).unwrap();
        track.add_post_send(project.master_out_bus().id(), &project).unwrap();
        capture.get_buffer(0, FRAMES).unwrap().fill(0.5);

        track.node().process(FRAMES, None);
        assert!(master_samples(&project, 0).iter().all(|s| *s == 0.5));
        assert!(master_samples(&project, 1).iter().all(|s| *s == 0.5));

        assert_eq!(
            track.set_input_bus_by_name("Nope", &project),
            Err(EngineError::UnknownCaptureBus("Nope".to_string()))
        );
    }

    #[test]
    fn test_state_round_trip() {
        let mut project = project();
        let fx = project.add_bus(BusConfig::software("FX", 2));
        let registry = PluginRegistry::default();

        let mut track = Track::new("Drums", 2, FRAMES);
        track.add_post_send(project.master_out_bus().id(), &project).unwrap();
        let fx_send = track.add_post_send(fx.id(), &project).unwrap();
        fx_send.set_gain(0.3);
        fx_send.set_pan(-0.2);
        track.add_plugin(Box::new(registry.create_hosted(GAIN_URI).unwrap()), true).unwrap();
        track.add_plugin(Box::new(registry.create_hosted(LOWPASS_URI).unwrap()), false).unwrap();
        track.add_plugin(Box::new(registry.create_hosted(DELAY_URI).unwrap()), true).unwrap();
        track.set_pan(0.4);
        track.set_muted(true);
        track.set_sort_index(3);

        let yaml = serde_yaml::to_string(&track.get_state()).unwrap();
        let state: TrackState = serde_yaml::from_str(&yaml).unwrap();
        let restored = Track::from_state(&state, &project, &registry, FRAMES);

        assert_eq!(restored.id(), track.id());
        assert_eq!(restored.get_post_sends().len(), 2);
        assert_eq!(restored.plugin_chain().get_plugins().len(), 4);
        let tags = |t: &Track| -> Vec<bool> {
            t.plugin_chain()
                .get_plugins()
                .iter()
                .filter(|s| !s.is_fader())
                .map(|s| s.is_prefader())
                .collect()
        };
        assert_eq!(tags(&restored), tags(&track));
        assert_eq!(restored.pan(), 0.4);
        assert!(restored.is_muted());
        assert_eq!(restored.sort_index(), 3);

        let send = restored.get_send(fx_send.id()).unwrap();
        assert_eq!(send.gain(), 0.3);
        assert_eq!(send.pan(), -0.2);
    }

    #[test]
    fn test_state_defaults_and_master_fallback() {
        let project = project();
        let registry = PluginRegistry::default();
        let state: TrackState = serde_yaml::from_str(
            "id: 900\nname: Loaded\nsends:\n  - id: 901\n    bus: 12345\n    type: PostSend\n",
        )
        .unwrap();
        assert_eq!(state.sort_index, -1);
        assert_eq!(state.channel_count, 2);
        assert!(state.in_ports && state.out_ports);

        let track = Track::from_state(&state, &project, &registry, FRAMES);
        assert_eq!(track.get_post_sends().len(), 1);
        assert_eq!(track.get_post_sends()[0].bus_id(), project.master_out_bus().id());
    }

    #[test]
    fn test_connect_ports() {
        let mut project = project();
        let mut track = Track::new("Synth", 2, FRAMES);

        let null = NullDevice::default();
        assert_eq!(
            track.connect_ports(&null, &mut project, true, true),
            Err(EngineError::DriverUnsupported(DriverType::Null))
        );

        let jack = NullDevice::new(FRAMES, 48000).with_driver(DriverType::Jack);
        let mut empty = Track::new("Empty", 0, FRAMES);
        assert_eq!(
            empty.connect_ports(&jack, &mut project, true, true),
            Err(EngineError::NoChannels)
        );

        track.connect_ports(&jack, &mut project, true, true).unwrap();
        assert_eq!(
            jack.ports(),
            vec![
                "Synth : 0 : out",
                "Synth : 1 : out",
                "Synth : 0 : in",
                "Synth : 1 : in",
            ]
        );
        assert_eq!(track.get_post_sends().len(), 1);
        assert_eq!(track.get_post_sends()[0].name(), "Synth");
        assert_eq!(track.input_bus().unwrap().name(), "Synth");
        assert!(project.capture_bus("Synth").is_some());

        track.disconnect_ports(&jack, &mut project, true, true);
        assert!(jack.ports().is_empty());
        assert!(track.get_post_sends().is_empty());
        assert!(track.input_bus().is_none());
        assert!(project.capture_bus("Synth").is_none());
    }

    #[test]
    fn test_output_send_survives_rename() {
        let mut project = project();
        let jack = NullDevice::new(FRAMES, 48000).with_driver(DriverType::Jack);
        let mut track = Track::new("Synth", 2, FRAMES);
        track.add_post_send(project.master_out_bus().id(), &project).unwrap();
        track.connect_ports(&jack, &mut project, false, true).unwrap();
        let output = track
            .get_post_sends()
            .iter()
            .find(|s| s.name() == "Synth")
            .unwrap()
            .id();

        track.set_name("Lead");
        assert!(track.remove_send(output).is_err());
        let removed = track.remove_all_post_sends();
        assert_eq!(removed.len(), 1);
        assert_eq!(track.get_post_sends().len(), 1);
        assert_eq!(track.get_post_sends()[0].id(), output);

        // Reconnecting reuses the renamed track's output bus
        track.connect_ports(&jack, &mut project, false, true).unwrap();
        assert_eq!(track.get_post_sends().len(), 1);

        track.disconnect_ports(&jack, &mut project, false, true);
        assert!(track.get_post_sends().is_empty());
        assert!(jack.ports().is_empty());
    }

    #[test]
    fn test_channel_count_rebuilds_process_bus() {
        let mut track = Track::new("Mono", 1, FRAMES);
        assert_eq!(track.node().process_bus().channel_count(), 1);
        track.set_channel_count(2);
        assert_eq!(track.node().process_bus().channel_count(), 2);
        assert_eq!(track.process_bus().channel_count(), 2);
    }

    #[test]
    fn test_clip_remove() {
        let mut track = Track::new("Keys", 2, FRAMES);
        let id = track.add_clip(constant_clip(1.0));
        assert_eq!(track.clips().len(), 1);
        assert!(track.remove_clip(id).is_some());
        assert!(track.remove_clip(id).is_none());
    }
}
