//! The top-level session (spec.md §4.6, §5, §6): owns one [`ChannelSlot`]
//! per [`ChannelKind`], the shared mouse and agent state, and the
//! configured callbacks, and drives everything through `process`.
//!
//! Per spec.md §9 ("Global singleton session... a handle-based API is a
//! natural re-architecture that does not change semantics"), this core
//! returns a session handle from `connect` rather than keeping process-wide
//! global state.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::trace;

use crate::agent::{self, AgentState, ClipboardType};
use crate::callbacks::{
    ClipboardCallbacks, CursorCallbacks, DisplayCallbacks, DrawBitmap, NotifyCallback,
    PlaybackCallbacks, ReadyCallback, RecordCallbacks,
};
use crate::channel::{
    self, cursor, display, handshake, inputs, main, playback, record, ChannelExtra, ChannelKind,
    ChannelSlot, RecvState, SendHandle,
};
use crate::config::{Endpoint, SessionConfig};
use crate::error::{Result, SpiceError};
use crate::mouse::{MouseButton, MouseState};
use crate::transport;
use crate::wire::caps::CapSet;
use crate::wire::header;
use crate::wire::{common_msgc, inputs_msgc, main_msg, main_msgc, mouse_mode, playback_msg, record_msg};
use crate::wire::{cursor_msg, display_msg};

/// `process()`'s non-error return value (spec.md §6: `{RUN, SHUTDOWN}`;
/// the `ERR_*` statuses are carried by this crate's `Result` instead, per
/// SPEC_FULL.md's redesign note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Run,
    Shutdown,
}

/// `getServerInfo`'s payload (spec.md §6): name and UUID are only known
/// once the server has sent them, which is not guaranteed on every server.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub uuid: Option<[u8; 16]>,
}

struct AgentFrame {
    msg_type: u32,
    remaining: usize,
}

/// The session handle returned by [`Session::connect`]. All methods take
/// `&self`: receive-side work (framing, dispatch, callbacks) only ever runs
/// on whichever thread calls [`Session::process`]; outbound methods may be
/// called concurrently from other threads (spec.md §5).
pub struct Session {
    channels: [ChannelSlot; 6],
    mouse: MouseState,
    agent: AgentState,
    agent_frame: Mutex<Option<AgentFrame>>,
    /// The server-assigned session id from `MAIN_INIT`, used as the link
    /// `connection_id` for every channel but MAIN, which always links with
    /// `0` (spec.md §4.2).
    session_id: AtomicU32,
    endpoint: Endpoint,
    password: String,
    connected: AtomicBool,
    main_requires_name_uuid: AtomicBool,
    server_info: Mutex<ServerInfo>,
    ready_cb: Mutex<Option<ReadyCallback>>,
    notify_cb: Mutex<Option<NotifyCallback>>,
    clipboard_cb: Mutex<Option<ClipboardCallbacks>>,
    playback_cb: Mutex<Option<PlaybackCallbacks>>,
    record_cb: Mutex<Option<RecordCallbacks>>,
    display_cb: Mutex<Option<DisplayCallbacks>>,
    cursor_cb: Mutex<Option<CursorCallbacks>>,
}

impl Session {
    /// `purespice_connect`: validates the configuration, opens the MAIN
    /// channel, and returns a ready-to-drive session (spec.md §4.6).
    pub async fn connect(config: SessionConfig) -> Result<Session> {
        config.validate()?;

        let channels = [
            ChannelSlot::new(ChannelKind::Main),
            ChannelSlot::new(ChannelKind::Inputs),
            ChannelSlot::new(ChannelKind::Playback),
            ChannelSlot::new(ChannelKind::Record),
            ChannelSlot::new(ChannelKind::Display),
            ChannelSlot::new(ChannelKind::Cursor),
        ];
        channels[ChannelKind::Main.index()].enable.store(true, Ordering::Release);
        channels[ChannelKind::Main.index()].available.store(true, Ordering::Release);
        store_option(&channels, ChannelKind::Inputs, config.inputs.enable, config.inputs.autoconnect);
        store_option(&channels, ChannelKind::Playback, config.playback.enable, config.playback.autoconnect);
        store_option(&channels, ChannelKind::Record, config.record.enable, config.record.autoconnect);
        store_option(&channels, ChannelKind::Display, config.display.enable, config.display.autoconnect);
        store_option(&channels, ChannelKind::Cursor, config.cursor.enable, config.cursor.autoconnect);

        let session = Session {
            channels,
            mouse: MouseState::new(),
            agent: AgentState::new(),
            agent_frame: Mutex::new(None),
            session_id: AtomicU32::new(0),
            endpoint: config.endpoint,
            password: config.password,
            connected: AtomicBool::new(false),
            main_requires_name_uuid: AtomicBool::new(false),
            server_info: Mutex::new(ServerInfo::default()),
            ready_cb: Mutex::new(config.ready),
            notify_cb: Mutex::new(config.notify),
            clipboard_cb: Mutex::new(if config.clipboard.enable { config.clipboard.callbacks } else { None }),
            playback_cb: Mutex::new(config.playback.callbacks),
            record_cb: Mutex::new(config.record.callbacks),
            display_cb: Mutex::new(config.display.callbacks),
            cursor_cb: Mutex::new(config.cursor.callbacks),
        };

        session.open_channel(ChannelKind::Main).await?;
        session.connected.store(true, Ordering::Release);
        Ok(session)
    }

    /// `purespice_disconnect`: tears every connected channel down in
    /// reverse order, sending a farewell `DISCONNECTING` on each first
    /// (spec.md §4.6).
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        for kind in ChannelKind::ALL.into_iter().rev() {
            if self.channels[kind.index()].is_connected() {
                self.teardown_channel(kind, true).await;
            }
        }
        self.agent.stop();
    }

    pub fn has_channel(&self, kind: ChannelKind) -> bool {
        self.channels[kind.index()].available.load(Ordering::Acquire)
    }

    pub fn channel_connected(&self, kind: ChannelKind) -> bool {
        self.channels[kind.index()].is_connected()
    }

    /// Runs the full handshake for a non-MAIN channel right now. Requires
    /// the server to have already advertised `kind` via `CHANNELS_LIST`
    /// (spec.md §4.6).
    pub async fn connect_channel(&self, kind: ChannelKind) -> Result<()> {
        if kind == ChannelKind::Main {
            return Err(SpiceError::Configuration(
                "the main channel connects automatically from Session::connect".into(),
            ));
        }
        if !self.has_channel(kind) {
            return Err(SpiceError::NotConnected(format!("{kind:?} channel not available")));
        }
        if self.channels[kind.index()].is_connected() {
            return Ok(());
        }
        self.open_channel(kind).await
    }

    /// Marks `kind` for teardown on the next `process` tick, avoiding
    /// re-entrancy into a handler that is currently executing (spec.md
    /// §4.6).
    pub fn disconnect_channel(&self, kind: ChannelKind) {
        self.channels[kind.index()].pending_disconnect.store(true, Ordering::Release);
    }

    /// Returns whatever the server has told us about itself so far. `name`
    /// and `uuid` only populate once the corresponding MAIN message has
    /// arrived, which is not guaranteed on every server (spec.md §6).
    pub fn server_info(&self) -> ServerInfo {
        self.server_info.lock().unwrap().clone()
    }

    fn make_extra(&self, kind: ChannelKind) -> ChannelExtra {
        match kind {
            ChannelKind::Main => ChannelExtra::Main(main::MainState::new()),
            ChannelKind::Inputs => ChannelExtra::Inputs(inputs::InputsState::new()),
            ChannelKind::Playback => {
                let has_volume = self.playback_cb.lock().unwrap().as_ref().is_some_and(|cb| cb.volume.is_some());
                ChannelExtra::Playback(playback::PlaybackState::new(has_volume))
            }
            ChannelKind::Record => {
                let has_volume = self.record_cb.lock().unwrap().as_ref().is_some_and(|cb| cb.volume.is_some());
                ChannelExtra::Record(record::RecordState::new(has_volume))
            }
            ChannelKind::Display => ChannelExtra::Display(display::DisplayState::new()),
            ChannelKind::Cursor => ChannelExtra::Cursor(cursor::CursorState::new()),
        }
    }

    async fn open_channel(&self, kind: ChannelKind) -> Result<()> {
        let slot = &self.channels[kind.index()];
        let (read, mut write) = transport::connect(&self.endpoint).await?;

        let mut extra = self.make_extra(kind);
        let mut common_caps = CapSet::new();
        common_caps.set(crate::wire::caps::common::MINI_HEADER);
        common_caps.set(crate::wire::caps::common::AUTH_SPICE);
        let channel_caps = extra.channel_caps();

        let connection_id = if kind == ChannelKind::Main {
            0
        } else {
            self.session_id.load(Ordering::Acquire)
        };
        let handshake_caps = handshake::perform(
            &read,
            &mut write,
            connection_id,
            kind.wire_type(),
            0,
            &self.password,
            &common_caps,
            &channel_caps,
        )
        .await?;
        extra.set_caps(handshake_caps.channel.words());
        if kind == ChannelKind::Main {
            self.main_requires_name_uuid.store(
                handshake_caps.channel.has(crate::wire::caps::main::VM_NAME_UUID),
                Ordering::Release,
            );
        }

        let connect_packet = extra.connect_packet();
        *slot.recv.lock().await = Some(RecvState::new(read, extra));
        *slot.write.lock().await = Some(write);
        slot.connected.store(true, Ordering::Release);

        // MAIN sends ATTACH_CHANNELS only after MAIN_INIT arrives (spec.md
        // §4.4), handled in `dispatch_main`, not here.
        if let Some((msg_type, payload)) = connect_packet {
            let send = SendHandle { write: &slot.write };
            send.send(msg_type, &payload).await?;
        }
        Ok(())
    }

    async fn teardown_channel(&self, kind: ChannelKind, send_farewell: bool) {
        let slot = &self.channels[kind.index()];
        if send_farewell {
            let mut guard = slot.write.lock().await;
            if let Some(write) = guard.as_mut() {
                let _ = write.set_nodelay(true);
                let _ = write.write_all(&header::build_packet(common_msgc::DISCONNECTING, &[])).await;
            }
        }
        if let Some(mut write) = slot.write.lock().await.take() {
            let _ = write.shutdown().await;
        }
        slot.recv.lock().await.take();
        slot.connected.store(false, Ordering::Release);
        slot.ready.store(false, Ordering::Release);
        if kind == ChannelKind::Main {
            self.agent.stop();
        }
    }

    /// `purespice_process`: services deferred disconnects, waits (bounded
    /// by `timeout_ms`) for any connected channel to become readable, then
    /// drains every channel that is currently readable before draining the
    /// agent's outbound queue (spec.md §4.6).
    pub async fn process(&self, timeout_ms: u64) -> Result<ProcessStatus> {
        for kind in ChannelKind::ALL {
            if self.channels[kind.index()].pending_disconnect.swap(false, Ordering::AcqRel) {
                self.teardown_channel(kind, true).await;
            }
        }

        let connected: Vec<ChannelKind> = ChannelKind::ALL
            .into_iter()
            .filter(|k| self.channels[k.index()].is_connected())
            .collect();
        if connected.is_empty() {
            return Ok(ProcessStatus::Shutdown);
        }

        self.wait_for_any_readable(timeout_ms, &connected).await?;

        for kind in &connected {
            if self.channels[kind.index()].is_connected() && self.channel_has_data(*kind).await? {
                self.service_channel_once(*kind).await?;
            }
        }

        if self.channels[ChannelKind::Main.index()].is_connected() {
            let send = SendHandle { write: &self.channels[ChannelKind::Main.index()].write };
            self.drain_agent_queue(&send).await?;
        }

        Ok(ProcessStatus::Run)
    }

    /// Blocks until any of `kinds` has data available or `timeout_ms`
    /// elapses, racing their readiness futures (spec.md §5: "only
    /// suspension points are read/send/poll").
    async fn wait_for_any_readable(&self, timeout_ms: u64, kinds: &[ChannelKind]) -> Result<()> {
        let mut futs: Vec<Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + '_>>> = Vec::new();
        for &kind in kinds {
            let slot = &self.channels[kind.index()];
            futs.push(Box::pin(async move {
                let guard = slot.recv.lock().await;
                match guard.as_ref() {
                    Some(recv) => recv.read.readable().await,
                    None => std::future::pending().await,
                }
            }));
        }
        let raced = futures::future::select_all(futs);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), raced).await {
            Ok((res, _, _)) => res.map_err(Into::into),
            Err(_) => Ok(()),
        }
    }

    async fn channel_has_data(&self, kind: ChannelKind) -> Result<bool> {
        let slot = &self.channels[kind.index()];
        let guard = slot.recv.lock().await;
        let recv = match guard.as_ref() {
            Some(r) => r,
            None => return Ok(false),
        };
        match tokio::time::timeout(Duration::from_millis(0), recv.read.readable()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(false),
        }
    }

    async fn service_channel_once(&self, kind: ChannelKind) -> Result<()> {
        let slot = &self.channels[kind.index()];
        let mut recv_guard = slot.recv.lock().await;
        let recv = match recv_guard.as_mut() {
            Some(r) => r,
            None => return Ok(()),
        };

        let send = SendHandle { write: &slot.write };
        let (header, payload) = match channel::read_one_message(recv, &send).await {
            Ok(v) => v,
            Err(SpiceError::ConnectionClosed) => {
                drop(recv_guard);
                self.teardown_channel(kind, false).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let Some(payload) = payload else {
            return Ok(());
        };

        let mut notify_guard = self.notify_cb.lock().unwrap();
        let notify_fn: Option<&mut dyn FnMut(&str)> = match notify_guard.as_deref_mut() {
            Some(f) => Some(f),
            None => None,
        };
        let common = channel::dispatch_common(kind, header.msg_type, &payload, recv, &send, notify_fn).await?;
        drop(notify_guard);
        if common.is_some() {
            return Ok(());
        }

        match kind {
            ChannelKind::Main => self.dispatch_main(recv, &send, header.msg_type, &payload).await?,
            ChannelKind::Inputs => self.dispatch_inputs(recv, header.msg_type, &payload)?,
            ChannelKind::Playback => self.dispatch_playback(recv, header.msg_type, &payload)?,
            ChannelKind::Record => self.dispatch_record(recv, header.msg_type, &payload)?,
            ChannelKind::Display => self.dispatch_display(recv, header.msg_type, &payload)?,
            ChannelKind::Cursor => self.dispatch_cursor(recv, header.msg_type, &payload)?,
        }
        Ok(())
    }

    fn fire_ready_if_due(&self, recv: &mut RecvState) {
        let requires = self.main_requires_name_uuid.load(Ordering::Acquire);
        let fired = match &mut recv.extra {
            ChannelExtra::Main(state) => state.mark_ready_if_due(requires),
            _ => false,
        };
        if fired {
            self.channels[ChannelKind::Main.index()].ready.store(true, Ordering::Release);
            if let Some(cb) = self.ready_cb.lock().unwrap().as_mut() {
                (cb)();
            }
        }
    }

    async fn dispatch_main(
        &self,
        recv: &mut RecvState,
        send: &SendHandle<'_>,
        msg_type: u16,
        payload: &[u8],
    ) -> Result<()> {
        match msg_type {
            main_msg::INIT => {
                let init = main::parse_init(payload)?;
                if let ChannelExtra::Main(state) = &mut recv.extra {
                    state.session_id = init.session_id;
                }
                self.session_id.store(init.session_id, Ordering::Release);
                self.agent.stop();
                if init.is_agent_connected != 0 {
                    self.agent.start(init.agent_tokens);
                    send.send(main_msgc::AGENT_START, &main::build_agent_start(init.agent_tokens)).await?;
                    self.agent.queue_announce_capabilities(true);
                    self.drain_agent_queue(send).await?;
                }
                if init.current_mouse_mode != mouse_mode::CLIENT {
                    send.send(
                        main_msgc::MOUSE_MODE_REQUEST,
                        &main::build_mouse_mode_request(mouse_mode::CLIENT),
                    )
                    .await?;
                }
                send.send(main_msgc::ATTACH_CHANNELS, &main::build_attach_channels()).await?;
            }
            main_msg::CHANNELS_LIST => {
                let list = main::parse_channels_list(payload)?;
                if let ChannelExtra::Main(state) = &mut recv.extra {
                    state.channels_known = true;
                }
                for (channel_type, _channel_id) in list {
                    let Some(kind) = ChannelKind::from_wire_type(channel_type) else {
                        continue;
                    };
                    if kind == ChannelKind::Main {
                        continue;
                    }
                    let kslot = &self.channels[kind.index()];
                    kslot.available.store(true, Ordering::Release);
                    if kslot.enable.load(Ordering::Acquire)
                        && kslot.autoconnect.load(Ordering::Acquire)
                        && !kslot.is_connected()
                    {
                        self.open_channel(kind).await?;
                    }
                }
                self.fire_ready_if_due(recv);
            }
            main_msg::NAME => {
                let name = main::parse_name(payload)?;
                if let ChannelExtra::Main(state) = &mut recv.extra {
                    state.name = Some(name.clone());
                }
                self.server_info.lock().unwrap().name = Some(name);
                self.fire_ready_if_due(recv);
            }
            main_msg::UUID => {
                let uuid = main::parse_uuid(payload)?;
                if let ChannelExtra::Main(state) = &mut recv.extra {
                    state.uuid = Some(uuid);
                }
                self.server_info.lock().unwrap().uuid = Some(uuid);
                self.fire_ready_if_due(recv);
            }
            main_msg::MOUSE_MODE => {
                trace!("server reported a mouse mode change");
            }
            main_msg::AGENT_CONNECTED => {
                self.agent.start(0);
                send.send(main_msgc::AGENT_START, &main::build_agent_start(0)).await?;
                self.agent.queue_announce_capabilities(true);
                self.drain_agent_queue(send).await?;
            }
            main_msg::AGENT_CONNECTED_TOKENS => {
                let tokens = payload
                    .get(0..4)
                    .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
                    .unwrap_or(0);
                self.agent.start(tokens);
                send.send(main_msgc::AGENT_START, &main::build_agent_start(tokens)).await?;
                self.agent.queue_announce_capabilities(true);
                self.drain_agent_queue(send).await?;
            }
            main_msg::AGENT_DISCONNECTED => {
                self.agent.stop();
            }
            main_msg::AGENT_TOKEN => {
                let n = payload
                    .get(0..4)
                    .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
                    .unwrap_or(0);
                self.agent.add_tokens(n);
                self.drain_agent_queue(send).await?;
            }
            main_msg::AGENT_DATA => {
                self.handle_agent_data(payload)?;
                self.drain_agent_queue(send).await?;
            }
            main_msg::MULTI_MEDIA_TIME | main_msg::MIGRATE_BEGIN | main_msg::MIGRATE_CANCEL => {
                trace!(msg_type, "main message acknowledged but not acted on");
            }
            _ => {
                trace!(msg_type, "unrecognised MAIN message");
            }
        }
        Ok(())
    }

    /// Consumes one `AGENT_DATA` carrier, reassembling the `VDAgentMessage`
    /// header/body split across carriers of at most
    /// `agent::MAX_DATA_SIZE` bytes (spec.md §4.5). Returns after the
    /// message is dispatched or after stashing partial clipboard state —
    /// it never re-reads bytes it has already consumed (spec.md §9, "Open
    /// question — agent-data discard path").
    fn handle_agent_data(&self, payload: &[u8]) -> Result<()> {
        let mut frame_guard = self.agent_frame.lock().unwrap();
        let mut data = payload;
        let is_new_frame = frame_guard.is_none();
        if is_new_frame {
            if data.len() < agent::AGENT_MESSAGE_HEADER_SIZE {
                return Err(SpiceError::Agent("short AGENT_DATA header".into()));
            }
            let mut cursor = std::io::Cursor::new(&data[..agent::AGENT_MESSAGE_HEADER_SIZE]);
            let header = <agent::AgentMessageHeader as binrw::BinRead>::read(&mut cursor)
                .map_err(|e| SpiceError::Agent(format!("bad agent message header: {e}")))?;
            data = &data[agent::AGENT_MESSAGE_HEADER_SIZE..];
            *frame_guard = Some(AgentFrame {
                msg_type: header.msg_type,
                remaining: header.size as usize,
            });
        }
        let frame = frame_guard.as_mut().unwrap();
        let take = data.len().min(frame.remaining);
        let chunk = &data[..take];
        frame.remaining = frame.remaining.saturating_sub(take);
        let msg_type = frame.msg_type;
        let remaining_after = frame.remaining;
        let done = remaining_after == 0;
        if done {
            *frame_guard = None;
        }
        drop(frame_guard);

        match msg_type {
            agent::msg_type::ANNOUNCE_CAPABILITIES => {
                self.agent.handle_announce_capabilities(chunk)?;
            }
            agent::msg_type::CLIPBOARD_GRAB => {
                if let Some(data_type) = self.agent.handle_clipboard_grab(chunk)? {
                    if let Some(cb) = self.clipboard_cb.lock().unwrap().as_mut() {
                        (cb.notice)(data_type);
                    }
                }
            }
            agent::msg_type::CLIPBOARD_RELEASE => {
                self.agent.handle_clipboard_release();
                if let Some(cb) = self.clipboard_cb.lock().unwrap().as_mut() {
                    (cb.release)();
                }
            }
            agent::msg_type::CLIPBOARD_REQUEST => {
                if let Some(bytes) = chunk.get(0..4) {
                    let data_type = ClipboardType::from_agent_type(u32::from_le_bytes(bytes.try_into().unwrap()));
                    if let Some(cb) = self.clipboard_cb.lock().unwrap().as_mut() {
                        (cb.request)(data_type);
                    }
                }
            }
            agent::msg_type::CLIPBOARD => {
                if let Some((data_type, buf)) = self.agent.handle_clipboard_data(chunk)? {
                    // A fresh logical message whose carrier didn't carry the
                    // whole body: stash what arrived and the byte count
                    // still owed (the raw AgentMessageHeader.size tail, not
                    // yet reduced by the 4-byte type prefix already
                    // stripped into `buf`) for the next carrier(s) to
                    // complete (spec.md §4.5, §8 chunked-clipboard scenario).
                    if is_new_frame && !done {
                        self.agent.begin_reassembly(data_type, buf, remaining_after);
                    } else if let Some(cb) = self.clipboard_cb.lock().unwrap().as_mut() {
                        (cb.data)(data_type, buf);
                    }
                }
            }
            _ => {
                trace!(msg_type, "unrecognised agent message");
            }
        }
        Ok(())
    }

    async fn drain_agent_queue(&self, send: &SendHandle<'_>) -> Result<()> {
        let carriers = self.agent.take_ready_carriers();
        if carriers.is_empty() {
            return Ok(());
        }
        let packets: Vec<(u16, Vec<u8>)> = carriers
            .into_iter()
            .map(|c| (main_msgc::AGENT_DATA, c))
            .collect();
        send.send_burst(&packets).await
    }

    fn dispatch_inputs(&self, recv: &mut RecvState, msg_type: u16, payload: &[u8]) -> Result<()> {
        let ChannelExtra::Inputs(state) = &mut recv.extra else {
            return Ok(());
        };
        match msg_type {
            crate::wire::inputs_msg::INIT => {
                state.key_modifiers = inputs::parse_key_modifiers(payload)?;
                state.init_done = true;
            }
            crate::wire::inputs_msg::KEY_MODIFIERS => {
                state.key_modifiers = inputs::parse_key_modifiers(payload)?;
            }
            crate::wire::inputs_msg::MOUSE_MOTION_ACK => {
                self.mouse.record_motion_ack()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch_playback(&self, recv: &mut RecvState, msg_type: u16, payload: &[u8]) -> Result<()> {
        let ChannelExtra::Playback(state) = &mut recv.extra else {
            return Ok(());
        };
        match msg_type {
            playback_msg::START => {
                let info = playback::parse_start(payload)?;
                state.started = true;
                if let Some(cb) = self.playback_cb.lock().unwrap().as_mut() {
                    (cb.start)(info.channels, info.frequency, info.format);
                }
            }
            playback_msg::STOP => {
                state.started = false;
                if let Some(cb) = self.playback_cb.lock().unwrap().as_mut() {
                    (cb.stop)();
                }
            }
            playback_msg::DATA => {
                let data = playback::parse_data(payload)?;
                if let Some(cb) = self.playback_cb.lock().unwrap().as_mut() {
                    (cb.data)(data);
                }
            }
            playback_msg::VOLUME => {
                let vols = playback::parse_volume(payload)?;
                if let Some(cb) = self.playback_cb.lock().unwrap().as_mut() {
                    if let Some(volume) = cb.volume.as_mut() {
                        volume(&vols);
                    }
                }
            }
            playback_msg::MUTE => {
                let muted = playback::parse_mute(payload)?;
                if let Some(cb) = self.playback_cb.lock().unwrap().as_mut() {
                    if let Some(mute) = cb.mute.as_mut() {
                        mute(muted);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch_record(&self, recv: &mut RecvState, msg_type: u16, payload: &[u8]) -> Result<()> {
        let ChannelExtra::Record(state) = &mut recv.extra else {
            return Ok(());
        };
        match msg_type {
            record_msg::START => {
                let info = record::parse_start(payload)?;
                state.started = true;
                if let Some(cb) = self.record_cb.lock().unwrap().as_mut() {
                    (cb.start)(info.channels, info.frequency, info.format);
                }
            }
            record_msg::STOP => {
                state.started = false;
                if let Some(cb) = self.record_cb.lock().unwrap().as_mut() {
                    (cb.stop)();
                }
            }
            record_msg::VOLUME => {
                let vols = record::parse_volume(payload)?;
                if let Some(cb) = self.record_cb.lock().unwrap().as_mut() {
                    if let Some(volume) = cb.volume.as_mut() {
                        volume(&vols);
                    }
                }
            }
            record_msg::MUTE => {
                let muted = record::parse_mute(payload)?;
                if let Some(cb) = self.record_cb.lock().unwrap().as_mut() {
                    if let Some(mute) = cb.mute.as_mut() {
                        mute(muted);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch_display(&self, _recv: &mut RecvState, msg_type: u16, payload: &[u8]) -> Result<()> {
        match msg_type {
            display_msg::SURFACE_CREATE => {
                let s = display::parse_surface_create(payload)?;
                if let Some(cb) = self.display_cb.lock().unwrap().as_mut() {
                    (cb.surface_create)(s.surface_id, s.format, s.width, s.height);
                }
            }
            display_msg::SURFACE_DESTROY => {
                let id = display::parse_surface_destroy(payload)?;
                if let Some(cb) = self.display_cb.lock().unwrap().as_mut() {
                    (cb.surface_destroy)(id);
                }
            }
            display_msg::DRAW_FILL => match display::parse_draw_fill(payload)? {
                Some(fill) => {
                    if let Some(cb) = self.display_cb.lock().unwrap().as_mut() {
                        (cb.draw_fill)(fill.surface_id, fill.x, fill.y, fill.width, fill.height, fill.color);
                    }
                }
                None => trace!("DRAW_FILL with a non-solid brush ignored"),
            },
            display_msg::DRAW_COPY => match display::parse_draw_copy(payload)? {
                Some(bmp) => {
                    if let Some(cb) = self.display_cb.lock().unwrap().as_mut() {
                        (cb.draw_bitmap)(DrawBitmap {
                            surface: bmp.surface_id,
                            format: bmp.format,
                            top_down: bmp.top_down,
                            x: bmp.x,
                            y: bmp.y,
                            width: bmp.width,
                            height: bmp.height,
                            stride: bmp.stride,
                            data: &bmp.data,
                        });
                    }
                }
                None => trace!("DRAW_COPY with a compressed or unsupported image ignored"),
            },
            display_msg::MODE
            | display_msg::MARK
            | display_msg::RESET
            | display_msg::COPY_BITS
            | display_msg::MONITORS_CONFIG => {
                trace!(msg_type, "display message acknowledged but not rendered");
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch_cursor(&self, recv: &mut RecvState, msg_type: u16, payload: &[u8]) -> Result<()> {
        let ChannelExtra::Cursor(state) = &mut recv.extra else {
            return Ok(());
        };
        match msg_type {
            cursor_msg::INIT | cursor_msg::SET => match cursor::resolve_cursor(state, payload)? {
                Some(shape) => {
                    state.visible = true;
                    if let Some(cb) = self.cursor_cb.lock().unwrap().as_mut() {
                        (cb.set)(&shape);
                    }
                }
                None => {
                    // Also hides on a FROM_CACHE miss; kept per spec.md §9's
                    // open question rather than distinguishing the cases.
                    state.visible = false;
                    if let Some(cb) = self.cursor_cb.lock().unwrap().as_mut() {
                        (cb.hide)();
                    }
                }
            },
            cursor_msg::RESET => state.reset(),
            cursor_msg::MOVE => {
                let (x, y) = cursor::parse_move(payload)?;
                if let Some(cb) = self.cursor_cb.lock().unwrap().as_mut() {
                    (cb.move_to)(x, y);
                }
            }
            cursor_msg::HIDE => {
                state.visible = false;
                if let Some(cb) = self.cursor_cb.lock().unwrap().as_mut() {
                    (cb.hide)();
                }
            }
            cursor_msg::TRAIL => {
                let (length, frequency) = cursor::parse_trail(payload)?;
                if let Some(cb) = self.cursor_cb.lock().unwrap().as_mut() {
                    (cb.trail)(length, frequency);
                }
            }
            cursor_msg::INVAL_ONE => {
                let id = cursor::parse_inval_one(payload)?;
                state.invalidate_one(id);
            }
            cursor_msg::INVAL_ALL => state.invalidate_all(),
            _ => {}
        }
        Ok(())
    }

    async fn send_on(&self, kind: ChannelKind, msg_type: u16, payload: Vec<u8>) -> Result<()> {
        let slot = &self.channels[kind.index()];
        if !slot.is_connected() {
            return Err(SpiceError::NotConnected(format!("{kind:?}")));
        }
        let send = SendHandle { write: &slot.write };
        send.send(msg_type, &payload).await
    }

    pub async fn key_down(&self, code: u32) -> Result<()> {
        let (msg_type, payload) = inputs::build_key_down(code);
        self.send_on(ChannelKind::Inputs, msg_type, payload).await
    }

    pub async fn key_up(&self, code: u32) -> Result<()> {
        let (msg_type, payload) = inputs::build_key_up(code);
        self.send_on(ChannelKind::Inputs, msg_type, payload).await
    }

    pub async fn key_modifiers(&self, mask: u16) -> Result<()> {
        self.send_on(ChannelKind::Inputs, inputs_msgc::KEY_MODIFIERS, inputs::build_key_modifiers(mask))
            .await
    }

    pub async fn mouse_mode(&self, server: bool) -> Result<()> {
        let mode = if server { mouse_mode::SERVER } else { mouse_mode::CLIENT };
        self.send_on(ChannelKind::Main, main_msgc::MOUSE_MODE_REQUEST, main::build_mouse_mode_request(mode))
            .await
    }

    pub async fn mouse_position(&self, x: u32, y: u32) -> Result<()> {
        let buttons = self.mouse.buttons() as u32;
        self.send_on(ChannelKind::Inputs, inputs_msgc::MOUSE_POSITION, inputs::build_mouse_position(x, y, buttons))
            .await
    }

    /// Splits `(dx, dy)` into ≤127-bounded sub-packets and sends them as
    /// one atomic burst (spec.md §4.4, §5).
    pub async fn mouse_motion(&self, dx: i32, dy: i32) -> Result<()> {
        let slot = &self.channels[ChannelKind::Inputs.index()];
        if !slot.is_connected() {
            return Err(SpiceError::NotConnected("Inputs".into()));
        }
        let buttons = self.mouse.buttons() as u32;
        let burst = inputs::build_mouse_motion_burst(dx, dy, buttons);
        let count = burst.len() as i32;
        let send = SendHandle { write: &slot.write };
        send.send_burst(&burst).await?;
        self.mouse.record_motion_sent(count);
        Ok(())
    }

    pub async fn mouse_press(&self, button: MouseButton) -> Result<()> {
        let mask = self.mouse.press(button);
        let (msg_type, payload) = inputs::build_mouse_press(button.bit(), mask);
        self.send_on(ChannelKind::Inputs, msg_type, payload).await
    }

    pub async fn mouse_release(&self, button: MouseButton) -> Result<()> {
        let mask = self.mouse.release(button);
        let (msg_type, payload) = inputs::build_mouse_release(button.bit(), mask);
        self.send_on(ChannelKind::Inputs, msg_type, payload).await
    }

    /// Advertises clipboard types this client can provide; queued for the
    /// next `process` tick that has agent tokens available.
    pub fn clipboard_grab(&self, types: &[ClipboardType]) {
        self.agent.clipboard_grab(types);
    }

    pub fn clipboard_release(&self) {
        self.agent.clipboard_release();
    }

    pub fn clipboard_request(&self, data_type: ClipboardType) -> Result<()> {
        self.agent.clipboard_request(data_type)
    }

    pub fn clipboard_data_start(&self, data_type: ClipboardType, size: u32) {
        self.agent.clipboard_data_start(data_type, size);
    }

    pub fn clipboard_data(&self, data: &[u8]) -> Result<()> {
        self.agent.clipboard_data(data)
    }

    pub async fn write_audio(&self, data: &[u8], time: u32) -> Result<()> {
        let (msg_type, payload) = record::build_write_audio(data, time);
        self.send_on(ChannelKind::Record, msg_type, payload).await
    }
}

fn store_option(channels: &[ChannelSlot; 6], kind: ChannelKind, enable: bool, autoconnect: bool) {
    channels[kind.index()].enable.store(enable, Ordering::Release);
    channels[kind.index()].autoconnect.store(autoconnect, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_status_variants_are_distinct() {
        assert_ne!(ProcessStatus::Run, ProcessStatus::Shutdown);
    }

    #[test]
    fn store_option_sets_both_flags_independently() {
        let channels = [
            ChannelSlot::new(ChannelKind::Main),
            ChannelSlot::new(ChannelKind::Inputs),
            ChannelSlot::new(ChannelKind::Playback),
            ChannelSlot::new(ChannelKind::Record),
            ChannelSlot::new(ChannelKind::Display),
            ChannelSlot::new(ChannelKind::Cursor),
        ];
        store_option(&channels, ChannelKind::Playback, true, false);
        let slot = &channels[ChannelKind::Playback.index()];
        assert!(slot.enable.load(Ordering::Acquire));
        assert!(!slot.autoconnect.load(Ordering::Acquire));
    }

    #[test]
    fn server_info_starts_empty() {
        let info = ServerInfo::default();
        assert!(info.name.is_none());
        assert!(info.uuid.is_none());
    }

    #[tokio::test]
    async fn connect_rejects_invalid_configuration() {
        let config = SessionConfig::new("not-an-ip", 5900);
        let result = Session::connect(config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_fails_fast_when_nothing_listens() {
        // Port 0 on an already-bound loopback listener is unreachable by
        // construction; grab an ephemeral port and drop the listener so
        // nothing is bound there by the time we try to connect.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let config = SessionConfig::new("127.0.0.1", port);
        let result = Session::connect(config).await;
        assert!(result.is_err());
    }
}
