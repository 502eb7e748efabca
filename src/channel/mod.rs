//! Channel runtime (spec.md §4.3) and the polymorphic per-kind dispatch
//! table (spec.md §4.4, §9 "Polymorphic channel table vs. virtual calls"):
//! each [`ChannelKind`] is a tagged variant with its own connect-packet
//! builder and message handler, driven by one shared read/dispatch loop.

pub mod cursor;
pub mod display;
pub mod handshake;
pub mod inputs;
pub mod main;
pub mod playback;
pub mod record;

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace, warn};

use crate::error::{HandlerOutcome, Result, SpiceError};
use crate::transport::{ReadHalf, WriteHalf};
use crate::wire::caps::CapSet;
use crate::wire::header::{build_packet, MiniHeader, HEADER_SIZE};
use crate::wire::{channel_type, common_msg, common_msgc};

/// The closed set of logical channel kinds (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Main,
    Inputs,
    Playback,
    Record,
    Display,
    Cursor,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 6] = [
        ChannelKind::Main,
        ChannelKind::Inputs,
        ChannelKind::Playback,
        ChannelKind::Record,
        ChannelKind::Display,
        ChannelKind::Cursor,
    ];

    pub fn index(self) -> usize {
        match self {
            ChannelKind::Main => 0,
            ChannelKind::Inputs => 1,
            ChannelKind::Playback => 2,
            ChannelKind::Record => 3,
            ChannelKind::Display => 4,
            ChannelKind::Cursor => 5,
        }
    }

    pub fn wire_type(self) -> u8 {
        match self {
            ChannelKind::Main => channel_type::MAIN,
            ChannelKind::Inputs => channel_type::INPUTS,
            ChannelKind::Playback => channel_type::PLAYBACK,
            ChannelKind::Record => channel_type::RECORD,
            ChannelKind::Display => channel_type::DISPLAY,
            ChannelKind::Cursor => channel_type::CURSOR,
        }
    }

    pub fn from_wire_type(code: u8) -> Option<Self> {
        ChannelKind::ALL.into_iter().find(|k| k.wire_type() == code)
    }
}

/// Per-kind channel state, the tagged-variant side of the dispatch table.
pub enum ChannelExtra {
    Main(main::MainState),
    Inputs(inputs::InputsState),
    Playback(playback::PlaybackState),
    Record(record::RecordState),
    Display(display::DisplayState),
    Cursor(cursor::CursorState),
}

impl ChannelExtra {
    /// `getConnectPacket()`: the channel-specific payload sent immediately
    /// after a successful link handshake, if any.
    pub fn connect_packet(&self) -> Option<(u16, Vec<u8>)> {
        match self {
            ChannelExtra::Display(s) => Some(display::connect_packet(s)),
            _ => None,
        }
    }

    /// `setCaps()`: lets a channel inspect the server's negotiated
    /// capabilities right after the handshake.
    pub fn set_caps(&mut self, channel_caps: &[u32]) {
        if let ChannelExtra::Display(s) = self {
            display::set_caps(s, channel_caps);
        }
    }

    /// Additional capabilities this client advertises for its own kind
    /// beyond the common set (spec.md §4.1).
    pub fn channel_caps(&self) -> CapSet {
        match self {
            ChannelExtra::Display(_) => {
                let mut caps = CapSet::new();
                caps.set(crate::wire::caps::display::PREF_COMPRESSION);
                caps
            }
            ChannelExtra::Playback(s) => {
                let mut caps = CapSet::new();
                if s.has_volume_callback {
                    caps.set(crate::wire::caps::playback::VOLUME);
                }
                caps
            }
            ChannelExtra::Record(s) => {
                let mut caps = CapSet::new();
                if s.has_volume_callback {
                    caps.set(crate::wire::caps::record::VOLUME);
                }
                caps
            }
            _ => CapSet::new(),
        }
    }
}

/// Per-channel receive-side state: header/payload buffers, ack window,
/// and the kind-specific dispatch state. Exclusively owned by whichever
/// call (`process`, `connect_channel`) currently holds the channel's
/// `recv` lock (spec.md §3).
pub struct RecvState {
    pub read: ReadHalf,
    header_buf: [u8; HEADER_SIZE],
    payload_buf: Vec<u8>,
    ack_window: u32,
    ack_count: u32,
    pub extra: ChannelExtra,
}

impl RecvState {
    pub fn new(read: ReadHalf, extra: ChannelExtra) -> Self {
        Self {
            read,
            header_buf: [0; HEADER_SIZE],
            payload_buf: Vec::new(),
            ack_window: 0,
            ack_count: 0,
            extra,
        }
    }
}

/// One channel slot inside the session: the send half (shared, lockable
/// from any task) plus the receive half (exclusively driven by `process`).
pub struct ChannelSlot {
    pub kind: ChannelKind,
    pub write: AsyncMutex<Option<WriteHalf>>,
    pub recv: AsyncMutex<Option<RecvState>>,
    pub connected: AtomicBool,
    pub ready: AtomicBool,
    pub available: AtomicBool,
    pub pending_disconnect: AtomicBool,
    pub enable: AtomicBool,
    pub autoconnect: AtomicBool,
}

impl ChannelSlot {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            write: AsyncMutex::new(None),
            recv: AsyncMutex::new(None),
            connected: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            available: AtomicBool::new(false),
            pending_disconnect: AtomicBool::new(false),
            enable: AtomicBool::new(false),
            autoconnect: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Non-blocking fill of `buf`, re-awaiting readiness on `WouldBlock`
/// (spec.md §4.3: the socket is read in bounded, length-known chunks).
pub async fn fill_exact(read: &ReadHalf, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match read.try_read(&mut buf[filled..]) {
            Ok(0) => return Err(SpiceError::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                read.readable().await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Discards exactly `size` bytes without materialising them
/// (spec.md §3 invariant: `discarding ⇒ bufferRead == 0`).
pub async fn discard_exact(read: &ReadHalf, mut size: usize) -> Result<()> {
    let mut scratch = [0u8; 4096];
    while size > 0 {
        let chunk = size.min(scratch.len());
        fill_exact(read, &mut scratch[..chunk]).await?;
        size -= chunk;
    }
    Ok(())
}

/// The common message handler shared by every channel (spec.md §4.3):
/// `SET_ACK` stores the window and replies `ACK_SYNC`; `PING` replies
/// `PONG`; `DISCONNECTING` tears the channel down; `NOTIFY` logs.
/// `MIGRATE`/`MIGRATE_DATA`/`WAIT_FOR_CHANNELS` never reach here — their
/// payload is discarded straight off the wire by [`read_one_message`]
/// before this function is even called.
///
/// Returns `Some(outcome)` if the message type was a common one (in which
/// case the channel-specific handler is not consulted), or `None` if the
/// caller should dispatch to the channel's own handler.
pub async fn dispatch_common<'a>(
    kind: ChannelKind,
    msg_type: u16,
    payload: &[u8],
    recv: &mut RecvState,
    send: &SendHandle<'a>,
    notify: Option<&mut dyn FnMut(&str)>,
) -> Result<Option<HandlerOutcome>> {
    match msg_type {
        common_msg::SET_ACK => {
            if payload.len() < 8 {
                return Err(SpiceError::Protocol("short SET_ACK message".into()));
            }
            let generation = u32::from_le_bytes(payload[0..4].try_into().unwrap());
            let window = u32::from_le_bytes(payload[4..8].try_into().unwrap());
            recv.ack_window = window;
            recv.ack_count = 0;
            send.send(common_msgc::ACK_SYNC, &generation.to_le_bytes())
                .await?;
            Ok(Some(HandlerOutcome::Ok))
        }
        common_msg::PING => {
            if payload.len() < 12 {
                return Err(SpiceError::Protocol("short PING message".into()));
            }
            let id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
            let timestamp = u64::from_le_bytes(payload[4..12].try_into().unwrap());
            let mut pong = Vec::with_capacity(12);
            pong.extend_from_slice(&id.to_le_bytes());
            pong.extend_from_slice(&timestamp.to_le_bytes());
            send.send(common_msgc::PONG, &pong).await?;
            Ok(Some(HandlerOutcome::Ok))
        }
        common_msg::DISCONNECTING => {
            debug!(?kind, "peer sent DISCONNECTING");
            Ok(Some(HandlerOutcome::NoData))
        }
        common_msg::NOTIFY => {
            if let Some(notify) = notify {
                let text = String::from_utf8_lossy(payload);
                notify(&text);
            } else {
                warn!(?kind, "NOTIFY: {}", String::from_utf8_lossy(payload));
            }
            Ok(Some(HandlerOutcome::Ok))
        }
        _ if msg_type < common_msg::BASE_LAST => {
            trace!(?kind, msg_type, "ignoring unrecognised common message");
            Ok(Some(HandlerOutcome::NoData))
        }
        _ => Ok(None),
    }
}

/// Applies the ack-credit discipline after a header has been read
/// (spec.md §4.3, "Ack credit"): increments a local counter and, once it
/// reaches the server's window, emits a one-byte ack and resets.
pub async fn apply_ack_credit<'a>(recv: &mut RecvState, send: &SendHandle<'a>) -> Result<()> {
    if recv.ack_window == 0 {
        return Ok(());
    }
    recv.ack_count += 1;
    if recv.ack_count >= recv.ack_window {
        recv.ack_count = 0;
        send.send(common_msgc::ACK, &[0u8]).await?;
    }
    Ok(())
}

/// A handle bound to one channel's write lock, letting handlers reply
/// on "their" channel without threading the whole session object through.
pub struct SendHandle<'a> {
    pub write: &'a AsyncMutex<Option<WriteHalf>>,
}

impl<'a> SendHandle<'a> {
    pub async fn send(&self, msg_type: u16, payload: &[u8]) -> Result<()> {
        let mut guard = self.write.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| SpiceError::ConnectionClosed)?;
        writer.write_all(&build_packet(msg_type, payload)).await?;
        Ok(())
    }

    /// Sends several sub-packets as one atomic write (spec.md §4.4
    /// mouse-motion packetisation: "packed into one scratch buffer and
    /// emitted in a single socket write").
    pub async fn send_burst(&self, packets: &[(u16, Vec<u8>)]) -> Result<()> {
        let mut buf = Vec::new();
        for (msg_type, payload) in packets {
            buf.extend_from_slice(&build_packet(*msg_type, payload));
        }
        let mut guard = self.write.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| SpiceError::ConnectionClosed)?;
        writer.write_all(&buf).await?;
        Ok(())
    }
}

/// Reads exactly one message from `recv` (spec.md §4.3 steps 1-2):
/// header first, then the ack-credit counter is advanced (credit is owed
/// for every message header read, handled or not), then the payload is
/// either discarded raw off the wire — for `MIGRATE`/`MIGRATE_DATA`/
/// `WAIT_FOR_CHANNELS`, which this engine never acts on — or materialised
/// into a buffer for the caller to dispatch.
pub async fn read_one_message<'a>(
    recv: &mut RecvState,
    send: &SendHandle<'a>,
) -> Result<(MiniHeader, Option<Vec<u8>>)> {
    fill_exact(&recv.read, &mut recv.header_buf).await?;
    let header = MiniHeader::from_bytes(&recv.header_buf);

    apply_ack_credit(recv, send).await?;

    let discard = matches!(
        header.msg_type,
        common_msg::MIGRATE | common_msg::MIGRATE_DATA | common_msg::WAIT_FOR_CHANNELS
    );
    if discard {
        trace!(msg_type = header.msg_type, size = header.size, "discarding migrate/wait message");
        discard_exact(&recv.read, header.size as usize).await?;
        return Ok((header, None));
    }

    recv.payload_buf.resize(header.size as usize, 0);
    fill_exact(&recv.read, &mut recv.payload_buf).await?;
    let payload = std::mem::take(&mut recv.payload_buf);
    Ok((header, Some(payload)))
}
