//! The guest-agent sub-protocol, tunnelled over `MAIN_AGENT_DATA` messages
//! (spec.md §4.5): token-gated outbound queue, capability exchange, and
//! clipboard grab/request/data/release.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use binrw::{BinRead, BinWrite};

use crate::error::{Result, SpiceError};

/// Maximum payload bytes carried by a single `MAIN_AGENT_DATA` message
/// (spec.md §4.5).
pub const MAX_DATA_SIZE: usize = 2048;

/// Agent message types (mirrors the VDAgent wire protocol this core
/// tunnels).
pub mod msg_type {
    pub const ANNOUNCE_CAPABILITIES: u32 = 1;
    pub const CLIPBOARD: u32 = 2;
    pub const CLIPBOARD_GRAB: u32 = 3;
    pub const CLIPBOARD_REQUEST: u32 = 4;
    pub const CLIPBOARD_RELEASE: u32 = 5;
}

/// Agent capability bits announced/received via `ANNOUNCE_CAPABILITIES`.
pub mod cap {
    pub const CLIPBOARD_BY_DEMAND: u32 = 0;
    pub const CLIPBOARD_SELECTION: u32 = 1;
}

/// Public clipboard data-type enum (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardType {
    Text,
    Png,
    Bmp,
    Tiff,
    Jpeg,
    None,
}

/// Wire agent-type codes, translated to/from [`ClipboardType`].
mod agent_type {
    pub const NONE: u32 = 0;
    pub const UTF8_TEXT: u32 = 1;
    pub const PNG: u32 = 2;
    pub const BMP: u32 = 3;
    pub const TIFF: u32 = 4;
    pub const JPEG: u32 = 5;
}

impl ClipboardType {
    pub fn from_agent_type(value: u32) -> Self {
        match value {
            agent_type::UTF8_TEXT => ClipboardType::Text,
            agent_type::PNG => ClipboardType::Png,
            agent_type::BMP => ClipboardType::Bmp,
            agent_type::TIFF => ClipboardType::Tiff,
            agent_type::JPEG => ClipboardType::Jpeg,
            _ => ClipboardType::None,
        }
    }

    pub fn to_agent_type(self) -> u32 {
        match self {
            ClipboardType::Text => agent_type::UTF8_TEXT,
            ClipboardType::Png => agent_type::PNG,
            ClipboardType::Bmp => agent_type::BMP,
            ClipboardType::Tiff => agent_type::TIFF,
            ClipboardType::Jpeg => agent_type::JPEG,
            ClipboardType::None => agent_type::NONE,
        }
    }
}

/// The `VDAgentMessage` header prefixing each logical agent message
/// (spec.md §4.5: "protocol=1, a type, an opaque (unused), and a total
/// size").
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct AgentMessageHeader {
    pub protocol: u32,
    pub msg_type: u32,
    pub opaque: u64,
    pub size: u32,
}

pub const AGENT_MESSAGE_HEADER_SIZE: usize = 20;
const AGENT_PROTOCOL: u32 = 1;

/// A 4-byte selection header (selection code + 3 reserved bytes), prepended
/// to grab/clipboard messages when both sides support selections
/// (spec.md §4.5).
fn selection_header(selection: u8) -> [u8; 4] {
    [selection, 0, 0, 0]
}

struct Reassembly {
    data_type: ClipboardType,
    buffer: Vec<u8>,
    remain: usize,
}

/// Outbound clipboard transmission in progress, started by
/// `clipboard_data_start` and appended to by `clipboard_data` until `sent`
/// reaches the declared `total` (spec.md §4.5).
struct PendingSend {
    data_type: ClipboardType,
    total: usize,
    buffer: Vec<u8>,
}

struct ClipboardState {
    agent_grabbed: bool,
    client_grabbed: bool,
    current_type: ClipboardType,
    supports_by_demand: bool,
    supports_selection: bool,
    reassembly: Option<Reassembly>,
    pending_send: Option<PendingSend>,
}

impl ClipboardState {
    fn new() -> Self {
        Self {
            agent_grabbed: false,
            client_grabbed: false,
            current_type: ClipboardType::None,
            supports_by_demand: false,
            supports_selection: false,
            reassembly: None,
            pending_send: None,
        }
    }
}

/// Agent state: present flag, outbound FIFO queue of raw carrier bytes,
/// token credit counter, and clipboard sub-state (spec.md §3).
pub struct AgentState {
    present: AtomicBool,
    tokens: AtomicU32,
    queue: Mutex<VecDeque<Vec<u8>>>,
    clipboard: Mutex<ClipboardState>,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            present: AtomicBool::new(false),
            tokens: AtomicU32::new(0),
            queue: Mutex::new(VecDeque::new()),
            clipboard: Mutex::new(ClipboardState::new()),
        }
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    /// (Re-)starts the agent with an initial token count, clearing any
    /// leftover clipboard state from a prior agent instance (spec.md §3:
    /// "re-creatable within the same session").
    pub fn start(&self, initial_tokens: u32) {
        self.present.store(true, Ordering::Release);
        self.tokens.store(initial_tokens, Ordering::Release);
        self.queue.lock().unwrap().clear();
        *self.clipboard.lock().unwrap() = ClipboardState::new();
    }

    pub fn stop(&self) {
        self.present.store(false, Ordering::Release);
        self.queue.lock().unwrap().clear();
    }

    pub fn add_tokens(&self, n: u32) {
        self.tokens.fetch_add(n, Ordering::AcqRel);
    }

    fn take_token(&self) -> bool {
        self.tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                if t > 0 {
                    Some(t - 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn enqueue_raw(&self, carrier: Vec<u8>) {
        self.queue.lock().unwrap().push_back(carrier);
    }

    /// Splits a logical agent message (header + payload) into ≤
    /// [`MAX_DATA_SIZE`]-byte carriers and appends them to the outbound
    /// queue in order.
    fn enqueue_message(&self, msg_type: u32, payload: &[u8]) {
        let mut full = Vec::with_capacity(AGENT_MESSAGE_HEADER_SIZE + payload.len());
        let mut cursor = std::io::Cursor::new(Vec::new());
        AgentMessageHeader {
            protocol: AGENT_PROTOCOL,
            msg_type,
            opaque: 0,
            size: payload.len() as u32,
        }
        .write(&mut cursor)
        .expect("agent header is fixed-size and always serializable");
        full.extend_from_slice(&cursor.into_inner());
        full.extend_from_slice(payload);

        for chunk in full.chunks(MAX_DATA_SIZE) {
            self.enqueue_raw(chunk.to_vec());
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Pops as many queued carriers as tokens allow, in FIFO order, each
    /// one consuming exactly one token via atomic compare-and-swap
    /// (spec.md §4.5). The caller is expected to send them all while
    /// holding the main channel's send lock, so the whole burst is atomic
    /// with respect to other main-channel writes (spec.md §5). Returns an
    /// empty vec when the queue is empty or no tokens are available —
    /// these are not distinguished, matching spec.md's "stopping when
    /// tokens reach zero or the queue empties".
    pub fn take_ready_carriers(&self) -> Vec<Vec<u8>> {
        let mut ready = Vec::new();
        loop {
            if !self.take_token() {
                break;
            }
            let mut queue = self.queue.lock().unwrap();
            match queue.pop_front() {
                Some(carrier) => {
                    drop(queue);
                    ready.push(carrier);
                }
                None => {
                    drop(queue);
                    // Took a token but had nothing to send; give it back.
                    self.add_tokens(1);
                    break;
                }
            }
        }
        ready
    }

    /// Queues the capability-announcement handshake (spec.md §4.5): a
    /// `ClipboardByDemand`/`ClipboardSelection` announcement with the given
    /// `request` flag.
    pub fn queue_announce_capabilities(&self, request: bool) {
        let mut caps = crate::wire::caps::CapSet::new();
        caps.set(cap::CLIPBOARD_BY_DEMAND);
        caps.set(cap::CLIPBOARD_SELECTION);
        let mut payload = Vec::new();
        payload.extend_from_slice(&(request as u32).to_le_bytes());
        payload.extend_from_slice(&caps.to_le_bytes());
        self.enqueue_message(msg_type::ANNOUNCE_CAPABILITIES, &payload);
    }

    /// Records the server's announced capabilities and, if the server
    /// requested a reply (`request=1`), queues this client's own
    /// capabilities with `request=0` (spec.md §4.5).
    pub fn handle_announce_capabilities(&self, payload: &[u8]) -> Result<()> {
        if payload.len() < 4 {
            return Err(SpiceError::Agent("short ANNOUNCE_CAPABILITIES".into()));
        }
        let request = u32::from_le_bytes(payload[0..4].try_into().unwrap()) != 0;
        let caps = crate::wire::caps::CapSet::from_words(
            payload[4..]
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        );
        {
            let mut clip = self.clipboard.lock().unwrap();
            clip.supports_by_demand = caps.has(cap::CLIPBOARD_BY_DEMAND);
            clip.supports_selection = caps.has(cap::CLIPBOARD_SELECTION);
        }
        if request {
            self.queue_announce_capabilities(false);
        }
        Ok(())
    }

    fn supports_selection(&self) -> bool {
        self.clipboard.lock().unwrap().supports_selection
    }

    /// Client-side clipboard grab: advertises the types this client can
    /// provide (spec.md §4.5).
    pub fn clipboard_grab(&self, types: &[ClipboardType]) {
        self.clipboard.lock().unwrap().client_grabbed = true;
        let mut payload = Vec::new();
        if self.supports_selection() {
            payload.extend_from_slice(&selection_header(0));
        }
        for t in types {
            payload.extend_from_slice(&t.to_agent_type().to_le_bytes());
        }
        self.enqueue_message(msg_type::CLIPBOARD_GRAB, &payload);
    }

    /// No-op unless the client currently owns the clipboard
    /// (spec.md §4.5).
    pub fn clipboard_release(&self) {
        let mut clip = self.clipboard.lock().unwrap();
        if !clip.client_grabbed {
            return;
        }
        clip.client_grabbed = false;
        drop(clip);
        self.enqueue_message(msg_type::CLIPBOARD_RELEASE, &[]);
    }

    /// Requests clipboard data of `data_type`, which must match the type
    /// most recently advertised by a server grab.
    pub fn clipboard_request(&self, data_type: ClipboardType) -> Result<()> {
        let clip = self.clipboard.lock().unwrap();
        if !clip.agent_grabbed {
            return Err(SpiceError::Agent(
                "clipboard_request with no outstanding agent grab".into(),
            ));
        }
        if clip.current_type != data_type {
            return Err(SpiceError::Agent(format!(
                "clipboard_request type mismatch: requested {data_type:?}, advertised {:?}",
                clip.current_type
            )));
        }
        drop(clip);
        self.enqueue_message(msg_type::CLIPBOARD_REQUEST, &data_type.to_agent_type().to_le_bytes());
        Ok(())
    }

    /// Handles an inbound `CLIPBOARD_GRAB`: server-side claims ownership
    /// and advertises a type list. Only the first type is retained
    /// (spec.md §9, Open Question: "pragmatic simplification").
    pub fn handle_clipboard_grab(&self, mut payload: &[u8]) -> Result<Option<ClipboardType>> {
        if self.supports_selection() && payload.len() >= 4 {
            payload = &payload[4..];
        }
        if payload.len() < 4 {
            return Ok(None);
        }
        let first = u32::from_le_bytes(payload[0..4].try_into().unwrap());
        let data_type = ClipboardType::from_agent_type(first);
        let mut clip = self.clipboard.lock().unwrap();
        clip.agent_grabbed = true;
        clip.current_type = data_type;
        Ok(Some(data_type))
    }

    pub fn handle_clipboard_release(&self) {
        let mut clip = self.clipboard.lock().unwrap();
        clip.agent_grabbed = false;
        clip.current_type = ClipboardType::None;
    }

    /// Handles an inbound `CLIPBOARD` carrier chunk, reassembling the
    /// logical payload and returning it once complete (spec.md §4.5,
    /// invariant in spec.md §3: `cbBuffer != null ⇔ cbRemain + cbSize >
    /// 0`).
    pub fn handle_clipboard_data(&self, payload: &[u8]) -> Result<Option<(ClipboardType, Vec<u8>)>> {
        let mut clip = self.clipboard.lock().unwrap();
        if let Some(reassembly) = clip.reassembly.as_mut() {
            let take = payload.len().min(reassembly.remain);
            reassembly.buffer.extend_from_slice(&payload[..take]);
            reassembly.remain -= take;
            if reassembly.remain == 0 {
                let done = clip.reassembly.take().unwrap();
                return Ok(Some((done.data_type, done.buffer)));
            }
            return Ok(None);
        }

        if payload.len() < 4 {
            return Err(SpiceError::Agent("short CLIPBOARD message".into()));
        }
        let data_type = ClipboardType::from_agent_type(u32::from_le_bytes(
            payload[0..4].try_into().unwrap(),
        ));
        let body = &payload[4..];
        // `body` is the start of a stream whose total length was given by
        // the carrying AgentMessageHeader.size minus the 4-byte type
        // prefix; the caller supplies that via `total_remaining`.
        Ok(Some((data_type, body.to_vec())))
    }

    /// Called after `handle_clipboard_data` returns the first chunk of a
    /// message whose declared total (`header.size - 4`) exceeds what
    /// arrived in this carrier: stashes the partial buffer and the
    /// remaining byte count to accumulate across subsequent `AGENT_DATA`
    /// carriers.
    pub fn begin_reassembly(&self, data_type: ClipboardType, partial: Vec<u8>, remain: usize) {
        if remain == 0 {
            return;
        }
        self.clipboard.lock().unwrap().reassembly = Some(Reassembly {
            data_type,
            buffer: partial,
            remain,
        });
    }

    /// Begins an outbound clipboard transmission of `size` bytes.
    /// Subsequent `clipboard_data` calls append chunks; once the running
    /// total reaches `size` the full `CLIPBOARD` message is queued,
    /// fragmented into ≤ [`MAX_DATA_SIZE`] carriers (spec.md §4.5).
    pub fn clipboard_data_start(&self, data_type: ClipboardType, size: u32) {
        self.clipboard.lock().unwrap().pending_send = Some(PendingSend {
            data_type,
            total: size as usize,
            buffer: Vec::with_capacity(size as usize),
        });
    }

    /// Appends a chunk to the transmission started by
    /// `clipboard_data_start`. Errors if the running total would exceed
    /// the declared size.
    pub fn clipboard_data(&self, data: &[u8]) -> Result<()> {
        let mut clip = self.clipboard.lock().unwrap();
        let pending = clip
            .pending_send
            .as_mut()
            .ok_or_else(|| SpiceError::Agent("clipboard_data with no pending transmission".into()))?;
        if pending.buffer.len() + data.len() > pending.total {
            return Err(SpiceError::Agent(
                "clipboard_data overran the size declared to clipboard_data_start".into(),
            ));
        }
        pending.buffer.extend_from_slice(data);
        if pending.buffer.len() == pending.total {
            let done = clip.pending_send.take().unwrap();
            drop(clip);
            let mut payload = Vec::with_capacity(4 + done.buffer.len());
            payload.extend_from_slice(&done.data_type.to_agent_type().to_le_bytes());
            payload.extend_from_slice(&done.buffer);
            self.enqueue_message(msg_type::CLIPBOARD, &payload);
        }
        Ok(())
    }

}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drains_exactly_once_a_token_is_available() {
        let agent = AgentState::new();
        agent.start(0);
        agent.clipboard_release(); // client_grabbed false -> no-op, queue stays empty
        agent.queue_announce_capabilities(true);
        assert_eq!(agent.queue_len(), 1);

        assert!(agent.take_ready_carriers().is_empty(), "no tokens yet");
        assert_eq!(agent.queue_len(), 1);

        agent.add_tokens(1);
        let ready = agent.take_ready_carriers();
        assert_eq!(ready.len(), 1);
        assert_eq!(agent.queue_len(), 0);
    }

    #[test]
    fn clipboard_grab_then_request_requires_matching_type() {
        let agent = AgentState::new();
        agent.start(10);
        let payload = agent_type::UTF8_TEXT.to_le_bytes();
        let got = agent.handle_clipboard_grab(&payload).unwrap();
        assert_eq!(got, Some(ClipboardType::Text));
        assert!(agent.clipboard_request(ClipboardType::Png).is_err());
        assert!(agent.clipboard_request(ClipboardType::Text).is_ok());
    }

    #[test]
    fn clipboard_reassembly_yields_exact_total() {
        let agent = AgentState::new();
        agent.start(10);
        // First carrier: 2048 raw bytes total (4-byte type prefix + 2044
        // data bytes); message total (AgentMessageHeader.size) is 2500, so
        // remaining after this carrier is 2500 - 2048 = 452.
        let mut first_payload = agent_type::UTF8_TEXT.to_le_bytes().to_vec();
        first_payload.extend(vec![0xABu8; 2044]);
        let (data_type, partial) = agent.handle_clipboard_data(&first_payload).unwrap().unwrap();
        assert_eq!(data_type, ClipboardType::Text);
        assert_eq!(partial.len(), 2044);
        agent.begin_reassembly(data_type, partial, 452);

        let second_payload = vec![0xCDu8; 452];
        let result = agent.handle_clipboard_data(&second_payload).unwrap();
        let (data_type, buffer) = result.expect("reassembly should complete");
        assert_eq!(data_type, ClipboardType::Text);
        assert_eq!(buffer.len(), 2500 - 4);
    }

    #[test]
    fn outbound_clipboard_queues_only_once_total_reached() {
        let agent = AgentState::new();
        agent.start(0);
        agent.clipboard_data_start(ClipboardType::Text, 3000);
        agent.clipboard_data(&vec![1u8; 1000]).unwrap();
        assert_eq!(agent.queue_len(), 0, "nothing queued until total reached");
        agent.clipboard_data(&vec![2u8; 2000]).unwrap();
        assert!(agent.queue_len() > 0);

        let total_bytes: usize = {
            let mut q = agent.queue.lock().unwrap();
            q.drain(..).map(|c| c.len()).sum()
        };
        // header (20) + type prefix (4) + 3000 data bytes.
        assert_eq!(total_bytes, AGENT_MESSAGE_HEADER_SIZE + 4 + 3000);
    }

    #[test]
    fn outbound_clipboard_rejects_overrun() {
        let agent = AgentState::new();
        agent.start(0);
        agent.clipboard_data_start(ClipboardType::Text, 10);
        assert!(agent.clipboard_data(&vec![0u8; 20]).is_err());
    }
}
