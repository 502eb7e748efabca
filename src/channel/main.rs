//! MAIN channel: the bootstrap channel, session metadata, and the handful
//! of server-pushed signals (channels list, agent lifecycle, mouse mode)
//! that drive the rest of the session (spec.md §4.4).

use binrw::{BinRead, BinWrite};

use crate::error::{Result, SpiceError};
use crate::wire::main_msg;

/// Per-channel MAIN state: session metadata cached for the public
/// `server_info` API and the one-shot `ready` edge (spec.md §4.4: "both
/// must arrive for `ready` to fire").
pub struct MainState {
    pub session_id: u32,
    pub name: Option<String>,
    pub uuid: Option<[u8; 16]>,
    pub channels_known: bool,
    pub ready_fired: bool,
}

impl MainState {
    pub fn new() -> Self {
        Self {
            session_id: 0,
            name: None,
            uuid: None,
            channels_known: false,
            ready_fired: false,
        }
    }

    /// `name`/`uuid` are only mandatory for `ready` when the server
    /// actually advertises the name-and-uuid capability; the session
    /// decides that and calls [`Self::mark_ready_if_due`] accordingly.
    pub fn mark_ready_if_due(&mut self, requires_name_uuid: bool) -> bool {
        if self.ready_fired || !self.channels_known {
            return false;
        }
        if requires_name_uuid && (self.name.is_none() || self.uuid.is_none()) {
            return false;
        }
        self.ready_fired = true;
        true
    }
}

impl Default for MainState {
    fn default() -> Self {
        Self::new()
    }
}

/// `SpiceMsgMainInit` (spec.md §4.4: "carries session id, agent-connected
/// flag, agent token count, current mouse mode").
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
pub struct MainInit {
    pub session_id: u32,
    pub display_channels_hint: u32,
    pub current_mouse_mode: u32,
    pub is_agent_connected: u32,
    pub agent_tokens: u32,
    pub multi_media_time: u32,
    pub ram_hint: u32,
}

pub const MAIN_INIT_SIZE: usize = 28;

pub fn parse_init(payload: &[u8]) -> Result<MainInit> {
    if payload.len() < MAIN_INIT_SIZE {
        return Err(SpiceError::Protocol("short MAIN_INIT message".into()));
    }
    let mut cursor = std::io::Cursor::new(&payload[..MAIN_INIT_SIZE]);
    MainInit::read(&mut cursor).map_err(|e| SpiceError::Protocol(format!("bad MAIN_INIT: {e}")))
}

/// One entry of `SpiceMsgChannels` (spec.md §4.4 `CHANNELS_LIST`).
pub fn parse_channels_list(payload: &[u8]) -> Result<Vec<(u8, u8)>> {
    if payload.len() < 4 {
        return Err(SpiceError::Protocol("short CHANNELS_LIST message".into()));
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(count);
    let mut off = 4;
    for _ in 0..count {
        if off + 2 > payload.len() {
            return Err(SpiceError::Protocol(
                "CHANNELS_LIST truncated entry list".into(),
            ));
        }
        out.push((payload[off], payload[off + 1]));
        off += 2;
    }
    Ok(out)
}

/// `SpiceMsgMainName`: a 4-byte length prefix followed by a NUL-terminated
/// UTF-8 string.
pub fn parse_name(payload: &[u8]) -> Result<String> {
    if payload.len() < 4 {
        return Err(SpiceError::Protocol("short NAME message".into()));
    }
    let len = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let body = payload
        .get(4..4 + len)
        .ok_or_else(|| SpiceError::Protocol("NAME message shorter than declared length".into()))?;
    let trimmed = body.split(|&b| b == 0).next().unwrap_or(body);
    Ok(String::from_utf8_lossy(trimmed).into_owned())
}

pub fn parse_uuid(payload: &[u8]) -> Result<[u8; 16]> {
    payload
        .get(0..16)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| SpiceError::Protocol("short UUID message".into()))
}

/// `SpiceMsgcMainAttachChannels`: empty payload, requests the server send
/// its channels list.
pub fn build_attach_channels() -> Vec<u8> {
    Vec::new()
}

/// `SpiceMsgcMainMouseModeRequest`.
pub fn build_mouse_mode_request(mode: u32) -> Vec<u8> {
    mode.to_le_bytes().to_vec()
}

/// `SpiceMsgcMainAgentStart`: a single "max tokens this client will honour"
/// field (spec.md §4.5).
pub fn build_agent_start(max_tokens: u32) -> Vec<u8> {
    max_tokens.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_list_parses_pairs() {
        let mut payload = 2u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[1, 0]);
        payload.extend_from_slice(&[2, 0]);
        let channels = parse_channels_list(&payload).unwrap();
        assert_eq!(channels, vec![(1, 0), (2, 0)]);
    }

    #[test]
    fn name_parses_nul_terminated_string() {
        let mut payload = 6u32.to_le_bytes().to_vec();
        payload.extend_from_slice(b"guest\0");
        assert_eq!(parse_name(&payload).unwrap(), "guest");
    }

    #[test]
    fn ready_requires_channels_and_optionally_name_uuid() {
        let mut state = MainState::new();
        assert!(!state.mark_ready_if_due(true));
        state.channels_known = true;
        assert!(!state.mark_ready_if_due(true));
        state.name = Some("vm".into());
        state.uuid = Some([0; 16]);
        assert!(state.mark_ready_if_due(true));
        assert!(!state.mark_ready_if_due(true), "fires only once");
    }

    #[test]
    fn ready_without_name_uuid_capability() {
        let mut state = MainState::new();
        state.channels_known = true;
        assert!(state.mark_ready_if_due(false));
    }
}
