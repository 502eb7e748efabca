//! CURSOR channel (optional): maintains a server-keyed cursor cache and
//! tracks visibility/position/trail (spec.md §4.4).

use std::collections::HashMap;

use crate::error::{Result, SpiceError};
use crate::wire::{cursor_flags, cursor_type};

/// A resolved cursor shape, ready for the `set` callback.
#[derive(Debug, Clone)]
pub struct CursorShape {
    pub width: u16,
    pub height: u16,
    pub hot_x: u16,
    pub hot_y: u16,
    pub rgba: Vec<u8>,
}

pub struct CursorState {
    cache: HashMap<u64, CursorShape>,
    pub visible: bool,
}

impl CursorState {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            visible: true,
        }
    }

    pub fn reset(&mut self) {
        self.cache.clear();
    }

    pub fn invalidate_one(&mut self, id: u64) {
        self.cache.remove(&id);
    }

    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }
}

impl Default for CursorState {
    fn default() -> Self {
        Self::new()
    }
}

/// `SpiceCursorHeader` (spec.md §4.4: "cache keyed by `header.unique`"):
/// a 64-bit cache key, the pixel-format type, size, hotspot, and flags.
struct CursorHeader {
    unique: u64,
    cursor_type: u8,
    width: u16,
    height: u16,
    hot_x: u16,
    hot_y: u16,
    flags: u16,
}

const CURSOR_HEADER_SIZE: usize = 19;

fn parse_header(payload: &[u8]) -> Result<(CursorHeader, &[u8])> {
    if payload.len() < CURSOR_HEADER_SIZE {
        return Err(SpiceError::Protocol("short cursor header".into()));
    }
    let unique = u64::from_le_bytes(payload[0..8].try_into().unwrap());
    let cursor_type = payload[8];
    let width = u16::from_le_bytes(payload[9..11].try_into().unwrap());
    let height = u16::from_le_bytes(payload[11..13].try_into().unwrap());
    let hot_x = u16::from_le_bytes(payload[13..15].try_into().unwrap());
    let hot_y = u16::from_le_bytes(payload[15..17].try_into().unwrap());
    let flags = u16::from_le_bytes(payload[17..19].try_into().unwrap());
    Ok((
        CursorHeader {
            unique,
            cursor_type,
            width,
            height,
            hot_x,
            hot_y,
            flags,
        },
        &payload[CURSOR_HEADER_SIZE..],
    ))
}

/// Required buffer length for one cursor's pixel data, by type
/// (spec.md §4.4).
fn buffer_size(kind: u8, width: u16, height: u16) -> usize {
    let w = width as usize;
    let h = height as usize;
    match kind {
        cursor_type::ALPHA => 4 * w * h,
        cursor_type::MONO => 2 * w.div_ceil(8) * h,
        cursor_type::COLOR4 => w.div_ceil(2) * h + 16 * 4 + w.div_ceil(8) * h,
        cursor_type::COLOR8 => w * h + 256 * 4 + w.div_ceil(8) * h,
        cursor_type::COLOR16 => 2 * w * h + w.div_ceil(8) * h,
        cursor_type::COLOR24 => 3 * w * h + w.div_ceil(8) * h,
        cursor_type::COLOR32 => 4 * w * h + w.div_ceil(8) * h,
        _ => 0,
    }
}

/// Converts a cache/from-cache/inline cursor payload into an owned RGBA
/// shape, consulting `state`'s cache as needed (spec.md §4.4):
/// `FROM_CACHE` pulls from cache, `NONE` yields no shape, otherwise the
/// shape is built from the payload and, if `CACHE_ME` is set, copied into
/// the cache.
pub fn resolve_cursor(state: &mut CursorState, payload: &[u8]) -> Result<Option<CursorShape>> {
    let (header, body) = parse_header(payload)?;

    if header.flags & cursor_flags::FROM_CACHE != 0 {
        return Ok(state.cache.get(&header.unique).cloned());
    }
    if header.flags & cursor_flags::NONE != 0 {
        return Ok(None);
    }

    let needed = buffer_size(header.cursor_type, header.width, header.height);
    if body.len() < needed {
        return Err(SpiceError::Protocol(format!(
            "cursor payload too short: need {needed}, got {}",
            body.len()
        )));
    }
    let rgba = decode_cursor_pixels(header.cursor_type, &body[..needed], header.width, header.height)?;
    let shape = CursorShape {
        width: header.width,
        height: header.height,
        hot_x: header.hot_x,
        hot_y: header.hot_y,
        rgba,
    };
    if header.flags & cursor_flags::CACHE_ME != 0 {
        state.cache.insert(header.unique, shape.clone());
    }
    Ok(Some(shape))
}

/// Only the formats this core can cheaply expand without a palette table
/// are decoded to RGBA; anything else is rejected (spec.md §1: "anything
/// else is logged and dropped").
fn decode_cursor_pixels(kind: u8, data: &[u8], width: u16, height: u16) -> Result<Vec<u8>> {
    match kind {
        cursor_type::ALPHA => Ok(data.to_vec()),
        cursor_type::MONO => {
            let w = width as usize;
            let h = height as usize;
            let stride = w.div_ceil(8);
            let mut out = Vec::with_capacity(w * h * 4);
            for row in 0..h {
                for col in 0..w {
                    let byte = data[row * stride + col / 8];
                    let bit = (byte >> (7 - col % 8)) & 1;
                    let v = if bit != 0 { 0xff } else { 0x00 };
                    out.extend_from_slice(&[v, v, v, 0xff]);
                }
            }
            Ok(out)
        }
        other => Err(SpiceError::Protocol(format!(
            "unsupported cursor pixel format {other}"
        ))),
    }
}

pub fn parse_move(payload: &[u8]) -> Result<(i32, i32)> {
    if payload.len() < 8 {
        return Err(SpiceError::Protocol("short CURSOR_MOVE message".into()));
    }
    Ok((
        i32::from_le_bytes(payload[0..4].try_into().unwrap()),
        i32::from_le_bytes(payload[4..8].try_into().unwrap()),
    ))
}

pub fn parse_trail(payload: &[u8]) -> Result<(u16, u16)> {
    if payload.len() < 4 {
        return Err(SpiceError::Protocol("short CURSOR_TRAIL message".into()));
    }
    Ok((
        u16::from_le_bytes(payload[0..2].try_into().unwrap()),
        u16::from_le_bytes(payload[2..4].try_into().unwrap()),
    ))
}

pub fn parse_inval_one(payload: &[u8]) -> Result<u64> {
    payload
        .get(0..8)
        .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| SpiceError::Protocol("short CURSOR_INVAL_ONE message".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(unique: u64, cursor_type: u8, flags: u16, width: u16, height: u16, hx: u16, hy: u16) -> Vec<u8> {
        let mut v = unique.to_le_bytes().to_vec();
        v.push(cursor_type);
        v.extend_from_slice(&width.to_le_bytes());
        v.extend_from_slice(&height.to_le_bytes());
        v.extend_from_slice(&hx.to_le_bytes());
        v.extend_from_slice(&hy.to_le_bytes());
        v.extend_from_slice(&flags.to_le_bytes());
        v
    }

    #[test]
    fn alpha_cursor_round_trips_rgba_bytes() {
        let mut payload = header_bytes(1, cursor_type::ALPHA, 0, 2, 1, 0, 0);
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut state = CursorState::new();
        let shape = resolve_cursor(&mut state, &payload).unwrap().unwrap();
        assert_eq!(shape.rgba, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn cache_me_then_from_cache_returns_same_shape() {
        let mut payload = header_bytes(7, cursor_type::ALPHA, cursor_flags::CACHE_ME, 1, 1, 0, 0);
        payload.extend_from_slice(&[9, 9, 9, 9]);
        let mut state = CursorState::new();
        let first = resolve_cursor(&mut state, &payload).unwrap().unwrap();
        assert_eq!(first.rgba, vec![9, 9, 9, 9]);

        let from_cache_payload = header_bytes(7, 0, cursor_flags::FROM_CACHE, 1, 1, 0, 0);
        let second = resolve_cursor(&mut state, &from_cache_payload).unwrap().unwrap();
        assert_eq!(second.rgba, vec![9, 9, 9, 9]);
    }

    #[test]
    fn none_flag_yields_no_shape() {
        let payload = header_bytes(1, 0, cursor_flags::NONE, 0, 0, 0, 0);
        let mut state = CursorState::new();
        assert!(resolve_cursor(&mut state, &payload).unwrap().is_none());
    }

    #[test]
    fn invalidate_one_removes_only_that_entry() {
        let mut state = CursorState::new();
        state.cache.insert(1, CursorShape { width: 1, height: 1, hot_x: 0, hot_y: 0, rgba: vec![] });
        state.cache.insert(2, CursorShape { width: 1, height: 1, hot_x: 0, hot_y: 0, rgba: vec![] });
        state.invalidate_one(1);
        assert!(!state.cache.contains_key(&1));
        assert!(state.cache.contains_key(&2));
    }
}
