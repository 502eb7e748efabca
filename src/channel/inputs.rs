//! INPUTS channel: keyboard/mouse event submission and the motion-ack
//! discipline (spec.md §4.4).

use binrw::BinWrite;

use crate::error::{Result, SpiceError};
use crate::wire::inputs_msgc;

pub struct InputsState {
    pub init_done: bool,
    pub key_modifiers: u16,
}

impl InputsState {
    pub fn new() -> Self {
        Self {
            init_done: false,
            key_modifiers: 0,
        }
    }
}

impl Default for InputsState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_key_modifiers(payload: &[u8]) -> Result<u16> {
    payload
        .get(0..2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| SpiceError::Protocol("short INPUTS_KEY_MODIFIERS message".into()))
}

/// Maps a PS/2 set-1 extended scancode to the wire `keyDown` code
/// (spec.md §4.4: "codes > 0x100 become `0xe0 | ((code-0x100) << 8)`").
pub fn key_down_scancode(code: u32) -> u32 {
    if code > 0x100 {
        0xe0 | ((code - 0x100) << 8)
    } else {
        code
    }
}

/// Maps a PS/2 set-1 extended scancode to the wire `keyUp` code
/// (spec.md §4.4: "up codes OR 0x80 into the low byte for single-byte
/// codes or 0x80e0 | shifted for extended").
pub fn key_up_scancode(code: u32) -> u32 {
    if code > 0x100 {
        0x80e0 | ((code - 0x100) << 8)
    } else {
        code | 0x80
    }
}

pub fn build_key_down(code: u32) -> (u16, Vec<u8>) {
    (
        inputs_msgc::KEY_DOWN,
        key_down_scancode(code).to_le_bytes().to_vec(),
    )
}

pub fn build_key_up(code: u32) -> (u16, Vec<u8>) {
    (
        inputs_msgc::KEY_UP,
        key_up_scancode(code).to_le_bytes().to_vec(),
    )
}

pub fn build_key_modifiers(mask: u16) -> Vec<u8> {
    mask.to_le_bytes().to_vec()
}

/// `SpiceMsgcMousePosition`: absolute position, valid only while the
/// server is in client-mouse mode (spec.md §4.4).
#[derive(Debug, Clone, Copy, BinWrite)]
#[brw(little)]
struct MousePosition {
    x: u32,
    y: u32,
    buttons_state: u32,
    display_id: u8,
}

pub fn build_mouse_position(x: u32, y: u32, buttons_state: u32) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    MousePosition {
        x,
        y,
        buttons_state,
        display_id: 0,
    }
    .write(&mut cursor)
    .expect("fixed-size struct always serialises");
    cursor.into_inner()
}

/// `SpiceMsgcMouseMotion`: one relative-motion sub-packet, clamped to
/// ±127 by the caller (spec.md §4.4, `packetize_motion`).
#[derive(Debug, Clone, Copy, BinWrite)]
#[brw(little)]
struct MouseMotion {
    dx: i32,
    dy: i32,
    buttons_state: u32,
}

pub fn build_mouse_motion(dx: i32, dy: i32, buttons_state: u32) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    MouseMotion {
        dx,
        dy,
        buttons_state,
    }
    .write(&mut cursor)
    .expect("fixed-size struct always serialises");
    cursor.into_inner()
}

#[derive(Debug, Clone, Copy, BinWrite)]
#[brw(little)]
struct MouseButtonPacket {
    button: u8,
    buttons_state: u32,
}

fn build_button_packet(button_bit: u8, buttons_state: u8) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    MouseButtonPacket {
        button: button_bit,
        buttons_state: buttons_state as u32,
    }
    .write(&mut cursor)
    .expect("fixed-size struct always serialises");
    cursor.into_inner()
}

pub fn build_mouse_press(button_bit: u8, buttons_state: u8) -> (u16, Vec<u8>) {
    (
        inputs_msgc::MOUSE_PRESS,
        build_button_packet(button_bit, buttons_state),
    )
}

pub fn build_mouse_release(button_bit: u8, buttons_state: u8) -> (u16, Vec<u8>) {
    (
        inputs_msgc::MOUSE_RELEASE,
        build_button_packet(button_bit, buttons_state),
    )
}

/// Splits a `(dx, dy)` relative motion into the wire packets
/// `crate::mouse::packetize_motion` says to send, each paired with its
/// outbound message type so the caller can `send_burst` them atomically.
pub fn build_mouse_motion_burst(dx: i32, dy: i32, buttons_state: u32) -> Vec<(u16, Vec<u8>)> {
    crate::mouse::packetize_motion(dx, dy)
        .into_iter()
        .map(|(px, py)| {
            (
                inputs_msgc::MOUSE_MOTION,
                build_mouse_motion(px, py, buttons_state),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_scancode_round_trips_through_down_up() {
        assert_eq!(key_down_scancode(0x1e), 0x1e);
        assert_eq!(key_up_scancode(0x1e), 0x9e);
    }

    #[test]
    fn extended_scancode_gets_e0_prefix() {
        // code 0x15c (e.g. numpad enter) -> (0x15c-0x100)=0x5c -> 0xe0 | (0x5c<<8)
        let down = key_down_scancode(0x15c);
        assert_eq!(down, 0xe0 | (0x5cu32 << 8));
        let up = key_up_scancode(0x15c);
        assert_eq!(up, 0x80e0 | (0x5cu32 << 8));
    }

    #[test]
    fn motion_burst_matches_packetize_motion_example() {
        let burst = build_mouse_motion_burst(300, -5, 0);
        assert_eq!(burst.len(), 3);
        for (msg_type, _) in &burst {
            assert_eq!(*msg_type, inputs_msgc::MOUSE_MOTION);
        }
    }
}
