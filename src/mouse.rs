//! Shared mouse state: button mask and outstanding-motion counter, guarded
//! by one lock so presses, motion packetisation, and ack-credit bookkeeping
//! observe a consistent view (spec.md §3, §5).

use std::sync::Mutex;

use crate::error::{Result, SpiceError};

/// The server acks motion messages in fixed bunches of this size
/// (spec.md §4.3, "Motion-ack discipline").
pub const MOTION_ACK_BUNCH: i32 = 16;

/// Mouse button identifiers, matching the SPICE button-state bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    Side,
    Extra,
}

impl MouseButton {
    pub(crate) fn bit(self) -> u8 {
        match self {
            MouseButton::Left => 1 << 0,
            MouseButton::Middle => 1 << 1,
            MouseButton::Right => 1 << 2,
            MouseButton::Side => 1 << 3,
            MouseButton::Extra => 1 << 4,
        }
    }
}

struct MouseInner {
    buttons: u8,
    outstanding: i32,
}

/// Shared session-wide mouse state (spec.md §3: "a shared mouse state
/// (button mask + outstanding-motion counter, guarded by an atomic flag)").
/// A `std::sync::Mutex` stands in for the source's spin flag; critical
/// sections are a handful of integer updates, never a blocking call.
pub struct MouseState {
    inner: Mutex<MouseInner>,
}

impl MouseState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MouseInner {
                buttons: 0,
                outstanding: 0,
            }),
        }
    }

    /// Sets `button`'s bit and returns the resulting mask.
    pub fn press(&self, button: MouseButton) -> u8 {
        let mut inner = self.inner.lock().unwrap();
        inner.buttons |= button.bit();
        inner.buttons
    }

    /// Clears `button`'s bit and returns the resulting mask.
    pub fn release(&self, button: MouseButton) -> u8 {
        let mut inner = self.inner.lock().unwrap();
        inner.buttons &= !button.bit();
        inner.buttons
    }

    pub fn buttons(&self) -> u8 {
        self.inner.lock().unwrap().buttons
    }

    /// Records that `count` motion sub-packets were just sent.
    pub fn record_motion_sent(&self, count: i32) {
        self.inner.lock().unwrap().outstanding += count;
    }

    /// Applies one server motion-ack: subtracts a bunch from the
    /// outstanding counter. Errors if the counter would fall more than one
    /// bunch below zero, which indicates the server acked more than it
    /// could have been sent (spec.md §4.3, §8 "Motion-ack balance").
    pub fn record_motion_ack(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.outstanding -= MOTION_ACK_BUNCH;
        if inner.outstanding < -MOTION_ACK_BUNCH {
            return Err(SpiceError::MotionAckUnderflow);
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> i32 {
        self.inner.lock().unwrap().outstanding
    }
}

impl Default for MouseState {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a relative motion `(dx, dy)` into sub-packets clamped to ±127
/// (the QEMU virtio-mouse per-message limit; spec.md §4.4), in the order
/// they should be sent. The sum of all returned deltas equals the input.
pub fn packetize_motion(dx: i32, dy: i32) -> Vec<(i32, i32)> {
    let max_abs = dx.unsigned_abs().max(dy.unsigned_abs());
    if max_abs == 0 {
        return vec![(0, 0)];
    }
    let packets = max_abs.div_ceil(127) as usize;
    let mut out = Vec::with_capacity(packets);
    let (mut rx, mut ry) = (dx, dy);
    for _ in 0..packets {
        let px = rx.clamp(-127, 127);
        let py = ry.clamp(-127, 127);
        out.push((px, py));
        rx -= px;
        ry -= py;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_release_round_trip() {
        let mouse = MouseState::new();
        assert_eq!(mouse.press(MouseButton::Left), 0x01);
        assert_eq!(mouse.press(MouseButton::Right), 0x05);
        assert_eq!(mouse.release(MouseButton::Left), 0x04);
        assert_eq!(mouse.release(MouseButton::Right), 0x00);
    }

    #[test]
    fn motion_packetisation_example_from_spec() {
        // spec.md §8 scenario 2: mouseMotion(300, -5) -> (127,-5),(127,0),(46,0).
        let packets = packetize_motion(300, -5);
        assert_eq!(packets, vec![(127, -5), (127, 0), (46, 0)]);
    }

    #[test]
    fn motion_packetisation_sums_to_input_and_bounds_hold() {
        for x in [-10000i32, -5000, -127, 0, 1, 126, 127, 128, 5000, 10000] {
            for y in [-10000i32, -300, -1, 0, 1, 300, 10000] {
                let packets = packetize_motion(x, y);
                let expected = (x.unsigned_abs().max(y.unsigned_abs())).div_ceil(127).max(1);
                assert_eq!(packets.len() as u32, expected);
                let (sx, sy): (i32, i32) = packets
                    .iter()
                    .fold((0, 0), |(ax, ay), (px, py)| (ax + px, ay + py));
                assert_eq!(sx, x);
                assert_eq!(sy, y);
                for (px, py) in packets {
                    assert!(px.abs() <= 127);
                    assert!(py.abs() <= 127);
                }
            }
        }
    }

    #[test]
    fn motion_ack_balance() {
        let mouse = MouseState::new();
        for _ in 0..40 {
            mouse.record_motion_sent(1);
        }
        for _ in 0..2 {
            mouse.record_motion_ack().unwrap();
        }
        assert_eq!(mouse.outstanding(), 40 - 2 * MOTION_ACK_BUNCH);
    }

    #[test]
    fn motion_ack_underflow_detected() {
        let mouse = MouseState::new();
        mouse.record_motion_ack().unwrap();
        assert!(mouse.record_motion_ack().is_err());
    }
}
