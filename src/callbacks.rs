//! The callback contract through which the engine talks back to its host
//! application (spec.md §1, "Explicitly out of scope... exposed only
//! through the callback contract in §6"; §6 "Callbacks are invoked
//! synchronously from `process`").
//!
//! Each channel's option group carries the callbacks spec.md §4.6 lists as
//! mandatory for that channel once enabled. They are plain `FnMut` trait
//! objects rather than a formal trait so a host can wire up closures
//! without implementing a large trait of mostly-unused methods.

use crate::agent::ClipboardType;
use crate::channel::display::{DisplaySurfaceFormat, PixelFormat};
use crate::channel::playback::AudioFormat;

/// `ready` fires exactly once, after the channels list is known and (if
/// advertised) both name and UUID have arrived (spec.md §4.4).
pub type ReadyCallback = Box<dyn FnMut() + Send>;

/// Informational log sink; the engine also emits `tracing` events at the
/// same sites, this exists for server-pushed `NOTIFY` text specifically
/// (spec.md §4.3).
pub type NotifyCallback = Box<dyn FnMut(&str) + Send>;

pub struct ClipboardCallbacks {
    /// Server grabbed the clipboard and advertised a data type.
    pub notice: Box<dyn FnMut(ClipboardType) + Send>,
    /// A previously requested payload arrived in full.
    pub data: Box<dyn FnMut(ClipboardType, Vec<u8>) + Send>,
    /// The server released its clipboard grab.
    pub release: Box<dyn FnMut() + Send>,
    /// The server requests clipboard data of the given type.
    pub request: Box<dyn FnMut(ClipboardType) + Send>,
}

pub struct PlaybackCallbacks {
    pub start: Box<dyn FnMut(u8, u32, AudioFormat) + Send>,
    pub stop: Box<dyn FnMut() + Send>,
    pub data: Box<dyn FnMut(&[u8]) + Send>,
    pub volume: Option<Box<dyn FnMut(&[u16]) + Send>>,
    pub mute: Option<Box<dyn FnMut(bool) + Send>>,
}

pub struct RecordCallbacks {
    pub start: Box<dyn FnMut(u8, u32, AudioFormat) + Send>,
    pub stop: Box<dyn FnMut() + Send>,
    pub volume: Option<Box<dyn FnMut(&[u16]) + Send>>,
    pub mute: Option<Box<dyn FnMut(bool) + Send>>,
}

pub struct DisplayCallbacks {
    pub surface_create: Box<dyn FnMut(u32, DisplaySurfaceFormat, u32, u32) + Send>,
    pub surface_destroy: Box<dyn FnMut(u32) + Send>,
    pub draw_fill: Box<dyn FnMut(u32, i32, i32, i32, i32, [u8; 4]) + Send>,
    pub draw_bitmap: Box<dyn FnMut(DrawBitmap) + Send>,
}

/// Arguments to `draw_bitmap`, grouped because `spec.md`'s uncompressed
/// bitmap callback carries eight positional fields (§4.4 DRAW_COPY).
pub struct DrawBitmap<'a> {
    pub surface: u32,
    pub format: PixelFormat,
    pub top_down: bool,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: &'a [u8],
}

pub struct CursorCallbacks {
    pub set: Box<dyn FnMut(&crate::channel::cursor::CursorShape) + Send>,
    pub move_to: Box<dyn FnMut(i32, i32) + Send>,
    pub hide: Box<dyn FnMut() + Send>,
    pub trail: Box<dyn FnMut(u16, u16) + Send>,
}
