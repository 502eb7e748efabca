//! Wire framing primitives (spec.md §4.1): header packing, capability
//! bitsets, and the link-stage structs used once per channel during the
//! handshake (§4.2).

pub mod caps;
pub mod header;
pub mod link;

/// SPICE protocol version this engine speaks.
pub const SPICE_VERSION_MAJOR: u32 = 2;
pub const SPICE_VERSION_MINOR: u32 = 2;

/// Link magic, the ASCII bytes "REDQ" read as a little-endian u32.
pub const SPICE_MAGIC: u32 = 0x51444552;

/// Channel-type wire codes (spec.md §3, "Channel kinds (closed set)").
pub mod channel_type {
    pub const MAIN: u8 = 1;
    pub const DISPLAY: u8 = 2;
    pub const INPUTS: u8 = 3;
    pub const CURSOR: u8 = 4;
    pub const PLAYBACK: u8 = 5;
    pub const RECORD: u8 = 6;
}

/// Common (shared) message type codes, valid on every channel and handled
/// by the shared common-message handler in spec.md §4.3.
pub mod common_msg {
    pub const MIGRATE: u16 = 1;
    pub const MIGRATE_DATA: u16 = 2;
    pub const SET_ACK: u16 = 3;
    pub const PING: u16 = 4;
    pub const WAIT_FOR_CHANNELS: u16 = 5;
    pub const DISCONNECTING: u16 = 6;
    pub const NOTIFY: u16 = 7;
    /// First message type reserved for channel-specific use; types below
    /// this are routed to the common handler instead of the channel's own.
    pub const BASE_LAST: u16 = 101;
}

/// Common client->server reply codes.
pub mod common_msgc {
    pub const ACK_SYNC: u16 = 1;
    pub const PONG: u16 = 2;
    pub const DISCONNECTING: u16 = 3;
    pub const ACK: u16 = 4;
}

/// Main-channel message type codes (server->client), spec.md §4.4.
pub mod main_msg {
    pub const MIGRATE_BEGIN: u16 = 101;
    pub const MIGRATE_CANCEL: u16 = 102;
    pub const INIT: u16 = 103;
    pub const CHANNELS_LIST: u16 = 104;
    pub const MOUSE_MODE: u16 = 105;
    pub const MULTI_MEDIA_TIME: u16 = 106;
    pub const AGENT_CONNECTED: u16 = 107;
    pub const AGENT_DISCONNECTED: u16 = 108;
    pub const AGENT_DATA: u16 = 109;
    pub const AGENT_TOKEN: u16 = 110;
    pub const NAME: u16 = 113;
    pub const UUID: u16 = 114;
    pub const AGENT_CONNECTED_TOKENS: u16 = 115;
}

/// Main-channel message type codes (client->server).
pub mod main_msgc {
    pub const ATTACH_CHANNELS: u16 = 104;
    pub const MOUSE_MODE_REQUEST: u16 = 105;
    pub const AGENT_START: u16 = 106;
    pub const AGENT_DATA: u16 = 107;
    pub const AGENT_TOKEN: u16 = 108;
}

/// Mouse modes reported in `MAIN_MOUSE_MODE` / requested via
/// `MOUSE_MODE_REQUEST`.
pub mod mouse_mode {
    pub const SERVER: u32 = 1;
    pub const CLIENT: u32 = 2;
}

/// Inputs-channel message type codes (server->client).
pub mod inputs_msg {
    pub const INIT: u16 = 101;
    pub const KEY_MODIFIERS: u16 = 102;
    pub const MOUSE_MOTION_ACK: u16 = 111;
}

/// Inputs-channel message type codes (client->server).
pub mod inputs_msgc {
    pub const KEY_DOWN: u16 = 101;
    pub const KEY_UP: u16 = 102;
    pub const KEY_MODIFIERS: u16 = 103;
    pub const MOUSE_MOTION: u16 = 111;
    pub const MOUSE_POSITION: u16 = 112;
    pub const MOUSE_PRESS: u16 = 113;
    pub const MOUSE_RELEASE: u16 = 114;
}

/// Playback-channel message type codes (server->client).
pub mod playback_msg {
    pub const DATA: u16 = 101;
    pub const MODE: u16 = 102;
    pub const START: u16 = 103;
    pub const STOP: u16 = 104;
    pub const VOLUME: u16 = 105;
    pub const MUTE: u16 = 106;
}

/// Audio format codes carried by `PLAYBACK_START`/`RECORD_START`.
pub mod audio_mode {
    pub const INVALID: u16 = 0;
    pub const S16: u16 = 1;
}

/// Record-channel message type codes (server->client).
pub mod record_msg {
    pub const START: u16 = 101;
    pub const STOP: u16 = 102;
    pub const VOLUME: u16 = 103;
    pub const MUTE: u16 = 104;
}

/// Record-channel message type codes (client->server).
pub mod record_msgc {
    pub const DATA: u16 = 102;
}

/// Display-channel message type codes (server->client); this core only
/// materialises the subset named in spec.md §4.4, all others are logged
/// and discarded by the caller.
pub mod display_msg {
    pub const MODE: u16 = 101;
    pub const MARK: u16 = 102;
    pub const RESET: u16 = 103;
    pub const COPY_BITS: u16 = 104;
    pub const DRAW_FILL: u16 = 114;
    pub const DRAW_COPY: u16 = 116;
    pub const SURFACE_CREATE: u16 = 126;
    pub const SURFACE_DESTROY: u16 = 127;
    pub const MONITORS_CONFIG: u16 = 129;
}

/// Display-channel message type codes (client->server).
pub mod display_msgc {
    pub const INIT: u16 = 101;
    pub const PREFERRED_COMPRESSION: u16 = 116;
}

/// Preferred-compression request values.
pub mod preferred_compression {
    pub const OFF: u8 = 1;
}

/// Image type codes in `DRAW_COPY`'s embedded image descriptor; only
/// `BITMAP` (uncompressed) is honoured (spec.md §4.4).
pub mod image_type {
    pub const BITMAP: u8 = 0;
}

/// Uncompressed bitmap format codes (`SpiceBitmap.format`).
pub mod bitmap_format {
    pub const PAL_1BE: u8 = 1;
    pub const PAL_4BE: u8 = 3;
    pub const PAL_8: u8 = 5;
    pub const RGB16_555: u8 = 6;
    pub const RGB24: u8 = 7;
    pub const RGB32: u8 = 8;
    pub const RGBA: u8 = 9;
    pub const RGB16_565: u8 = 10;
}

/// Bitmap flag bits.
pub mod bitmap_flags {
    pub const TOP_DOWN: u8 = 1 << 2;
}

/// Brush type codes in `DRAW_FILL`'s embedded brush.
pub mod brush_type {
    pub const NONE: u8 = 0;
    pub const SOLID: u8 = 1;
    pub const PATTERN: u8 = 2;
}

/// Surface format codes (`SPICE_SURFACE_FMT_*`).
pub mod surface_format {
    pub const INVALID: u32 = 0;
    pub const FMT_1_A: u32 = 1;
    pub const FMT_8_A: u32 = 8;
    pub const FMT_16_555: u32 = 16;
    pub const FMT_32_XRGB: u32 = 32;
    pub const FMT_16_565: u32 = 80;
    pub const FMT_32_ARGB: u32 = 96;
}

/// Cursor-channel message type codes (server->client).
pub mod cursor_msg {
    pub const INIT: u16 = 101;
    pub const RESET: u16 = 102;
    pub const SET: u16 = 103;
    pub const MOVE: u16 = 104;
    pub const HIDE: u16 = 105;
    pub const TRAIL: u16 = 106;
    pub const INVAL_ONE: u16 = 107;
    pub const INVAL_ALL: u16 = 108;
}

/// Cursor type codes (`SpiceCursorHeader.type`).
pub mod cursor_type {
    pub const ALPHA: u8 = 0;
    pub const MONO: u8 = 1;
    pub const COLOR4: u8 = 2;
    pub const COLOR8: u8 = 3;
    pub const COLOR16: u8 = 4;
    pub const COLOR24: u8 = 5;
    pub const COLOR32: u8 = 6;
}

/// Cursor flag bits (`SpiceCursorHeader.flags`).
pub mod cursor_flags {
    pub const NONE: u16 = 1 << 0;
    pub const CACHE_ME: u16 = 1 << 1;
    pub const FROM_CACHE: u16 = 1 << 2;
}

/// Link-stage result codes (`SPICE_LINK_ERR_*`).
pub mod link_err {
    pub const OK: u32 = 0;
    pub const ERROR: u32 = 1;
    pub const INVALID_MAGIC: u32 = 2;
    pub const INVALID_DATA: u32 = 3;
    pub const VERSION_MISMATCH: u32 = 4;
    pub const NEED_SECURED: u32 = 5;
    pub const NEED_UNSECURED: u32 = 6;
    pub const PERMISSION_DENIED: u32 = 7;
    pub const BAD_CONNECTION_ID: u32 = 8;
    pub const CHANNEL_NOT_AVAILABLE: u32 = 9;

    pub fn name(code: u32) -> &'static str {
        match code {
            OK => "OK",
            ERROR => "ERROR",
            INVALID_MAGIC => "INVALID_MAGIC",
            INVALID_DATA => "INVALID_DATA",
            VERSION_MISMATCH => "VERSION_MISMATCH",
            NEED_SECURED => "NEED_SECURED",
            NEED_UNSECURED => "NEED_UNSECURED",
            PERMISSION_DENIED => "PERMISSION_DENIED",
            BAD_CONNECTION_ID => "BAD_CONNECTION_ID",
            CHANNEL_NOT_AVAILABLE => "CHANNEL_NOT_AVAILABLE",
            _ => "UNKNOWN",
        }
    }
}
