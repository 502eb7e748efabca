//! Session configuration (spec.md §4.6, §6): address, credential,
//! per-channel enable/autoconnect flags, and the callbacks each enabled
//! channel requires.

use crate::callbacks::{
    ClipboardCallbacks, CursorCallbacks, DisplayCallbacks, NotifyCallback, PlaybackCallbacks,
    ReadyCallback, RecordCallbacks,
};
use crate::error::{Result, SpiceError};

/// Either a `host:port` TCP endpoint or a Unix domain socket path
/// (spec.md §6: "if `port == 0`, the host string is a filesystem path").
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        if port == 0 {
            Endpoint::Unix { path: host }
        } else {
            Endpoint::Tcp { host, port }
        }
    }
}

/// One channel's `enable`/`autoConnect` option group plus its mandatory
/// callbacks. Clipboard has no `autoconnect` (it rides the main channel).
pub struct InputsOptions {
    pub enable: bool,
    pub autoconnect: bool,
}

impl Default for InputsOptions {
    fn default() -> Self {
        Self {
            enable: true,
            autoconnect: true,
        }
    }
}

#[derive(Default)]
pub struct ClipboardOptions {
    pub enable: bool,
    pub callbacks: Option<ClipboardCallbacks>,
}

pub struct PlaybackOptions {
    pub enable: bool,
    pub autoconnect: bool,
    pub callbacks: Option<PlaybackCallbacks>,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            enable: false,
            autoconnect: false,
            callbacks: None,
        }
    }
}

pub struct RecordOptions {
    pub enable: bool,
    pub autoconnect: bool,
    pub callbacks: Option<RecordCallbacks>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            enable: false,
            autoconnect: false,
            callbacks: None,
        }
    }
}

pub struct DisplayOptions {
    pub enable: bool,
    pub autoconnect: bool,
    pub callbacks: Option<DisplayCallbacks>,
}

/// Unlike inputs/cursor, display has mandatory callbacks once enabled
/// (spec.md §4.6), so it defaults off like playback/record rather than
/// leaving a fresh `SessionConfig` failing `validate()` out of the box.
impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            enable: false,
            autoconnect: true,
            callbacks: None,
        }
    }
}

/// Cursor callbacks are optional even when the channel is enabled — a
/// host without a custom cursor renderer can simply leave them unset and
/// rely on its platform cursor (spec.md §4.6 lists no mandatory cursor
/// callback).
pub struct CursorOptions {
    pub enable: bool,
    pub autoconnect: bool,
    pub callbacks: Option<CursorCallbacks>,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            enable: true,
            autoconnect: true,
            callbacks: None,
        }
    }
}

/// Top-level connection configuration (spec.md §6 `connect(config)`).
pub struct SessionConfig {
    pub endpoint: Endpoint,
    pub password: String,
    pub ready: Option<ReadyCallback>,
    pub notify: Option<NotifyCallback>,
    pub inputs: InputsOptions,
    pub clipboard: ClipboardOptions,
    pub playback: PlaybackOptions,
    pub record: RecordOptions,
    pub display: DisplayOptions,
    pub cursor: CursorOptions,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            password: String::new(),
            ready: None,
            notify: None,
            inputs: InputsOptions::default(),
            clipboard: ClipboardOptions::default(),
            playback: PlaybackOptions::default(),
            record: RecordOptions::default(),
            display: DisplayOptions::default(),
            cursor: CursorOptions::default(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Validates that every enabled channel has its mandatory callbacks
    /// (spec.md §4.6). Called by `connect` before any socket is opened.
    pub fn validate(&self) -> Result<()> {
        if self.clipboard.enable && self.clipboard.callbacks.is_none() {
            return Err(SpiceError::Configuration(
                "clipboard enabled but notice/data/release/request callbacks missing".into(),
            ));
        }
        if self.playback.enable && self.playback.callbacks.is_none() {
            return Err(SpiceError::Configuration(
                "playback enabled but start/stop/data callbacks missing".into(),
            ));
        }
        if self.record.enable && self.record.callbacks.is_none() {
            return Err(SpiceError::Configuration(
                "record enabled but start/stop callbacks missing".into(),
            ));
        }
        if self.display.enable && self.display.callbacks.is_none() {
            return Err(SpiceError::Configuration(
                "display enabled but surfaceCreate/surfaceDestroy/drawBitmap/drawFill callbacks missing".into(),
            ));
        }
        match &self.endpoint {
            Endpoint::Tcp { host, .. } => {
                if host.parse::<std::net::Ipv4Addr>().is_err() {
                    return Err(SpiceError::Configuration(format!(
                        "host {host:?} is not a valid IPv4 literal"
                    )));
                }
            }
            Endpoint::Unix { path } => {
                if path.len() >= 108 {
                    return Err(SpiceError::Configuration(
                        "unix socket path exceeds sun_path length".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_zero_selects_unix_endpoint() {
        let cfg = SessionConfig::new("/tmp/spice.sock", 0);
        assert!(matches!(cfg.endpoint, Endpoint::Unix { .. }));
    }

    #[test]
    fn validate_rejects_enabled_channel_without_callbacks() {
        let mut cfg = SessionConfig::new("127.0.0.1", 5900);
        cfg.display.enable = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_ipv4_host() {
        let cfg = SessionConfig::new("not-an-ip", 5900);
        assert!(cfg.validate().is_err());
    }
}
