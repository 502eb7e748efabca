//! # purespice
//!
//! An embeddable, pure Rust implementation of the SPICE remote-desktop
//! client protocol: link handshake, mini-header framing, the six client
//! channels (MAIN/INPUTS/PLAYBACK/RECORD/DISPLAY/CURSOR), and the guest
//! agent clipboard sub-protocol, driven from a single cooperative
//! `process` loop.
//!
//! ## Quick start
//!
//! ```no_run
//! use purespice::{SessionConfig, Session};
//!
//! # async fn run() -> purespice::Result<()> {
//! let config = SessionConfig::new("127.0.0.1", 5900).with_password("secret");
//! let session = Session::connect(config).await?;
//! loop {
//!     match session.process(1000).await? {
//!         purespice::ProcessStatus::Run => {}
//!         purespice::ProcessStatus::Shutdown => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`session`] — the top-level handle: channel table, `connect`/
//!   `process`/`disconnect`, and every outbound API method.
//! - [`channel`] — the shared read/dispatch loop and the six per-kind
//!   channel modules.
//! - [`wire`] — framing primitives: the mini-header, capability bitsets,
//!   and the link-stage structs.
//! - [`agent`] — the guest-agent sub-protocol tunnelled over
//!   `MAIN_AGENT_DATA`.
//! - [`mouse`] — shared mouse-button and motion-ack state.
//! - [`config`] — `SessionConfig` and the per-channel option groups.
//! - [`callbacks`] — the `FnMut`-based callback contract.
//! - [`error`] — [`SpiceError`] and the crate's [`Result`] alias.
//!
//! ## Logging
//!
//! This crate emits [`tracing`] events; call [`init`] once at startup to
//! install a default `tracing-subscriber` formatter driven by `RUST_LOG`
//! (or any level filter you'd rather configure), or install your own
//! subscriber and skip it entirely.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod agent;
pub mod callbacks;
pub mod channel;
pub mod config;
pub mod error;
pub mod mouse;
pub mod session;
pub mod transport;
pub mod wire;

pub use agent::ClipboardType;
pub use callbacks::{
    ClipboardCallbacks, CursorCallbacks, DisplayCallbacks, DrawBitmap, NotifyCallback,
    PlaybackCallbacks, ReadyCallback, RecordCallbacks,
};
pub use channel::cursor::CursorShape;
pub use channel::display::{DisplaySurfaceFormat, PixelFormat};
pub use channel::playback::AudioFormat;
pub use channel::ChannelKind;
pub use config::{
    ClipboardOptions, CursorOptions, DisplayOptions, Endpoint, InputsOptions, PlaybackOptions,
    RecordOptions, SessionConfig,
};
pub use error::{Result, SpiceError};
pub use mouse::MouseButton;
pub use session::{ProcessStatus, ServerInfo, Session};

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a default `tracing-subscriber` formatter reading its filter
/// from `RUST_LOG` (falling back to `info`). Idempotent: calling it more
/// than once, from any number of threads, only installs the subscriber on
/// the first call (spec.md §8: "`init(); init();` is idempotent").
///
/// A host that already manages its own `tracing` subscriber can skip this
/// entirely — every event this crate emits goes through the standard
/// `tracing` dispatch, not a private logger.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
