//! Error types for the SPICE client protocol engine.

use thiserror::Error;

/// Errors that can occur while driving a SPICE session.
///
/// Configuration errors fail `connect` before any socket is opened.
/// Network and protocol errors terminate the offending channel (and, for
/// the main channel, the whole session). Crypto errors fail the link
/// handshake. This maps directly onto the taxonomy in spec.md §7.
#[derive(Error, Debug)]
pub enum SpiceError {
    /// Underlying socket I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `connect` was called with an invalid configuration: a missing
    /// mandatory callback for an enabled channel, or an address that could
    /// not be resolved.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A connection error occurred.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The peer violated the wire protocol: bad magic, version mismatch,
    /// undersized reply, unexpected message, duplicate init, and so on.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server's SPICE protocol major version is incompatible.
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The protocol version expected by the client.
        expected: u32,
        /// The protocol version reported by the server.
        actual: u32,
    },

    /// An error occurred in a specific SPICE channel.
    #[error("Channel error: {0}")]
    Channel(String),

    /// RSA key parsing or OAEP encryption of the ticket failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Authentication with the SPICE server failed (non-OK link result).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The motion-ack discipline observed more acks than outstanding
    /// motion packets could account for.
    #[error("motion-ack underflow on inputs channel")]
    MotionAckUnderflow,

    /// The agent sub-protocol token or clipboard reassembly state was
    /// violated by the peer.
    #[error("agent protocol error: {0}")]
    Agent(String),

    /// A requested channel kind is not connected.
    #[error("channel not connected: {0}")]
    NotConnected(String),

    /// The connection to the SPICE server was closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// A type alias for `Result<T, SpiceError>`.
pub type Result<T> = std::result::Result<T, SpiceError>;

/// Per-message handler outcome (spec.md §7). `Ok` continues the read loop on
/// that channel; `NoData` closes the owning channel without tearing down the
/// rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Ok,
    NoData,
}
