//! Typed error surfaces. Configuration and protocol faults get their
//! own `thiserror` enums so callers can match on them; everything else
//! (socket setup, fatal I/O) is propagated as `anyhow::Error` at the
//! process boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal at startup: a bad flag or an unusable shared folder.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("multicast group '{0}' is not a valid IPv4 address")]
    InvalidMulticastAddr(String),

    #[error("command port must be greater than 0")]
    InvalidPort,

    #[error("handshake timeout must be between 1 and 300 seconds, got {0}")]
    InvalidTimeout(u64),

    #[error("shared folder '{0}' does not exist or is not a directory")]
    BadSharedFolder(PathBuf),
}

/// Recoverable faults caused by a malformed or out-of-protocol
/// request from a peer. These are logged locally; the dispatcher
/// keeps running.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("datagram too short ({0} bytes)")]
    DatagramTooShort(usize),

    #[error("unrecognized command tag")]
    UnknownCommand,

    #[error("HELLO must carry an empty payload")]
    HelloPayloadNotEmpty,

    #[error("{0} requires a non-empty basename")]
    EmptyBasename(&'static str),

    #[error("ADD requires the complex datagram form")]
    AddMissingComplexForm,
}

/// Faults local to a single transfer task. Fatal to that task only.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("timed out waiting {0:?} for peer to connect")]
    HandshakeTimeout(std::time::Duration),

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("cancelled by shutdown signal")]
    Cancelled,

    #[error("peer closed before {expected} bytes arrived (got {got})")]
    ShortUpload { expected: u64, got: u64 },

    #[error("short write to {path}: wrote {wrote} of {want}")]
    ShortWrite {
        path: PathBuf,
        wrote: usize,
        want: usize,
    },

    #[error("could not open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error during transfer: {0}")]
    Io(#[from] std::io::Error),
}
