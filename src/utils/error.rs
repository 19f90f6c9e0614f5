//! The `error` module defines the error types used within `ackline`.
//!
//! Errors are grouped by who owns the recovery: fatal startup errors stop the
//! server, protocol and sink errors are logged and swallowed by the connection
//! handler, and send errors drive the device-side retry loop.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Startup failures. Any of these aborts the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not resolve listen address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listen address {0} resolved to nothing")]
    NoAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to open audit log {path}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A candidate line that is not a valid message. The line is dropped and no
/// ack is sent.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Append failures. Logged; never blocks the ack.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write audit log: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
#[error("failed to send ack: {0}")]
pub struct AckError(#[from] pub io::Error);

/// One failed delivery attempt on the device side.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("no ack within timeout")]
    AckTimeout,

    #[error("invalid ack: {0}")]
    InvalidAck(String),
}

impl SendError {
    /// Transport failures tear down the connection; the next attempt reconnects.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SendError::Connect(_)
                | SendError::ConnectTimeout
                | SendError::Write(_)
                | SendError::Read(_)
                | SendError::Closed
        )
    }
}

/// A message the sender gave up on. The caller's sequence state is untouched.
#[derive(Debug, Error)]
#[error("delivery failed after {attempts} attempt(s): {last_error}")]
pub struct DeliveryFailed {
    pub attempts: u32,
    #[source]
    pub last_error: SendError,
}
