//! The `protocol` module defines the newline-delimited JSON wire format shared
//! by the ingest server and the device.
//!
//! - `message`: log entries, heartbeats, the ack and the archive envelope.
//! - `framer`: splits a byte stream into candidate lines.
//! - `validate`: turns a candidate line into an accepted message or a drop.

pub mod framer;
pub mod message;
pub mod validate;

pub use framer::{Frame, LineFramer};
pub use message::{
    ACK_LINE, Ack, Envelope, Heartbeat, Inbound, LogEntry, Message, MessageKind, SystemStats,
};
pub use validate::classify;

/// Longest accepted line, terminator excluded.
pub const MAX_LINE_BYTES: usize = 16 * 1024;
