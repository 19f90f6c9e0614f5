//! The `persistence` module archives every accepted message.
//!
//! The archive is an append-only, newline-delimited JSON file of envelopes,
//! each pairing the server's receipt time with the message exactly as the
//! device sent it.

pub mod audit_log;

pub use audit_log::{AuditLog, EnvelopeSink};
