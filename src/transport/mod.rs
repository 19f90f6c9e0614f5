//! The `transport` module is responsible for network communication with the
//! device: the TCP acceptor, the per-connection pipeline and the ack reply.
//!
//! Only one session runs at a time. The `session` slot makes that explicit so
//! the acceptor can either leave extra connection attempts in the backlog or
//! turn them away.

pub mod ack;
pub mod server;
pub mod session;

pub use ack::send_ack;
pub use server::{IngestServer, SessionStats, handle_connection};
pub use session::{SessionGuard, SessionSlot};
