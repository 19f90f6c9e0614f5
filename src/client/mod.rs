//! The `client` module is the device side of the protocol.
//!
//! - `sender`: one-message-in-flight delivery with ack wait, retry and backoff.
//! - `device`: a simulated device that builds log entries and heartbeats and
//!   owns the per-boot sequence counter.

pub mod device;
pub mod sender;

pub use device::{DemoSummary, Device, FixedStats, SimulatedStats, StatsSource};
pub use sender::{Backoff, Delivery, SendState, Sender, SenderConfig};

#[cfg(test)]
mod tests;
