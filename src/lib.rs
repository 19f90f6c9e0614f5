//! # ackline
//!
//! `ackline` ingests telemetry from a single embedded device over one
//! persistent TCP connection. The device sends newline-delimited JSON log
//! entries and heartbeats; the server archives each valid one and answers
//! with `{"ack":1}`. Anything the device does not see acknowledged, it sends
//! again.
//!
//! ## Core Modules
//!
//! - `protocol`: wire messages, line framing and validation.
//! - `persistence`: the append-only audit log of received messages.
//! - `transport`: the TCP acceptor, connection handler and ack responder.
//! - `client`: the device-side sender state machine and a device simulator.
//! - `config`: loading settings from file, environment and defaults.
//! - `utils`: error types and logging setup.

pub mod client;
pub mod config;
pub mod persistence;
pub mod protocol;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
