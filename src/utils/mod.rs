//! The `utils` module provides definitions shared across `ackline`:
//! the error taxonomy and tracing setup.

pub mod error;
pub mod logging;
