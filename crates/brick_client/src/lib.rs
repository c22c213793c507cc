//! Async client for the simulated bricks.
//!
//! Speaks the same fixed-frame JSON protocol as a real brick connection, so
//! robot programs and load tests can drive the simulator over TCP.

pub mod client;
pub mod error;

pub use client::BrickClient;
pub use error::{ClientError, Result};
