//! Testing utilities and mock implementations
//!
//! Lets the session and publish paths be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
