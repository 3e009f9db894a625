//! Deterministic, pure logic shared by the bridge.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod env;
pub mod job;
pub mod naming;
pub mod progress;
pub mod protocol;
pub mod status_log;
pub mod style;
pub mod types;
