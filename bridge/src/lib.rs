//! Out-of-process generation bridge for the Picturesque cartoonizer.
//!
//! The bridge provisions an isolated Python runtime, submits generation jobs
//! to worker processes (at most `max_concurrent_jobs` in flight), and turns
//! each worker's chatty output into a typed result. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (style presets, job building,
//!   output protocol parsing, progress classification). No I/O.
//! - **[`io`]**: Side-effecting operations (runtime layout, configuration,
//!   provisioning, staging, process execution).
//!
//! [`bridge::Bridge`] composes both into the async facade the application
//! calls.

pub mod bridge;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use bridge::{Bridge, GenerationOutput};
pub use error::{BridgeError, ErrorKind};
