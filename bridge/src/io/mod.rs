//! Filesystem and subprocess side of the bridge.

pub mod config;
pub mod layout;
pub mod model_cache;
pub mod process;
pub mod provision;
pub mod schema;
pub mod scripts;
pub mod staging;
