//! Stable exit codes for `picturesque` CLI commands.

use crate::error::ErrorKind;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, configuration, or an internal error.
pub const INVALID: i32 = 1;
/// The worker interpreter is missing (run `picturesque setup`).
pub const RUNTIME_NOT_FOUND: i32 = 10;
/// Environment creation, dependency installation, or script setup failed.
pub const PROVISION_FAILED: i32 = 11;
/// The worker exited non-zero or could not be launched.
pub const GENERATION_FAILED: i32 = 12;
/// The worker exited zero without a parseable success record.
pub const INVALID_OUTPUT: i32 = 13;
/// The worker exceeded the configured generation timeout.
pub const TIMED_OUT: i32 = 14;

/// Map a classified bridge failure to its CLI exit code.
pub fn for_kind(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::RuntimeNotFound => RUNTIME_NOT_FOUND,
        ErrorKind::EnvironmentCreationFailed
        | ErrorKind::DependencyInstallFailed
        | ErrorKind::Setup => PROVISION_FAILED,
        ErrorKind::Staging | ErrorKind::GenerationFailed => GENERATION_FAILED,
        ErrorKind::InvalidOutput => INVALID_OUTPUT,
        ErrorKind::TimedOut => TIMED_OUT,
        ErrorKind::Internal => INVALID,
    }
}
