//! Typed failures surfaced at the bridge boundary.
//!
//! Internal helpers return `anyhow::Result`; everything the facade hands back
//! to its caller is a [`BridgeError`], classified by [`ErrorKind`].

use std::path::PathBuf;

use thiserror::Error;

use crate::core::protocol::worker_reported_error;

/// Failure of an `initialize` or `generate` call.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The worker interpreter does not exist; the runtime must be provisioned.
    #[error(
        "worker interpreter not found at {}; run `picturesque setup` to provision the runtime",
        .interpreter.display()
    )]
    RuntimeNotFound { interpreter: PathBuf },

    /// The environment-creation subprocess failed.
    #[error("failed to create runtime environment: {0}")]
    EnvironmentCreationFailed(String),

    /// The dependency-installation subprocess failed.
    #[error("failed to install worker dependencies: {0}")]
    DependencyInstallFailed(String),

    /// Writing worker scripts, manifests, or runtime directories failed.
    #[error("runtime setup failed: {0}")]
    Setup(String),

    /// Copying the input or writing the parameter file failed.
    #[error("failed to stage job files: {0}")]
    Staging(String),

    /// The worker exited non-zero (detail is its stderr) or could not be launched.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// The worker exited zero without a parseable success record.
    #[error("worker produced no success record; output: {0}")]
    InvalidOutput(String),

    /// The worker was killed after exceeding the configured timeout.
    #[error("worker timed out after {timeout_secs} seconds")]
    TimedOut { timeout_secs: u64 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Stable classification of a [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RuntimeNotFound,
    EnvironmentCreationFailed,
    DependencyInstallFailed,
    Setup,
    Staging,
    GenerationFailed,
    InvalidOutput,
    TimedOut,
    Internal,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::RuntimeNotFound { .. } => ErrorKind::RuntimeNotFound,
            BridgeError::EnvironmentCreationFailed(_) => ErrorKind::EnvironmentCreationFailed,
            BridgeError::DependencyInstallFailed(_) => ErrorKind::DependencyInstallFailed,
            BridgeError::Setup(_) => ErrorKind::Setup,
            BridgeError::Staging(_) => ErrorKind::Staging,
            BridgeError::GenerationFailed(_) => ErrorKind::GenerationFailed,
            BridgeError::InvalidOutput(_) => ErrorKind::InvalidOutput,
            BridgeError::TimedOut { .. } => ErrorKind::TimedOut,
            BridgeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// One-line summary for the rolling status log.
    ///
    /// Worker failures carry a full traceback; the log shows the worker's own
    /// structured error when present, otherwise the last non-empty stderr line.
    pub fn status_line(&self) -> String {
        match self {
            BridgeError::GenerationFailed(detail) => worker_reported_error(detail)
                .or_else(|| {
                    detail
                        .lines()
                        .rev()
                        .map(str::trim)
                        .find(|line| !line.is_empty())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| self.to_string()),
            other => other.to_string(),
        }
    }
}
