//! Shared deterministic types for bridge core logic.
//!
//! These types define stable contracts between the process runner, the
//! protocol parser, and the facade. They hold no handles and do no I/O.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Which standard stream a worker line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Everything captured from one finished child process.
///
/// Both buffers are complete: the stream readers have been joined before the
/// record is built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionRecord {
    /// Exit code, or `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Older stdout bytes dropped to stay within the output limit.
    pub stdout_truncated: usize,
    /// Older stderr bytes dropped to stay within the output limit.
    pub stderr_truncated: usize,
    /// True when the bridge killed the process after its timeout.
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ExecutionRecord {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Stderr if non-empty, otherwise a generic exit-status message.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("process failed with exit code {code}"),
            None => "process terminated by a signal".to_string(),
        }
    }
}

/// Provisioning lifecycle of the runtime environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ProvisionState {
    Unprovisioned,
    Provisioning,
    Ready,
    Failed(String),
}

impl ProvisionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProvisionState::Ready)
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionState::Unprovisioned => f.write_str("unprovisioned"),
            ProvisionState::Provisioning => f.write_str("provisioning"),
            ProvisionState::Ready => f.write_str("ready"),
            ProvisionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Worker script flavour chosen for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Diffusers pipeline on CPU or GPU.
    Standard,
    /// Compiled on-device model variant.
    Accelerated,
}

impl WorkerKind {
    pub fn script_name(&self) -> &'static str {
        match self {
            WorkerKind::Standard => "cartoonizer_cli.py",
            WorkerKind::Accelerated => "cartoonizer_coreml.py",
        }
    }
}
