//! Bridge configuration stored at `<home>/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::job::DEFAULT_MODEL_ID;
use crate::core::status_log::DEFAULT_CAPACITY;
use crate::io::layout::RuntimeLayout;

/// Bridge configuration (TOML).
///
/// Missing fields take their defaults, so an empty or absent file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interpreter used to create the virtual environment.
    pub base_interpreter: PathBuf,

    /// Run workers with this interpreter instead of the environment's own.
    pub interpreter_override: Option<PathBuf>,

    /// Diffusion model handed to the worker.
    pub model_id: String,

    pub force_cpu: bool,

    /// Thread cap for the worker's numeric libraries.
    pub worker_threads: u32,

    /// Wall-clock bound on one worker run, in seconds.
    pub generation_timeout_secs: u64,

    /// Wall-clock bound on each provisioning subprocess, in seconds.
    pub provision_timeout_secs: u64,

    /// Keep at most this many bytes of each output stream in memory.
    pub output_limit_bytes: usize,

    pub status_log_capacity: usize,

    pub max_concurrent_jobs: usize,

    /// Compiled accelerated model directories, relative to the models dir.
    pub accelerated_models: Vec<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_interpreter: PathBuf::from("/usr/bin/python3"),
            interpreter_override: None,
            model_id: DEFAULT_MODEL_ID.to_string(),
            force_cpu: true,
            worker_threads: 4,
            generation_timeout_secs: 30 * 60,
            provision_timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
            status_log_capacity: DEFAULT_CAPACITY,
            max_concurrent_jobs: 1,
            accelerated_models: vec![
                PathBuf::from("apple_coreml-stable-diffusion-v1-5/original/compiled"),
                PathBuf::from("apple_coreml-stable-diffusion-2-1-base/original/compiled"),
            ],
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_interpreter.as_os_str().is_empty() {
            return Err(anyhow!("base_interpreter must not be empty"));
        }
        if self
            .interpreter_override
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            return Err(anyhow!("interpreter_override must not be empty when set"));
        }
        if self.model_id.trim().is_empty() {
            return Err(anyhow!("model_id must not be empty"));
        }
        if self.worker_threads == 0 {
            return Err(anyhow!("worker_threads must be > 0"));
        }
        if self.generation_timeout_secs == 0 {
            return Err(anyhow!("generation_timeout_secs must be > 0"));
        }
        if self.provision_timeout_secs == 0 {
            return Err(anyhow!("provision_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.status_log_capacity == 0 {
            return Err(anyhow!("status_log_capacity must be > 0"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(anyhow!("max_concurrent_jobs must be > 0"));
        }
        Ok(())
    }

    /// Interpreter that runs the worker scripts.
    pub fn worker_interpreter(&self, layout: &RuntimeLayout) -> PathBuf {
        self.interpreter_override
            .clone()
            .unwrap_or_else(|| layout.interpreter())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BridgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        let cfg = BridgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BridgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
