//! On-disk layout of the runtime home.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use directories_next::ProjectDirs;

use crate::core::types::WorkerKind;

/// Environment variable overriding the runtime home directory.
pub const HOME_ENV: &str = "PICTURESQUE_HOME";

/// All canonical paths under the runtime home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub root: PathBuf,
    pub venv_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub outputs_dir: PathBuf,
    /// Compiled accelerated model variants live below this directory.
    pub models_dir: PathBuf,
    pub config_path: PathBuf,
    pub requirements_path: PathBuf,
    pub standard_script: PathBuf,
    pub accelerated_script: PathBuf,
}

impl RuntimeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let scripts_dir = root.join("scripts");
        Self {
            venv_dir: root.join("venv"),
            temp_dir: root.join("temp"),
            outputs_dir: root.join("outputs"),
            models_dir: root.join("CoreMLModels"),
            config_path: root.join("config.toml"),
            requirements_path: scripts_dir.join("requirements.txt"),
            standard_script: scripts_dir.join(WorkerKind::Standard.script_name()),
            accelerated_script: scripts_dir.join(WorkerKind::Accelerated.script_name()),
            scripts_dir,
            root,
        }
    }

    /// Interpreter inside the provisioned virtual environment.
    pub fn interpreter(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir.join("Scripts").join("python.exe")
        } else {
            self.venv_dir.join("bin").join("python3")
        }
    }

    pub fn script_for(&self, kind: WorkerKind) -> &Path {
        match kind {
            WorkerKind::Standard => &self.standard_script,
            WorkerKind::Accelerated => &self.accelerated_script,
        }
    }
}

/// Resolve the runtime home: explicit flag, then `PICTURESQUE_HOME`, then the
/// platform data directory.
pub fn resolve_home(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    ProjectDirs::from("", "", "Picturesque")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("could not determine a home directory; pass --home or set {HOME_ENV}"))
}
