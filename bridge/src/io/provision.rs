//! Runtime provisioner: virtual environment, pinned dependencies, worker scripts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::env::runtime_env;
use crate::core::types::ProvisionState;
use crate::error::BridgeError;
use crate::io::config::BridgeConfig;
use crate::io::layout::RuntimeLayout;
use crate::io::process::{ProcessRunner, RunRequest, discard_lines};
use crate::io::scripts::materialize_worker_scripts;

/// Pinned dependency manifest installed into the environment.
pub const REQUIREMENTS: &str = include_str!("../../worker/requirements.txt");

/// Inputs for provisioning, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSettings {
    /// Interpreter that creates the environment.
    pub base_interpreter: PathBuf,
    /// Interpreter that installs dependencies and later runs the worker.
    pub interpreter: PathBuf,
    pub model_id: String,
    /// Bound on each provisioning subprocess.
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ProvisionSettings {
    pub fn from_config(config: &BridgeConfig, layout: &RuntimeLayout) -> Self {
        Self {
            base_interpreter: config.base_interpreter.clone(),
            interpreter: config.worker_interpreter(layout),
            model_id: config.model_id.clone(),
            timeout: config.provision_timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

/// What one `ensure_ready` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// The runtime was already ready; nothing ran.
    pub already_ready: bool,
    pub created_environment: bool,
    pub installed_dependencies: bool,
    pub scripts: Vec<PathBuf>,
}

impl ProvisionReport {
    pub fn message(&self) -> &'static str {
        if self.already_ready {
            "Runtime already initialized"
        } else {
            "Runtime environment initialized"
        }
    }
}

/// Owns the provisioning state of one runtime home.
///
/// `ensure_ready` is serialized internally: concurrent callers wait for the
/// one in progress and then observe its outcome.
pub struct Provisioner {
    layout: RuntimeLayout,
    settings: ProvisionSettings,
    runner: Arc<dyn ProcessRunner>,
    state: Mutex<ProvisionState>,
    gate: Mutex<()>,
}

impl Provisioner {
    pub fn new(
        layout: RuntimeLayout,
        settings: ProvisionSettings,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            layout,
            settings,
            runner,
            state: Mutex::new(ProvisionState::Unprovisioned),
            gate: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ProvisionState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: ProvisionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Bring the runtime to `Ready`. A no-op once ready unless `force` is set.
    ///
    /// Blocking: spawns the environment and installer subprocesses.
    #[instrument(skip_all, fields(force, root = %self.layout.root.display()))]
    pub fn ensure_ready(&self, force: bool) -> Result<ProvisionReport, BridgeError> {
        if !force && self.state().is_ready() {
            return Ok(already_ready());
        }
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !force && self.state().is_ready() {
            return Ok(already_ready());
        }

        self.set_state(ProvisionState::Provisioning);
        match self.provision() {
            Ok(report) => {
                info!(
                    created_environment = report.created_environment,
                    "runtime ready"
                );
                self.set_state(ProvisionState::Ready);
                Ok(report)
            }
            Err(err) => {
                warn!(err = %err, "provisioning failed");
                self.set_state(ProvisionState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    fn provision(&self) -> Result<ProvisionReport, BridgeError> {
        let mut report = ProvisionReport::default();

        if !self.layout.venv_dir.is_dir() {
            info!(venv = %self.layout.venv_dir.display(), "creating virtual environment");
            let request = self
                .request(&self.settings.base_interpreter)
                .arg("-m")
                .arg("venv")
                .arg(&self.layout.venv_dir);
            self.run_step(&request, BridgeError::EnvironmentCreationFailed)?;
            report.created_environment = true;
        }

        fs::create_dir_all(&self.layout.scripts_dir)
            .and_then(|()| fs::write(&self.layout.requirements_path, REQUIREMENTS))
            .map_err(|e| {
                BridgeError::Setup(format!(
                    "write {}: {e}",
                    self.layout.requirements_path.display()
                ))
            })?;

        info!("installing dependencies");
        let request = self
            .request(&self.settings.interpreter)
            .arg("-m")
            .arg("pip")
            .arg("install")
            .arg("-r")
            .arg(&self.layout.requirements_path)
            .arg("--quiet")
            .envs(runtime_env());
        self.run_step(&request, BridgeError::DependencyInstallFailed)?;
        report.installed_dependencies = true;

        report.scripts = materialize_worker_scripts(&self.layout, &self.settings.model_id)
            .map_err(|e| BridgeError::Setup(format!("{e:#}")))?;
        Ok(report)
    }

    fn request(&self, program: &Path) -> RunRequest {
        RunRequest::new(
            program,
            self.settings.timeout,
            self.settings.output_limit_bytes,
        )
    }

    fn run_step(
        &self,
        request: &RunRequest,
        failed: fn(String) -> BridgeError,
    ) -> Result<(), BridgeError> {
        let record = self
            .runner
            .run(request, &discard_lines)
            .map_err(|e| failed(format!("{e:#}")))?;
        if record.timed_out {
            return Err(BridgeError::TimedOut {
                timeout_secs: request.timeout.as_secs(),
            });
        }
        if !record.success() {
            return Err(failed(record.failure_detail()));
        }
        Ok(())
    }
}

fn already_ready() -> ProvisionReport {
    ProvisionReport {
        already_ready: true,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{ScriptedRun, ScriptedRunner};

    fn provisioner(
        temp: &tempfile::TempDir,
        runs: Vec<ScriptedRun>,
    ) -> (Provisioner, Arc<ScriptedRunner>) {
        let layout = RuntimeLayout::new(temp.path());
        let config = BridgeConfig::default();
        let settings = ProvisionSettings::from_config(&config, &layout);
        let runner = Arc::new(ScriptedRunner::new(runs));
        let provisioner = Provisioner::new(layout, settings, runner.clone());
        (provisioner, runner)
    }

    #[test]
    fn fresh_runtime_creates_env_installs_and_writes_scripts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (provisioner, runner) =
            provisioner(&temp, vec![ScriptedRun::ok(), ScriptedRun::ok()]);
        let layout = RuntimeLayout::new(temp.path());

        let report = provisioner.ensure_ready(false).expect("ready");
        assert!(report.created_environment);
        assert!(report.installed_dependencies);
        assert_eq!(report.scripts, vec![layout.standard_script.clone()]);
        assert_eq!(provisioner.state(), ProvisionState::Ready);

        let requests = runner.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(
            requests[0].args,
            vec![
                OsString::from("-m"),
                OsString::from("venv"),
                layout.venv_dir.clone().into_os_string(),
            ]
        );
        assert_eq!(requests[1].program, layout.interpreter());
        assert_eq!(
            requests[1].args[..4],
            [
                OsString::from("-m"),
                OsString::from("pip"),
                OsString::from("install"),
                OsString::from("-r"),
            ]
        );
        assert!(
            requests[1]
                .env
                .iter()
                .any(|(key, _)| key == "OBJC_DISABLE_INITIALIZE_FORK_SAFETY")
        );
        assert_eq!(
            fs::read_to_string(&layout.requirements_path).expect("requirements"),
            REQUIREMENTS
        );
        assert!(layout.standard_script.is_file());
    }

    #[test]
    fn second_call_is_a_no_op() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (provisioner, runner) =
            provisioner(&temp, vec![ScriptedRun::ok(), ScriptedRun::ok()]);
        provisioner.ensure_ready(false).expect("first");
        let report = provisioner.ensure_ready(false).expect("second");
        assert!(report.already_ready);
        assert_eq!(runner.requests().len(), 2);
    }

    #[test]
    fn existing_environment_still_installs_dependencies() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("venv")).expect("venv");
        let (provisioner, runner) = provisioner(&temp, vec![ScriptedRun::ok()]);
        let report = provisioner.ensure_ready(false).expect("ready");
        assert!(!report.created_environment);
        assert!(report.installed_dependencies);
        assert_eq!(runner.requests().len(), 1);
    }

    #[test]
    fn environment_failure_stops_before_install() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (provisioner, runner) = provisioner(
            &temp,
            vec![ScriptedRun::exit(1, "", "Error: ensurepip is not available\n")],
        );
        let err = provisioner.ensure_ready(false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EnvironmentCreationFailed);
        assert!(err.to_string().contains("ensurepip"));
        assert_eq!(runner.requests().len(), 1);
        assert!(matches!(provisioner.state(), ProvisionState::Failed(_)));
    }

    #[test]
    fn install_failure_is_retried_on_next_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (provisioner, runner) = provisioner(
            &temp,
            vec![
                ScriptedRun::ok(),
                ScriptedRun::exit(1, "", "ERROR: No matching distribution found for torch==2.1.2\n"),
                ScriptedRun::ok(),
                ScriptedRun::ok(),
            ],
        );
        let err = provisioner.ensure_ready(false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyInstallFailed);
        assert!(!provisioner.state().is_ready());

        provisioner.ensure_ready(false).expect("retry");
        assert!(provisioner.state().is_ready());
        assert_eq!(runner.requests().len(), 4);
    }

    #[test]
    fn spawn_error_maps_to_step_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (provisioner, _runner) = provisioner(
            &temp,
            vec![ScriptedRun::SpawnError("No such file or directory".to_string())],
        );
        let err = provisioner.ensure_ready(false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EnvironmentCreationFailed);
    }

    #[test]
    fn forced_call_reinstalls_when_ready() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (provisioner, runner) = provisioner(
            &temp,
            vec![ScriptedRun::ok(), ScriptedRun::ok(), ScriptedRun::ok()],
        );
        provisioner.ensure_ready(false).expect("first");
        fs::create_dir_all(temp.path().join("venv")).expect("venv");
        let report = provisioner.ensure_ready(true).expect("forced");
        assert!(!report.already_ready);
        assert!(report.installed_dependencies);
        assert_eq!(runner.requests().len(), 3);
    }

    #[test]
    fn concurrent_callers_provision_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (provisioner, runner) =
            provisioner(&temp, vec![ScriptedRun::ok(), ScriptedRun::ok()]);

        let reports: Vec<ProvisionReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| provisioner.ensure_ready(false)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("join").expect("ready"))
                .collect()
        });

        assert_eq!(runner.requests().len(), 2);
        assert_eq!(
            reports.iter().filter(|report| report.already_ready).count(),
            1
        );
        assert_eq!(provisioner.state(), ProvisionState::Ready);
    }
}
