//! Async facade composing provisioning, staging, execution, and parsing.
//!
//! All blocking work runs on tokio's blocking pool; callers await futures and
//! never block their own executor on subprocess I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument, warn};

use crate::core::env::worker_env;
use crate::core::job::{GenerationParams, JobSpecBuilder};
use crate::core::progress::{Progress, classify_line};
use crate::core::protocol::parse_execution;
use crate::core::status_log::StatusLog;
use crate::core::style::Style;
use crate::core::types::{ProvisionState, StreamKind, WorkerKind};
use crate::error::BridgeError;
use crate::io::config::BridgeConfig;
use crate::io::layout::RuntimeLayout;
use crate::io::process::{ProcessRunner, RunRequest, SystemRunner};
use crate::io::provision::{ProvisionReport, ProvisionSettings, Provisioner};
use crate::io::scripts::{materialize_worker_scripts, select_worker};
use crate::io::staging::{StagedPaths, stage};

/// Successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    /// Image written by the worker. Owned by the caller from here on.
    pub output_path: PathBuf,
    /// Staging token of the job.
    pub token: String,
    pub worker: WorkerKind,
    pub elapsed: Duration,
}

/// Entry point for the application. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    layout: RuntimeLayout,
    config: BridgeConfig,
    runner: Arc<dyn ProcessRunner>,
    provisioner: Provisioner,
    status: Mutex<StatusLog>,
    jobs: Semaphore,
}

impl Bridge {
    pub fn new(layout: RuntimeLayout, config: BridgeConfig) -> Self {
        Self::with_runner(layout, config, Arc::new(SystemRunner))
    }

    pub fn with_runner(
        layout: RuntimeLayout,
        config: BridgeConfig,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let provisioner = Provisioner::new(
            layout.clone(),
            ProvisionSettings::from_config(&config, &layout),
            runner.clone(),
        );
        let status = StatusLog::new(config.status_log_capacity);
        let jobs = Semaphore::new(config.max_concurrent_jobs.max(1));
        Self {
            inner: Arc::new(Inner {
                layout,
                config,
                runner,
                provisioner,
                status: Mutex::new(status),
                jobs,
            }),
        }
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.inner.layout
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn provision_state(&self) -> ProvisionState {
        self.inner.provisioner.state()
    }

    /// Snapshot of the rolling status log, oldest first.
    pub fn status_lines(&self) -> Vec<String> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .map(str::to_string)
            .collect()
    }

    /// Provision the runtime if needed. Cheap after the first success.
    pub async fn initialize(&self) -> Result<ProvisionReport, BridgeError> {
        self.provision(false).await
    }

    /// Re-run dependency installation and script materialization even when ready.
    pub async fn reprovision(&self) -> Result<ProvisionReport, BridgeError> {
        self.provision(true).await
    }

    async fn provision(&self, force: bool) -> Result<ProvisionReport, BridgeError> {
        let inner = self.inner.clone();
        let result = run_in_background(move || inner.provisioner.ensure_ready(force)).await;
        match &result {
            Ok(report) => self.inner.push_status(format!("✓ Ready! {}.", report.message())),
            Err(err) => self
                .inner
                .push_status(format!("✗ Failed to initialize: {}", err.status_line())),
        }
        result
    }

    /// Run one generation job.
    pub async fn generate(
        &self,
        params: GenerationParams,
    ) -> Result<GenerationOutput, BridgeError> {
        self.generate_with_progress(params, None).await
    }

    /// Run one generation job, sending stage and percentage updates to
    /// `progress` while the worker runs. All updates are sent before the
    /// returned future completes.
    pub async fn generate_with_progress(
        &self,
        params: GenerationParams,
        progress: Option<UnboundedSender<Progress>>,
    ) -> Result<GenerationOutput, BridgeError> {
        let _permit = self
            .inner
            .jobs
            .acquire()
            .await
            .map_err(|_| BridgeError::Internal(anyhow!("job queue closed")))?;

        let style = Style::resolve(&params.style);
        self.inner
            .push_status(format!("Starting generation with {style} style..."));

        let inner = self.inner.clone();
        let result =
            run_in_background(move || inner.run_job(&params, progress.as_ref())).await;
        match &result {
            Ok(output) => {
                self.inner.push_status("✓ Generation complete!");
                self.inner
                    .push_status(format!("Saved to: {}", output.output_path.display()));
            }
            Err(err) => self
                .inner
                .push_status(format!("✗ Generation failed: {}", err.status_line())),
        }
        result
    }
}

impl Inner {
    fn push_status(&self, message: impl AsRef<str>) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Blocking body of one job. Staged files are removed on every path out,
    /// including a panic in the runner.
    #[instrument(skip_all, fields(style = %params.style))]
    fn run_job(
        &self,
        params: &GenerationParams,
        progress: Option<&UnboundedSender<Progress>>,
    ) -> Result<GenerationOutput, BridgeError> {
        let interpreter = self.config.worker_interpreter(&self.layout);
        if !interpreter.exists() {
            return Err(BridgeError::RuntimeNotFound { interpreter });
        }

        let job = JobSpecBuilder::new(&self.config.model_id, self.config.force_cpu).build(params);
        let staged = stage(&self.layout, &job)
            .map_err(|e| BridgeError::Staging(format!("{e:#}")))?;

        let result = self.execute_staged(&interpreter, staged.paths(), progress);

        let report = staged.cleanup();
        if !report.failures.is_empty() {
            warn!(
                failures = report.failures.len(),
                "some staged files could not be removed"
            );
        }
        result
    }

    fn execute_staged(
        &self,
        interpreter: &Path,
        paths: &StagedPaths,
        progress: Option<&UnboundedSender<Progress>>,
    ) -> Result<GenerationOutput, BridgeError> {
        let worker = select_worker(&self.layout, &self.config.accelerated_models);
        let script = self.layout.script_for(worker).to_path_buf();
        if !script.is_file() {
            warn!(script = %script.display(), "worker script missing, rewriting");
            if let Err(e) = materialize_worker_scripts(&self.layout, &self.config.model_id) {
                warn!(err = %e, "failed to rewrite worker scripts");
            }
            if !script.is_file() {
                return Err(BridgeError::GenerationFailed(format!(
                    "worker script not found at {}",
                    script.display()
                )));
            }
        }

        let request = RunRequest::new(
            interpreter,
            self.config.generation_timeout(),
            self.config.output_limit_bytes,
        )
        .arg(&script)
        .arg("--params")
        .arg(&paths.params_path)
        .envs(worker_env(self.config.worker_threads));

        let sink = |_stream: StreamKind, line: &str| {
            if let Some(tx) = progress
                && let Some(update) = classify_line(line)
            {
                let _ = tx.send(update);
            }
        };

        info!(token = %paths.token, worker = ?worker, "starting worker");
        let record = self.runner.run(&request, &sink).map_err(|e| {
            BridgeError::GenerationFailed(format!("failed to launch worker: {e:#}"))
        })?;
        if record.timed_out {
            return Err(BridgeError::TimedOut {
                timeout_secs: self.config.generation_timeout_secs,
            });
        }

        let output_path = parse_execution(&record)?;
        info!(
            output = %output_path.display(),
            elapsed_ms = record.elapsed.as_millis() as u64,
            "generation finished"
        );
        Ok(GenerationOutput {
            output_path,
            token: paths.token.clone(),
            worker,
            elapsed: record.elapsed,
        })
    }
}

/// Run blocking work on the blocking pool; a panic becomes `Internal`.
async fn run_in_background<T, F>(op: F) -> Result<T, BridgeError>
where
    F: FnOnce() -> Result<T, BridgeError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => result,
        Err(e) => Err(BridgeError::Internal(anyhow!("background task failed: {e}"))),
    }
}
