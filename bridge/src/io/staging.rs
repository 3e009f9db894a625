//! Per-job staged files: the input copy, the parameter file, and the output path.
//!
//! Every job gets a process-unique token; all three paths embed it, so
//! concurrent jobs never share a file. The input copy and parameter file are
//! removed when the job ends, either by [`StagedJob::cleanup`] or on drop.
//! The output file is the caller's result and is never removed here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::job::JobDescriptor;
use crate::io::layout::RuntimeLayout;
use crate::io::schema::validate_worker_params;

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<unix-millis>-<pid>-<counter>`, unique for the lifetime of the process.
pub fn next_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let counter = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{millis}-{}-{counter}", std::process::id())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPaths {
    pub token: String,
    pub input_path: PathBuf,
    pub params_path: PathBuf,
    pub output_path: PathBuf,
}

impl StagedPaths {
    fn new(layout: &RuntimeLayout, token: String, job: &JobDescriptor) -> Self {
        let input_ext = job
            .input_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "img".to_string());
        Self {
            input_path: layout.temp_dir.join(format!("input_{token}.{input_ext}")),
            params_path: layout.temp_dir.join(format!("params_{token}.json")),
            output_path: layout.outputs_dir.join(format!(
                "cartoon_{token}.{}",
                job.export_format.extension()
            )),
            token,
        }
    }
}

/// A secondary failure hit while removing a staged file.
#[derive(Debug)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

/// What cleanup removed and what it could not.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub failures: Vec<CleanupFailure>,
}

/// Staged files owned by one job.
#[derive(Debug)]
pub struct StagedJob {
    paths: StagedPaths,
    armed: bool,
}

impl StagedJob {
    pub fn paths(&self) -> &StagedPaths {
        &self.paths
    }

    /// Remove the input copy and parameter file. Never fails; problems are
    /// logged and returned in the report.
    pub fn cleanup(mut self) -> CleanupReport {
        self.armed = false;
        remove_staged(&self.paths)
    }
}

impl Drop for StagedJob {
    fn drop(&mut self) {
        if self.armed {
            remove_staged(&self.paths);
        }
    }
}

fn remove_staged(paths: &StagedPaths) -> CleanupReport {
    let mut report = CleanupReport::default();
    for path in [&paths.input_path, &paths.params_path] {
        match fs::remove_file(path) {
            Ok(()) => report.removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), err = %e, "failed to remove staged file");
                report.failures.push(CleanupFailure {
                    path: path.clone(),
                    error: e,
                });
            }
        }
    }
    debug!(token = %paths.token, removed = report.removed, "staged files cleaned up");
    report
}

/// Copy the job's input into the temp directory and write its parameter file.
///
/// The returned guard owns both files from the moment they are created, so a
/// failure halfway through leaves nothing behind.
#[instrument(skip_all, fields(input = %job.input_path.display()))]
pub fn stage(layout: &RuntimeLayout, job: &JobDescriptor) -> Result<StagedJob> {
    fs::create_dir_all(&layout.temp_dir)
        .with_context(|| format!("create {}", layout.temp_dir.display()))?;
    fs::create_dir_all(&layout.outputs_dir)
        .with_context(|| format!("create {}", layout.outputs_dir.display()))?;

    let staged = StagedJob {
        paths: StagedPaths::new(layout, next_token(), job),
        armed: true,
    };
    let paths = staged.paths();

    fs::copy(&job.input_path, &paths.input_path).with_context(|| {
        format!(
            "copy input {} to {}",
            job.input_path.display(),
            paths.input_path.display()
        )
    })?;

    let params = serde_json::to_value(job.worker_params(&paths.input_path, &paths.output_path))
        .context("serialize worker params")?;
    validate_worker_params(&params)?;
    write_json(&paths.params_path, &params)?;

    debug!(token = %paths.token, "job staged");
    Ok(staged)
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize params json")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;
    use crate::core::job::{GenerationParams, JobSpecBuilder};

    fn job_for(input: &Path) -> JobDescriptor {
        JobSpecBuilder::default().build(&GenerationParams::for_input(input))
    }

    fn setup() -> (tempfile::TempDir, RuntimeLayout, PathBuf) {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(temp.path().join("home"));
        let input = temp.path().join("Photo.PNG");
        fs::write(&input, b"not really a png").expect("input");
        (temp, layout, input)
    }

    #[test]
    fn stage_copies_input_and_writes_params() {
        let (_temp, layout, input) = setup();
        let staged = stage(&layout, &job_for(&input)).expect("stage");
        let paths = staged.paths().clone();

        assert!(paths.input_path.starts_with(&layout.temp_dir));
        assert!(paths.params_path.starts_with(&layout.temp_dir));
        assert!(paths.output_path.starts_with(&layout.outputs_dir));
        assert!(paths.input_path.to_string_lossy().ends_with(".png"));
        assert!(paths.output_path.to_string_lossy().contains(&paths.token));
        assert_eq!(
            fs::read(&paths.input_path).expect("copy"),
            b"not really a png"
        );

        let params: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.params_path).expect("params"))
                .expect("json");
        assert_eq!(params["input_path"], paths.input_path.display().to_string());
        assert_eq!(params["output_path"], paths.output_path.display().to_string());
        assert_eq!(params["style"], "anime");
        staged.cleanup();
    }

    #[test]
    fn cleanup_keeps_output_file() {
        let (_temp, layout, input) = setup();
        let staged = stage(&layout, &job_for(&input)).expect("stage");
        let paths = staged.paths().clone();
        fs::write(&paths.output_path, b"result").expect("output");

        let report = staged.cleanup();
        assert_eq!(report.removed, 2);
        assert!(report.failures.is_empty());
        assert!(!paths.input_path.exists());
        assert!(!paths.params_path.exists());
        assert!(paths.output_path.exists());
    }

    #[test]
    fn cleanup_tolerates_already_removed_files() {
        let (_temp, layout, input) = setup();
        let staged = stage(&layout, &job_for(&input)).expect("stage");
        fs::remove_file(&staged.paths().params_path).expect("remove");
        let report = staged.cleanup();
        assert_eq!(report.removed, 1);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn dropping_a_staged_job_removes_its_files() {
        let (_temp, layout, input) = setup();
        let paths = {
            let staged = stage(&layout, &job_for(&input)).expect("stage");
            staged.paths().clone()
        };
        assert!(!paths.input_path.exists());
        assert!(!paths.params_path.exists());
    }

    #[test]
    fn missing_input_leaves_nothing_behind() {
        let (temp, layout, _input) = setup();
        let err = stage(&layout, &job_for(&temp.path().join("gone.jpg"))).unwrap_err();
        assert!(format!("{err:#}").contains("copy input"));
        let leftovers = fs::read_dir(&layout.temp_dir).expect("temp dir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn concurrent_staging_uses_disjoint_paths() {
        let (_temp, layout, input) = setup();
        let job = job_for(&input);
        let staged: Vec<StagedJob> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| stage(&layout, &job).expect("stage")))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("join"))
                .collect()
        });

        let mut seen = HashSet::new();
        for job in &staged {
            let paths = job.paths();
            assert!(seen.insert(paths.input_path.clone()));
            assert!(seen.insert(paths.params_path.clone()));
            assert!(seen.insert(paths.output_path.clone()));
        }
        assert_eq!(seen.len(), 24);
    }

    #[test]
    fn tokens_never_repeat() {
        let tokens: HashSet<String> = (0..1000).map(|_| next_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }
}
