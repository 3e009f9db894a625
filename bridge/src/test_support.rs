//! Test-only helpers: a scripted process runner and a throwaway runtime home.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::bridge::Bridge;
use crate::core::job::GenerationParams;
use crate::core::types::{ExecutionRecord, StreamKind};
use crate::io::config::BridgeConfig;
use crate::io::layout::RuntimeLayout;
use crate::io::process::{LineSink, ProcessRunner, RunRequest, SystemRunner};

/// Canned outcome for one [`ScriptedRunner::run`] call.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Complete(ExecutionRecord),
    SpawnError(String),
    /// Panic inside the runner, as a crashing worker driver would.
    Panic(String),
}

impl ScriptedRun {
    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        ScriptedRun::Complete(ExecutionRecord {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..Default::default()
        })
    }

    pub fn ok() -> Self {
        Self::exit(0, "", "")
    }
}

/// Runner that replays scripted outcomes in order and records every request.
///
/// Output lines of completed runs are replayed through the sink. When a
/// request carries `--params <file>`, the file is parsed and kept so tests
/// can inspect it after cleanup removed it.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    runs: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<RunRequest>>,
    params: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedRunner {
    pub fn new(runs: impl IntoIterator<Item = ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn params_seen(&self) -> Vec<serde_json::Value> {
        self.params.lock().expect("params lock").clone()
    }

    fn capture_params(&self, request: &RunRequest) {
        let Some(pos) = request.args.iter().position(|arg| arg == "--params") else {
            return;
        };
        let Some(path) = request.args.get(pos + 1) else {
            return;
        };
        if let Ok(contents) = fs::read_to_string(path)
            && let Ok(value) = serde_json::from_str(&contents)
        {
            self.params.lock().expect("params lock").push(value);
        }
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, request: &RunRequest, sink: &LineSink<'_>) -> Result<ExecutionRecord> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.capture_params(request);

        let next = self.runs.lock().expect("runs lock").pop_front();
        match next {
            Some(ScriptedRun::Complete(record)) => {
                for line in record.stdout.lines() {
                    sink(StreamKind::Stdout, line);
                }
                for line in record.stderr.lines() {
                    sink(StreamKind::Stderr, line);
                }
                Ok(record)
            }
            Some(ScriptedRun::SpawnError(message)) => Err(anyhow!(message)),
            Some(ScriptedRun::Panic(message)) => panic!("{message}"),
            None => Err(anyhow!(
                "unexpected process run: {}",
                request.program.display()
            )),
        }
    }
}

/// A temporary runtime home with a fake interpreter, a worker script, and
/// an input photo.
pub struct TestHome {
    pub dir: TempDir,
    pub layout: RuntimeLayout,
    pub config: BridgeConfig,
    pub input: PathBuf,
}

impl TestHome {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(dir.path().join("home"));
        let interpreter = dir.path().join("bin").join("python3");
        write_file(&interpreter, "");
        write_file(&layout.standard_script, "# worker stub\n");

        let input = dir.path().join("photo.png");
        fs::write(&input, b"\x89PNG fake image").expect("write input");

        let config = BridgeConfig {
            interpreter_override: Some(interpreter),
            ..Default::default()
        };
        Self {
            dir,
            layout,
            config,
            input,
        }
    }

    /// Home whose worker is a `/bin/sh` script with `body`, run for real.
    pub fn with_shell_worker(body: &str) -> Self {
        let mut home = Self::new();
        home.config.interpreter_override = Some(PathBuf::from("/bin/sh"));
        write_file(&home.layout.standard_script, body);
        home
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams::for_input(&self.input)
    }

    pub fn bridge(&self, runner: Arc<dyn ProcessRunner>) -> Bridge {
        Bridge::with_runner(self.layout.clone(), self.config.clone(), runner)
    }

    pub fn system_bridge(&self) -> Bridge {
        self.bridge(Arc::new(SystemRunner))
    }

    /// Files currently left in the staging directory.
    pub fn staged_files(&self) -> Vec<PathBuf> {
        match fs::read_dir(&self.layout.temp_dir) {
            Ok(entries) => entries
                .map(|entry| entry.expect("dir entry").path())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for TestHome {
    fn default() -> Self {
        Self::new()
    }
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, contents).expect("write file");
}
