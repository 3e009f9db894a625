//! Running child processes with a timeout, bounded output, and live line streaming.
//!
//! On unix the child leads its own process group. The whole group is killed
//! on timeout and once the child exits, so helpers it forked cannot hold the
//! output pipes open past the job.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::{ExecutionRecord, StreamKind};

/// One subprocess invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Merged over the parent environment.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Bytes kept per stream. The most recent output is kept; older lines
    /// are dropped and counted.
    pub output_limit_bytes: usize,
}

impl RunRequest {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout,
            output_limit_bytes,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }
}

/// Receives each output line (without its newline) as soon as it is read.
pub type LineSink<'a> = dyn Fn(StreamKind, &str) + Send + Sync + 'a;

/// Sink that ignores every line.
pub fn discard_lines(_: StreamKind, _: &str) {}

/// Abstraction over subprocess execution.
///
/// Tests substitute a scripted runner that returns canned records without
/// spawning anything.
pub trait ProcessRunner: Send + Sync {
    /// Run to completion (or timeout). `Err` means the process could not be
    /// spawned or observed; a non-zero exit is an `Ok` record.
    fn run(&self, request: &RunRequest, sink: &LineSink<'_>) -> Result<ExecutionRecord>;
}

/// Runner that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, request: &RunRequest, sink: &LineSink<'_>) -> Result<ExecutionRecord> {
        run_streaming(request, sink)
    }
}

/// Spawn `request`, stream both pipes line by line to `sink`, and wait.
///
/// Both reader threads are joined before the record is built, so the
/// returned buffers are complete and `sink` is never called afterwards.
#[instrument(skip_all, fields(program = %request.program.display(), timeout_secs = request.timeout.as_secs()))]
pub fn run_streaming(request: &RunRequest, sink: &LineSink<'_>) -> Result<ExecutionRecord> {
    let started = Instant::now();
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .envs(request.env.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {}", request.program.display()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = request.output_limit_bytes;

    let (waited, stdout, stderr) = thread::scope(|scope| {
        let stdout_handle =
            scope.spawn(move || read_lines_limited(stdout, StreamKind::Stdout, limit, sink));
        let stderr_handle =
            scope.spawn(move || read_lines_limited(stderr, StreamKind::Stderr, limit, sink));
        let waited = wait_or_kill(&mut child, request.timeout);
        (
            waited,
            join_output(stdout_handle).context("join stdout"),
            join_output(stderr_handle).context("join stderr"),
        )
    });
    let (status, timed_out) = waited?;
    let (stdout, stdout_truncated) = stdout?;
    let (stderr, stderr_truncated) = stderr?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ExecutionRecord {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed: started.elapsed(),
    })
}

/// Wait up to `timeout`, killing the child's process group on expiry. The
/// group is also killed after a normal exit and when waiting itself fails,
/// so the reader threads always see EOF.
fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    match child.wait_timeout(timeout) {
        Ok(Some(status)) => {
            kill_process_group(child);
            Ok((status, false))
        }
        Ok(None) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            kill_process_group(child);
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            Ok((status, true))
        }
        Err(e) => {
            kill_process_group(child);
            let _ = child.kill();
            let _ = child.wait();
            Err(e).context("wait for command")
        }
    }
}

/// SIGKILL every process left in the child's group. An already empty group
/// is not an error.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(err = %e, pgid = raw, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn join_output(handle: ScopedJoinHandle<'_, Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Most recent lines of one stream, bounded by bytes.
///
/// Oldest lines are dropped first. A single line longer than the limit keeps
/// its last `limit` bytes. The latest line containing `{` survives eviction
/// so the worker's result record is never lost to trailing log noise.
#[derive(Debug)]
struct TailBuffer {
    lines: VecDeque<Vec<u8>>,
    bytes: usize,
    limit: usize,
    dropped: usize,
    /// Sequence number of `lines[0]`.
    front_seq: u64,
    next_seq: u64,
    last_record: Option<(u64, Vec<u8>)>,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit,
            dropped: 0,
            front_seq: 0,
            next_seq: 0,
            last_record: None,
        }
    }

    fn push(&mut self, mut line: Vec<u8>) {
        if line.len() > self.limit {
            let excess = line.len() - self.limit;
            line.drain(..excess);
            self.dropped += excess;
        }
        if line.contains(&b'{') {
            self.last_record = Some((self.next_seq, line.clone()));
        }
        self.next_seq += 1;
        self.bytes += line.len();
        self.lines.push_back(line);

        while self.bytes > self.limit {
            let Some(old) = self.lines.pop_front() else {
                break;
            };
            self.bytes -= old.len();
            self.dropped += old.len();
            self.front_seq += 1;
        }
    }

    /// Retained bytes and the number of bytes dropped.
    fn finish(self) -> (Vec<u8>, usize) {
        let mut dropped = self.dropped;
        let mut out = Vec::with_capacity(self.bytes);
        if let Some((seq, record)) = self.last_record
            && seq < self.front_seq
        {
            dropped -= record.len();
            out.extend_from_slice(&record);
            if !record.ends_with(b"\n") {
                out.push(b'\n');
            }
        }
        for line in self.lines {
            out.extend_from_slice(&line);
        }
        (out, dropped)
    }
}

/// Read `reader` line by line, forwarding each line to `sink` and keeping
/// the most recent `limit` bytes.
fn read_lines_limited<R: Read>(
    reader: R,
    stream: StreamKind,
    limit: usize,
    sink: &LineSink<'_>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut tail = TailBuffer::new(limit);

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("read {}", stream.as_str()))?;
        if n == 0 {
            break;
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        debug!(stream = stream.as_str(), line = %text, "worker output");
        sink(stream, text);

        tail.push(line);
    }

    Ok(tail.finish())
}
