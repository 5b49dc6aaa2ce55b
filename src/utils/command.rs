//! Process execution with a hard timeout and an output size cap.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_CHUNK: usize = 8 * 1024;
/// How long pipes may stay open after the process group was killed.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Captured output from command execution.
/// Reusable primitive for any command that executes external processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl CapturedOutput {
    pub fn new(stdout: String, stderr: String) -> Self {
        Self { stdout, stderr }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Prefers stderr, falls back to stdout if stderr is empty.
    pub fn error_text(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub timeout: Duration,
    /// Combined stdout + stderr budget in bytes.
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process exited on its own. `None` when killed by a signal.
    Exited(Option<i32>),
    TimedOut,
    OutputLimitExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitedOutput {
    pub output: CapturedOutput,
    pub termination: Termination,
}

impl LimitedOutput {
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(Some(0))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => code,
            _ => None,
        }
    }
}

/// Run `program` directly (no shell) and wait until it exits, the timeout
/// elapses, or the combined output exceeds the cap.
///
/// The process runs in its own process group. On timeout or overflow the whole
/// group is killed, so helpers it started cannot hold the step open. Output
/// past the cap fails the step even when the process later exits cleanly.
/// Whatever was captured up to the cut-off is returned.
pub fn run_limited(program: &str, args: &[String], limits: RunLimits) -> Result<LimitedOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|e| {
        Error::internal_io(
            format!("Failed to run {}: {}", program, e),
            Some(program.to_string()),
        )
    })?;

    let used = Arc::new(AtomicUsize::new(0));
    let overflow = Arc::new(AtomicBool::new(false));
    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();

    let mut readers = 0;
    if let Some(source) = child.stdout.take() {
        spawn_reader(source, &stdout, &used, &overflow, limits.max_output_bytes, done_tx.clone());
        readers += 1;
    }
    if let Some(source) = child.stderr.take() {
        spawn_reader(source, &stderr, &used, &overflow, limits.max_output_bytes, done_tx.clone());
        readers += 1;
    }
    drop(done_tx);

    let deadline = Instant::now() + limits.timeout;
    let mut termination = wait_with_deadline(&mut child, &overflow, deadline)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("wait {}", program))))?;

    let drain_until = match termination {
        Termination::Exited(_) => deadline,
        _ => Instant::now() + KILL_GRACE,
    };
    let pending = await_readers(&done_rx, readers, drain_until);
    if pending > 0 {
        // Something outside the direct child still holds the pipes open.
        kill_group(&mut child);
        await_readers(&done_rx, pending, Instant::now() + KILL_GRACE);
        if matches!(termination, Termination::Exited(_)) {
            termination = Termination::TimedOut;
        }
    }

    if overflow.load(Ordering::SeqCst) && matches!(termination, Termination::Exited(_)) {
        termination = Termination::OutputLimitExceeded;
    }

    Ok(LimitedOutput {
        output: CapturedOutput::new(take_text(&stdout), take_text(&stderr)),
        termination,
    })
}

fn wait_with_deadline(
    child: &mut Child,
    overflow: &AtomicBool,
    deadline: Instant,
) -> std::io::Result<Termination> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Termination::Exited(status.code()));
        }
        if overflow.load(Ordering::SeqCst) {
            kill_group(child);
            return Ok(Termination::OutputLimitExceeded);
        }
        if Instant::now() >= deadline {
            kill_group(child);
            return Ok(Termination::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the child's process group, then the child itself, and reap it.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = i32::try_from(child.id()) {
            // SAFETY: kill(2) has no memory-safety preconditions. The group id
            // is the child's pid because it was spawned with process_group(0).
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    // Already-exited children make kill() fail; reaping still applies.
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait for up to `count` readers to finish before `until`. Returns how many
/// are still running.
fn await_readers(done: &Receiver<()>, count: usize, until: Instant) -> usize {
    let mut pending = count;
    while pending > 0 {
        let remaining = until.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(()) => pending -= 1,
            Err(_) => break,
        }
    }
    pending
}

fn spawn_reader<R: Read + Send + 'static>(
    mut source: R,
    sink: &Arc<Mutex<Vec<u8>>>,
    used: &Arc<AtomicUsize>,
    overflow: &Arc<AtomicBool>,
    max_bytes: usize,
    done: Sender<()>,
) {
    let sink = Arc::clone(sink);
    let used = Arc::clone(used);
    let overflow = Arc::clone(overflow);

    thread::spawn(move || {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let before = used.fetch_add(n, Ordering::SeqCst);
            let remaining = max_bytes.saturating_sub(before);
            let keep = n.min(remaining);
            if let Ok(mut captured) = sink.lock() {
                captured.extend_from_slice(&chunk[..keep]);
            }
            if n > remaining {
                overflow.store(true, Ordering::SeqCst);
                break;
            }
        }
        let _ = done.send(());
    });
}

fn take_text(sink: &Mutex<Vec<u8>>) -> String {
    let bytes = match sink.lock() {
        Ok(captured) => captured.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    String::from_utf8_lossy(&bytes).to_string()
}
