//! Bounded subprocess execution.
//!
//! Every external tool (compiler, linter, test runner, git) goes through
//! `run_with_timeout`, so a hung tool surfaces as a failed result with
//! `TIMEOUT_EXIT_CODE` instead of a hung run.

use crate::core::error::GatekeeperError;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Exit code reported for a killed-on-timeout process (matches coreutils `timeout`).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// stdout and stderr joined, the way tools interleave them for humans.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Spawn `program args` in `cwd` and wait at most `timeout`.
///
/// The child leads its own process group, so a timeout takes down everything
/// it started (`npx` → `node`, `sh -c` → job) rather than only the direct child.
/// Spawn failures are infrastructure errors; non-zero exits and timeouts are not.
pub fn run_with_timeout(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<ProcessOutput, GatekeeperError> {
    debug!(program, ?args, cwd = %cwd.display(), timeout_secs = timeout.as_secs(), "spawning");
    let start = Instant::now();
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        command.process_group(0);
    }
    let mut child = command.spawn().map_err(|e| {
        GatekeeperError::RunnerError(format!("failed to spawn '{}': {}", program, e))
    })?;

    // Drain pipes on their own threads so a chatty child can't block on a full pipe.
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait().map_err(GatekeeperError::IoError)? {
            break Some(status);
        }
        if start.elapsed() > timeout {
            kill_tree(&mut child);
            let _ = child.wait();
            timed_out = true;
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // After a kill, a descendant that escaped the group may still hold a pipe open.
    let wait = if timed_out { Some(DRAIN_GRACE) } else { None };
    let stdout = stdout_reader.map(|r| collect_reader(r, wait)).unwrap_or_default();
    let stderr = stderr_reader.map(|r| collect_reader(r, wait)).unwrap_or_default();
    let exit_code = match status {
        Some(s) => s.code().unwrap_or(-1),
        None => TIMEOUT_EXIT_CODE,
    };
    let duration_ms = start.elapsed().as_millis() as u64;
    debug!(program, exit_code, timed_out, duration_ms, "finished");

    Ok(ProcessOutput {
        exit_code,
        stdout,
        stderr: if timed_out {
            format!(
                "{}\n{} timed out after {}s",
                stderr.trim_end(),
                program,
                timeout.as_secs()
            )
            .trim_start()
            .to_string()
        } else {
            stderr
        },
        timed_out,
        duration_ms,
    })
}

/// SIGKILL the child's process group, then the child itself.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: plain syscall on a pid we spawned; a stale group yields ESRCH.
            unsafe {
                let _ = libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
    });
    rx
}

/// Output of a reader thread; `wait = None` blocks until the pipe closes.
fn collect_reader(rx: mpsc::Receiver<String>, wait: Option<Duration>) -> String {
    match wait {
        None => rx.recv().unwrap_or_default(),
        Some(limit) => rx.recv_timeout(limit).unwrap_or_default(),
    }
}
