//! Bounded child-process execution.
//!
//! [`run`] launches a child with piped stdio, feeds it a stdin payload,
//! drains stdout and stderr concurrently, and enforces a deadline:
//! - `kill_on_drop(true)` so an abandoned child never outlives its handle.
//! - On timeout the child is killed **and reaped** before `run` returns, so a
//!   [`RunOutcome::TimedOut`] never leaves a live process behind.
//! - Output is decoded lossily; invalid UTF-8 never raises.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Upper bound on draining output after the child has exited or been killed.
///
/// A grandchild that inherited the pipes can keep them open after the direct
/// child is gone; output still buffered past this window is dropped.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Description of a process to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed after the program.
    pub args: Vec<String>,
    /// Working directory; inherits the server's when `None`.
    pub working_dir: Option<PathBuf>,
    /// Environment overrides layered on top of the inherited environment.
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Build a spec from an argv-style list (`[program, args...]`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AppError::Process("empty command line".into()))?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add one environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Unconfigured [`Command`] for this spec; callers choose stdio.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env).kill_on_drop(true);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Human-readable command line for logs.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a bounded process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own before the deadline.
    Exited {
        /// Exit code; `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Captured stdout.
        stdout: String,
        /// Captured stderr.
        stderr: String,
    },
    /// The deadline elapsed; the process was killed and reaped.
    TimedOut {
        /// The deadline that was exceeded.
        timeout: Duration,
        /// Stdout captured before the kill.
        stdout: String,
        /// Stderr captured before the kill.
        stderr: String,
    },
}

impl RunOutcome {
    /// `true` only for an exit with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(
            self,
            Self::Exited {
                exit_code: Some(0),
                ..
            }
        )
    }

    /// Captured stdout regardless of outcome.
    #[must_use]
    pub fn stdout(&self) -> &str {
        match self {
            Self::Exited { stdout, .. } | Self::TimedOut { stdout, .. } => stdout,
        }
    }

    /// Captured stderr regardless of outcome.
    #[must_use]
    pub fn stderr(&self) -> &str {
        match self {
            Self::Exited { stderr, .. } | Self::TimedOut { stderr, .. } => stderr,
        }
    }

    /// Exit code, if the process exited normally.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { exit_code, .. } => *exit_code,
            Self::TimedOut { .. } => None,
        }
    }

    /// Diagnostic text for a failed run: trimmed stderr, or stdout when
    /// stderr is empty.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr().trim();
        if stderr.is_empty() {
            self.stdout().trim().to_owned()
        } else {
            stderr.to_owned()
        }
    }
}

/// Run `spec` to completion or until `timeout` elapses.
///
/// `stdin_payload` is written to the child's stdin (nothing is written when
/// it is empty) and stdin is then closed to signal end of input.
///
/// # Errors
///
/// - `AppError::Process("failed to spawn …")`: the program could not be
///   started (missing binary, bad working directory).
/// - `AppError::Process("failed to wait …")`: the OS wait call failed.
///
/// A timeout is **not** an error; it is reported as [`RunOutcome::TimedOut`].
pub async fn run(spec: &CommandSpec, stdin_payload: &[u8], timeout: Duration) -> Result<RunOutcome> {
    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Process(format!("failed to spawn `{}`: {err}", spec.program))
    })?;

    let pid = child.id().unwrap_or(0);
    debug!(pid, command = %spec.display(), "process spawned");

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Process("failed to capture child stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("failed to capture child stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Process("failed to capture child stderr".into()))?;

    let payload = stdin_payload.to_vec();
    let writer = tokio::spawn(async move {
        let mut stdin = stdin;
        if !payload.is_empty() {
            if let Err(err) = stdin.write_all(&payload).await {
                // The child may exit without reading its input.
                debug!(pid, %err, "stdin write failed");
            }
        }
        // Dropping stdin closes the pipe.
    });
    let stdout_task = spawn_drain(stdout);
    let stderr_task = spawn_drain(stderr);

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(err)) => {
            return Err(AppError::Process(format!(
                "failed to wait for `{}`: {err}",
                spec.program
            )));
        }
        Err(_elapsed) => {
            warn!(pid, ?timeout, command = %spec.display(), "process timed out, killing");
            // `kill` also reaps the child.
            if let Err(err) = child.kill().await {
                warn!(pid, %err, "failed to kill timed-out process");
            }
            None
        }
    };

    writer.abort();
    let stdout = collect(stdout_task, pid, "stdout").await;
    let stderr = collect(stderr_task, pid, "stderr").await;

    Ok(match status {
        Some(status) => {
            let exit_code = status.code();
            info!(pid, ?exit_code, "process exited");
            RunOutcome::Exited {
                exit_code,
                stdout,
                stderr,
            }
        }
        None => RunOutcome::TimedOut {
            timeout,
            stdout,
            stderr,
        },
    })
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Read `reader` to EOF on a background task.
fn spawn_drain<R>(reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut buf = Vec::new();
        if let Err(err) = reader.read_to_end(&mut buf).await {
            debug!(%err, "output drain stopped early");
        }
        buf
    })
}

/// Await a drain task for at most [`DRAIN_GRACE`] and decode it lossily.
async fn collect(task: JoinHandle<Vec<u8>>, pid: u32, stream: &str) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(err)) => {
            warn!(pid, stream, %err, "output drain task failed");
            String::new()
        }
        Err(_elapsed) => {
            warn!(pid, stream, "output pipe held open past exit, dropping remainder");
            abort.abort();
            String::new()
        }
    }
}
