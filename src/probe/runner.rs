//! Subprocess runner abstraction for probe invocations.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use super::plan::Invocation;

/// Environment variable set for every probe so scripts can detect the
/// harness.
pub const PROBE_ENV_VAR: &str = "PROVCHECK_PROBE";

/// Grace period for draining output pipes after the process exits.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured result of a finished invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProbeOutput {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProbeOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Failures that prevent an invocation from producing an exit status.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// The interpreter could not be started.
    #[error("failed to spawn `{program}`: {message}")]
    Spawn {
        /// Interpreter that failed to start.
        program: String,
        /// Operating-system error text.
        message: String,
    },
    /// The invocation exceeded its timeout and was killed.
    #[error("timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Configured limit.
        timeout: Duration,
    },
    /// Waiting for the process or preparing its sandbox failed.
    #[error("I/O error while running `{program}`: {message}")]
    Io {
        /// Interpreter being run.
        program: String,
        /// Operating-system error text.
        message: String,
    },
}

/// Boxed future returned by [`ProbeRunner::run`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<ProbeOutput, ProbeError>> + Send + 'a>>;

/// Executes probe invocations; swapped for a scripted double in tests.
pub trait ProbeRunner: Send + Sync {
    /// Runs the invocation to completion or until its timeout elapses.
    fn run<'a>(&'a self, invocation: &'a Invocation) -> ProbeFuture<'a>;
}

/// Runs invocations as real subprocesses.
///
/// Each child gets a fresh temporary working directory and a closed stdin. On
/// Unix it also leads its own process group; on Windows its process tree is
/// killed with `taskkill`. Either way a timeout tears down everything it
/// spawned.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessProbeRunner;

impl ProbeRunner for ProcessProbeRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> ProbeFuture<'a> {
        Box::pin(run_process(invocation))
    }
}

async fn run_process(invocation: &Invocation) -> Result<ProbeOutput, ProbeError> {
    let program = invocation.program.clone();
    let io_error = |err: std::io::Error| ProbeError::Io {
        program: program.clone(),
        message: err.to_string(),
    };

    let workdir = tempfile::Builder::new()
        .prefix("provcheck-probe-")
        .tempdir()
        .map_err(io_error)?;

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(workdir.path())
        .env(PROBE_ENV_VAR, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|err| ProbeError::Spawn {
        program: invocation.program.clone(),
        message: err.to_string(),
    })?;
    let pid = child.id();
    let stdout = tokio::spawn(read_all(child.stdout.take()));
    let stderr = tokio::spawn(read_all(child.stderr.take()));

    let waited = tokio::time::timeout(invocation.timeout, child.wait()).await;
    let status = match waited {
        Ok(result) => {
            #[cfg(unix)]
            kill_process_group(pid);
            result.map_err(io_error)?
        }
        Err(_) => {
            debug!(program = %invocation.program, timeout_secs = invocation.timeout.as_secs(), "probe timed out");
            terminate(&mut child, pid).await;
            stdout.abort();
            stderr.abort();
            return Err(ProbeError::Timeout {
                timeout: invocation.timeout,
            });
        }
    };

    Ok(ProbeOutput {
        code: status.code(),
        stdout: drain(stdout).await,
        stderr: drain(stderr).await,
    })
}

async fn read_all<R>(reader: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    if let Some(mut stream) = reader
        && let Err(err) = stream.read_to_end(&mut buffer).await
    {
        debug!(error = %err, "failed to read probe output");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

async fn drain(task: JoinHandle<String>) -> String {
    let abort = task.abort_handle();
    if let Ok(joined) = tokio::time::timeout(DRAIN_GRACE, task).await {
        joined.unwrap_or_default()
    } else {
        abort.abort();
        String::new()
    }
}

/// Kills and reaps a timed-out child together with everything it spawned.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(windows)]
    kill_process_tree(pid).await;
    #[cfg(not(windows))]
    kill_process_group(pid);
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "child already exited");
    }
    if let Err(err) = child.wait().await {
        debug!(error = %err, "failed to reap timed-out child");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!(pgid = raw, error = %err, "failed to kill probe process group"),
    }
}

/// Windows has no process groups to signal; `taskkill /T` walks the child's
/// descendants instead. Must run while the child is still alive.
#[cfg(windows)]
async fn kill_process_tree(pid: Option<u32>) {
    let Some(id) = pid else {
        return;
    };
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &id.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(exit) if exit.success() => {}
        Ok(exit) => debug!(pid = id, code = ?exit.code(), "taskkill did not kill the probe tree"),
        Err(err) => debug!(pid = id, error = %err, "failed to run taskkill"),
    }
}

#[cfg(not(any(unix, windows)))]
const fn kill_process_group(_pid: Option<u32>) {}
