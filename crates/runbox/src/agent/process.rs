//! Process spawning and output capture
//!
//! Runs an invocation with a deadline while two tasks drain stdout and
//! stderr, so a chatty stream can never block the other.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::agent::AgentError;
use crate::agent::provider::{CancelScope, Invocation};
use crate::types::{ExecutionStatus, RunOutput};

const READ_CHUNK: usize = 8192;

/// Tunables for a single execution
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// How long to keep draining after the process group is killed
    pub kill_grace: Duration,

    /// Bytes kept per output stream
    pub max_output: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_millis(500),
            max_output: 1024 * 1024,
        }
    }
}

fn build_command(invocation: &Invocation) -> Command {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // own process group so the whole tree can be killed at once
        .process_group(0)
        .kill_on_drop(true);

    if let Some(identity) = invocation.identity {
        command.uid(identity.uid).gid(identity.gid);
    }
    if let Some(ref dir) = invocation.working_dir {
        command.current_dir(dir);
    }
    command
}

/// One output stream being drained by its own task
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Drain {
    fn spawn<R>(mut reader: R, limit: usize, stream: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; READ_CHUNK];
            let mut total = 0usize;
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        total += n;
                        let mut kept = sink.lock();
                        let room = limit.saturating_sub(kept.len());
                        kept.extend_from_slice(&chunk[..n.min(room)]);
                    }
                    Err(e) => {
                        debug!(stream, error = %e, "output stream read failed");
                        break;
                    }
                }
            }
            if total > limit {
                debug!(stream, total, limit, "output truncated");
            }
        });
        Self { buffer, task }
    }

    /// Wait up to `grace` for the stream to close, then take what was read
    async fn finish(mut self, grace: Duration, stream: &'static str) -> String {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!(stream, "output stream still open after grace period");
            self.task.abort();
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn kill_group(child: &mut Child, pgid: Option<u32>) {
    if let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) {
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => debug!(pgid, error = %e, "killpg failed"),
        }
    }
    // leader may already be gone, which is fine
    let _ = child.start_kill();
}

/// Run an invocation until it exits or the scope's deadline passes
#[instrument(skip_all, fields(program = %invocation.program))]
pub(crate) async fn execute(
    invocation: &Invocation,
    scope: &CancelScope,
    settings: &AgentSettings,
) -> Result<RunOutput, AgentError> {
    let started = Instant::now();

    let mut child = build_command(invocation)
        .spawn()
        .map_err(AgentError::Spawn)?;
    let pgid = child.id();
    debug!(pid = ?pgid, "process spawned");

    let stdout = child.stdout.take().ok_or(AgentError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(AgentError::MissingPipe("stderr"))?;
    let stdout = Drain::spawn(stdout, settings.max_output, "stdout");
    let stderr = Drain::spawn(stderr, settings.max_output, "stderr");

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        () = scope.expired() => None,
    };

    let timed_out = waited.is_none();
    if timed_out {
        warn!(
            timeout = scope.timeout().as_secs_f64(),
            "deadline expired, killing process group"
        );
    }

    // Also reaps anything the program left running in its group
    kill_group(&mut child, pgid);

    let status = match waited {
        Some(status) => status,
        None => child.wait().await,
    };

    let (stdout, stderr) = tokio::join!(
        stdout.finish(settings.kill_grace, "stdout"),
        stderr.finish(settings.kill_grace, "stderr"),
    );

    let status = status.map_err(AgentError::Wait)?;
    let wall_time = started.elapsed().as_secs_f64();

    let output = RunOutput {
        status: classify(status, timed_out),
        stdout,
        stderr,
        exit_code: status.code(),
        signal: status.signal(),
        wall_time,
    };

    debug!(
        status = ?output.status,
        exit_code = ?output.exit_code,
        signal = ?output.signal,
        wall_time,
        "execution complete"
    );

    Ok(output)
}

fn classify(status: ExitStatus, timed_out: bool) -> ExecutionStatus {
    if timed_out {
        ExecutionStatus::Timeout
    } else if status.success() {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::ProcessFailure
    }
}
