use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default ceiling on the number of processes a run may own
pub const DEFAULT_MAX_PROCESSES: u32 = 20;

/// Default ceiling on the size of any file a run may write, in bytes
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1000;

/// Longest deadline a run may ask for, one day
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Resource ceilings applied to a restricted process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of processes/threads (RLIMIT_NPROC)
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum size of a written file in bytes (RLIMIT_FSIZE)
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// CPU time limit in seconds (RLIMIT_CPU)
    #[serde(default)]
    pub cpu_time: Option<u64>,
}

impl ResourceLimits {
    /// Create limits with every field unset
    pub fn none() -> Self {
        Self {
            max_processes: None,
            max_file_size: None,
            cpu_time: None,
        }
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum file size in bytes
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Set the CPU time limit in seconds
    pub fn with_cpu_time(mut self, seconds: u64) -> Self {
        self.cpu_time = Some(seconds);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            max_processes: overrides.max_processes.or(self.max_processes),
            max_file_size: overrides.max_file_size.or(self.max_file_size),
            cpu_time: overrides.cpu_time.or(self.cpu_time),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_processes: Some(DEFAULT_MAX_PROCESSES),
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
            cpu_time: None,
        }
    }
}

/// The non-privileged uid/gid pair a run is executed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Identity where uid and gid are both `id`
    pub fn uniform(id: u32) -> Self {
        Self { uid: id, gid: id }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("execution spec has no command")]
    EmptyCommand,

    #[error("execution spec timeout must be greater than zero")]
    ZeroTimeout,

    #[error("execution spec timeout of {secs}s exceeds the {max}s maximum")]
    TimeoutTooLong { secs: u64, max: u64 },
}

impl SpecError {
    /// Check a timeout in seconds against the accepted range
    pub fn check_timeout(secs: u64) -> Result<(), SpecError> {
        match secs {
            0 => Err(SpecError::ZeroTimeout),
            secs if secs > MAX_TIMEOUT_SECS => Err(SpecError::TimeoutTooLong {
                secs,
                max: MAX_TIMEOUT_SECS,
            }),
            _ => Ok(()),
        }
    }
}

/// A fully resolved command line plus its deadline, ready to hand to an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    args: Vec<String>,
    timeout_secs: u64,
    working_dir: Option<PathBuf>,
}

impl RunSpec {
    /// Build a spec, rejecting empty commands and out of range timeouts
    pub fn new(
        args: impl IntoIterator<Item = impl Into<String>>,
        timeout_secs: u64,
    ) -> Result<Self, SpecError> {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Err(SpecError::EmptyCommand);
        }
        SpecError::check_timeout(timeout_secs)?;
        Ok(Self {
            args,
            timeout_secs,
            working_dir: None,
        })
    }

    /// Run the command from inside `dir`
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The program to execute (first argument)
    pub fn program(&self) -> &str {
        // non-empty by construction
        &self.args[0]
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Program exited with status zero
    Success,

    /// Deadline expired and the program was killed
    Timeout,

    /// Program exited non-zero or was killed by a signal
    ProcessFailure,
}

/// Captured result of one execution
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub status: ExecutionStatus,

    /// Standard output, possibly partial on timeout
    pub stdout: String,

    /// Standard error, possibly partial on timeout
    pub stderr: String,

    /// Exit code if the program exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the program was killed by a signal
    pub signal: Option<i32>,

    /// Wall clock time in seconds
    pub wall_time: f64,
}

impl RunOutput {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.status == ExecutionStatus::Timeout
    }
}

impl Default for RunOutput {
    fn default() -> Self {
        Self {
            status: ExecutionStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            signal: None,
            wall_time: 0.0,
        }
    }
}

/// Availability of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Idle and able to accept a job
    Ready,

    /// Running a job or cleaning up after one
    NotReady,
}
