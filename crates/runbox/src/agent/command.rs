//! Command builder for the prlimit wrapper
//!
//! Builds the argument vector that applies resource ceilings before
//! exec'ing the user command.

use std::path::PathBuf;

use crate::types::ResourceLimits;

/// Builder for prlimit command-line arguments
#[derive(Debug)]
pub struct PrlimitCommand {
    /// Path to prlimit binary
    prlimit_path: PathBuf,
    /// Resource limits
    limits: ResourceLimits,
    command: Vec<String>,
}

impl PrlimitCommand {
    /// Create a new prlimit command builder
    pub fn new(prlimit_path: impl Into<PathBuf>) -> Self {
        Self {
            prlimit_path: prlimit_path.into(),
            limits: ResourceLimits::default(),
            command: Vec::new(),
        }
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the command to run
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the command vector. Each limit sets
    /// both the soft and the hard value so the program cannot raise it.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.prlimit_path.to_string_lossy().into_owned()];

        if let Some(procs) = self.limits.max_processes {
            args.push(format!("--nproc={procs}"));
        }
        if let Some(fsize) = self.limits.max_file_size {
            args.push(format!("--fsize={fsize}"));
        }
        if let Some(cpu) = self.limits.cpu_time {
            args.push(format!("--cpu={cpu}"));
        }

        // Separator and command
        args.push("--".to_string());
        args.extend(self.command);

        args
    }
}
