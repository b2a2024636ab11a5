//! Argument providers
//!
//! A provider turns an execution spec into a concrete process invocation.
//! It never runs anything itself, so strategies can be swapped (or replaced
//! by test doubles) without touching the agent or the controller.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::agent::command::PrlimitCommand;
use crate::types::{Identity, ResourceLimits, RunSpec};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("deadline elapsed before the process was started")]
    DeadlineElapsed,

    #[error("cannot build invocation: {0}")]
    Invalid(String),
}

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Deadline bound to a single execution
#[derive(Debug, Clone, Copy)]
pub struct CancelScope {
    timeout: Duration,
    deadline: Instant,
}

impl CancelScope {
    /// Start a scope that expires `timeout` from now
    ///
    /// Timeouts past what the clock can represent saturate to a deadline
    /// decades away.
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self { timeout, deadline }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the deadline, zero once expired
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Resolves when the deadline passes
    pub async fn expired(&self) {
        tokio::time::sleep_until(self.deadline).await;
    }
}

/// Concrete process invocation produced by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,

    /// Identity to switch to before exec, None to keep the service identity
    pub identity: Option<Identity>,

    /// Ceilings encoded in the invocation, if any
    pub limits: Option<ResourceLimits>,

    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    /// Split a full argument vector into program and arguments
    pub fn from_argv(argv: Vec<String>) -> Result<Self, ProviderError> {
        let mut argv = argv.into_iter();
        let program = argv
            .next()
            .ok_or_else(|| ProviderError::Invalid("empty command arguments".to_string()))?;
        Ok(Self {
            program,
            args: argv.collect(),
            identity: None,
            limits: None,
            working_dir: None,
        })
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

/// Builds restricted process invocations for an agent
pub trait ArgProvider: fmt::Debug + Send + Sync {
    fn provide(
        &self,
        spec: &RunSpec,
        identity: Identity,
        scope: &CancelScope,
    ) -> Result<Invocation, ProviderError>;
}

/// Runs commands under the agent's uid/gid with rlimits applied by `prlimit`
#[derive(Debug, Clone)]
pub struct ProcessArgsProvider {
    prlimit_path: PathBuf,
    limits: ResourceLimits,
}

impl ProcessArgsProvider {
    pub fn new() -> Self {
        Self {
            prlimit_path: PathBuf::from("prlimit"),
            limits: ResourceLimits::default(),
        }
    }

    pub fn prlimit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.prlimit_path = path.into();
        self
    }

    /// Set ceilings; unset fields keep the built-in defaults
    pub fn limits(mut self, limits: &ResourceLimits) -> Self {
        self.limits = ResourceLimits::default().with_overrides(limits);
        self
    }
}

impl Default for ProcessArgsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgProvider for ProcessArgsProvider {
    fn provide(
        &self,
        spec: &RunSpec,
        identity: Identity,
        scope: &CancelScope,
    ) -> Result<Invocation, ProviderError> {
        let remaining = scope.remaining();
        if remaining.is_zero() {
            return Err(ProviderError::DeadlineElapsed);
        }

        // CPU time can never usefully exceed the wall clock deadline
        let mut limits = self.limits.clone();
        if limits.cpu_time.is_none() {
            limits.cpu_time = Some(ceil_secs(remaining));
        }

        let argv = PrlimitCommand::new(&self.prlimit_path)
            .limits(limits.clone())
            .command(spec.args().iter().cloned())
            .build();

        let mut invocation = Invocation::from_argv(argv)?;
        invocation.identity = Some(identity);
        invocation.limits = Some(limits);
        invocation.working_dir = spec.working_dir().map(Into::into);
        Ok(invocation)
    }
}

/// Runs commands as-is under the service's own identity.
///
/// Provides no isolation at all; meant for development hosts where the
/// service is not allowed to switch uid/gid.
#[derive(Debug, Clone, Default)]
pub struct UnrestrictedArgsProvider;

impl ArgProvider for UnrestrictedArgsProvider {
    fn provide(
        &self,
        spec: &RunSpec,
        _identity: Identity,
        _scope: &CancelScope,
    ) -> Result<Invocation, ProviderError> {
        let mut invocation = Invocation::from_argv(spec.args().to_vec())?;
        invocation.working_dir = spec.working_dir().map(Into::into);
        Ok(invocation)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}
