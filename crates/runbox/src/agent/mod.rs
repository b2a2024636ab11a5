//! Runtime agents
//!
//! An agent owns one execution slot: it runs a command list under its
//! restricted identity, bounded by a deadline, and exposes whether it is
//! free to take another job.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, instrument};

pub use crate::agent::command::PrlimitCommand;
pub use crate::agent::process::AgentSettings;
pub use crate::agent::provider::{
    ArgProvider, CancelScope, Invocation, ProcessArgsProvider, ProviderError,
    UnrestrictedArgsProvider,
};
use crate::types::{AgentState, Identity, RunOutput, RunSpec};

mod command;
mod process;
mod provider;

/// Errors that occur while an agent runs a command
///
/// Timeouts and failing programs are not errors; they are reported through
/// [`RunOutput::status`] together with the captured output.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent {0} is already running a job")]
    Busy(u32),

    #[error("failed to build invocation: {0}")]
    Provider(#[from] ProviderError),

    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// One execution slot bound to a restricted identity
#[derive(Debug)]
pub struct RuntimeAgent {
    id: u32,
    identity: Identity,
    provider: Arc<dyn ArgProvider>,
    settings: AgentSettings,
    state: RwLock<AgentState>,
}

impl RuntimeAgent {
    /// Create a Ready agent
    pub fn new(id: u32, identity: Identity, provider: Arc<dyn ArgProvider>) -> Self {
        Self {
            id,
            identity,
            provider,
            settings: AgentSettings::default(),
            state: RwLock::new(AgentState::Ready),
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Whether the agent can take a job. Only takes the read lock.
    pub fn is_ready(&self) -> bool {
        *self.state.read() == AgentState::Ready
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    /// Atomically move Ready -> NotReady.
    ///
    /// Returns None if the agent is busy. The returned claim puts the agent
    /// back to Ready when dropped, whatever happens to the job.
    pub fn try_claim(&self) -> Option<AgentClaim<'_>> {
        let mut state = self.state.write();
        if *state != AgentState::Ready {
            return None;
        }
        *state = AgentState::NotReady;
        debug!(agent = self.id, "agent claimed");
        Some(AgentClaim { agent: self })
    }

    fn release(&self) {
        *self.state.write() = AgentState::Ready;
        debug!(agent = self.id, "agent released");
    }

    /// Run a command immediately, without touching the agent's state
    #[instrument(skip(self, spec), fields(agent = self.id, program = spec.program(), timeout = spec.timeout_secs()))]
    pub async fn run_cmd(&self, spec: &RunSpec) -> Result<RunOutput, AgentError> {
        let scope = CancelScope::new(spec.timeout());
        let invocation = self.provider.provide(spec, self.identity, &scope)?;
        debug!(argv = ?invocation.argv(), identity = ?invocation.identity, "running command");
        process::execute(&invocation, &scope, &self.settings).await
    }

    /// Run a command while holding the agent's slot.
    ///
    /// The agent is NotReady for the whole execution and Ready again on every
    /// exit path, including errors, panics and the future being dropped.
    /// Fails with [`AgentError::Busy`] if another job holds the slot.
    pub async fn safe_run_cmd(&self, spec: &RunSpec) -> Result<RunOutput, AgentError> {
        let claim = self.try_claim().ok_or(AgentError::Busy(self.id))?;
        claim.run(spec).await
    }
}

/// Exclusive hold on an agent's slot
#[derive(Debug)]
pub struct AgentClaim<'a> {
    agent: &'a RuntimeAgent,
}

impl AgentClaim<'_> {
    pub fn agent(&self) -> &RuntimeAgent {
        self.agent
    }

    /// Run the job; the slot is released when this returns or is dropped
    pub async fn run(self, spec: &RunSpec) -> Result<RunOutput, AgentError> {
        self.agent.run_cmd(spec).await
    }
}

impl Drop for AgentClaim<'_> {
    fn drop(&mut self) {
        self.agent.release();
    }
}
