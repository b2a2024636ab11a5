//! Agent pool
//!
//! The controller owns a fixed set of runtime agents and hands each request
//! to the lowest-id agent that is Ready. Admission is bounded by a semaphore
//! with one permit per agent, so callers never see more concurrent
//! executions than there are agents.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, instrument, warn};

use crate::agent::{
    AgentError, AgentSettings, ArgProvider, ProcessArgsProvider, RuntimeAgent,
    UnrestrictedArgsProvider,
};
use crate::config::{BackpressurePolicy, Config, Isolation};
use crate::types::{Identity, RunOutput, RunSpec};

/// What happens to a request when every agent is busy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backpressure {
    /// Fail immediately with [`DispatchError::PoolExhausted`]
    #[default]
    Reject,

    /// Queue until an agent frees up, giving up after `max_wait` if set
    Wait { max_wait: Option<Duration> },
}

impl Backpressure {
    pub fn from_config(config: &Config) -> Self {
        match config.backpressure {
            BackpressurePolicy::Reject => Backpressure::Reject,
            BackpressurePolicy::Wait => Backpressure::Wait {
                max_wait: config.max_wait(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("all {capacity} agents are busy")]
    PoolExhausted { capacity: usize },

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Fixed-size pool of runtime agents
#[derive(Debug)]
pub struct Controller {
    agents: BTreeMap<u32, RuntimeAgent>,
    permits: Semaphore,
    backpressure: Backpressure,
}

impl Controller {
    /// Create a pool of `size` agents with ids `1..=size`, agent `n` running
    /// as uid = gid = `n`
    pub fn new(
        size: u32,
        provider: Arc<dyn ArgProvider>,
        settings: AgentSettings,
        backpressure: Backpressure,
    ) -> Self {
        let agents = (1..=size).map(|id| {
            RuntimeAgent::new(id, Identity::uniform(id), Arc::clone(&provider))
                .with_settings(settings.clone())
        });
        Self::with_agents(agents, backpressure)
    }

    /// Create a pool from the isolation, identity and backpressure settings
    pub fn from_config(config: &Config) -> Self {
        let provider: Arc<dyn ArgProvider> = match config.isolation {
            Isolation::Process => Arc::new(
                ProcessArgsProvider::new()
                    .prlimit_path(config.prlimit_binary())
                    .limits(&config.effective_limits(None)),
            ),
            Isolation::Unrestricted => {
                warn!("agents run unrestricted, commands keep the service identity");
                Arc::new(UnrestrictedArgsProvider)
            }
        };
        let settings = AgentSettings {
            kill_grace: config.kill_grace(),
            max_output: config.max_output,
        };

        let agents = (1..=config.pool_size).map(|id| {
            RuntimeAgent::new(id, config.identity_for(id), Arc::clone(&provider))
                .with_settings(settings.clone())
        });
        Self::with_agents(agents, Backpressure::from_config(config))
    }

    /// Create a pool from prebuilt agents. Agents sharing an id are replaced
    /// by the last one given.
    pub fn with_agents(
        agents: impl IntoIterator<Item = RuntimeAgent>,
        backpressure: Backpressure,
    ) -> Self {
        let agents: BTreeMap<u32, RuntimeAgent> =
            agents.into_iter().map(|agent| (agent.id(), agent)).collect();
        debug!(size = agents.len(), ?backpressure, "agent pool created");
        Self {
            permits: Semaphore::new(agents.len()),
            agents,
            backpressure,
        }
    }

    /// Run a spec on the lowest-id Ready agent
    #[instrument(skip(self, spec), fields(program = spec.program()))]
    pub async fn submit_request(&self, spec: &RunSpec) -> Result<RunOutput, DispatchError> {
        let _permit = self.admit().await?;

        // The permit count never exceeds the pool size, so a free agent only
        // goes missing if someone drives an agent directly.
        let claim = self
            .agents
            .values()
            .find_map(|agent| agent.try_claim())
            .ok_or_else(|| self.exhausted())?;

        debug!(agent = claim.agent().id(), "request dispatched");
        Ok(claim.run(spec).await?)
    }

    async fn admit(&self) -> Result<SemaphorePermit<'_>, DispatchError> {
        match self.backpressure {
            Backpressure::Reject => self.permits.try_acquire().map_err(|_| self.exhausted()),
            Backpressure::Wait { max_wait } => {
                let acquire = self.permits.acquire();
                let permit = match max_wait {
                    Some(limit) => tokio::time::timeout(limit, acquire)
                        .await
                        .map_err(|_| self.exhausted())?,
                    None => acquire.await,
                };
                permit.map_err(|_| self.exhausted())
            }
        }
    }

    fn exhausted(&self) -> DispatchError {
        warn!(capacity = self.capacity(), "agent pool exhausted");
        DispatchError::PoolExhausted {
            capacity: self.capacity(),
        }
    }

    /// Total number of agents
    pub fn capacity(&self) -> usize {
        self.agents.len()
    }

    /// Number of agents currently Ready
    pub fn available(&self) -> usize {
        self.agents.values().filter(|agent| agent.is_ready()).count()
    }

    pub fn agent(&self, id: u32) -> Option<&RuntimeAgent> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &RuntimeAgent> {
        self.agents.values()
    }

    pub fn backpressure(&self) -> Backpressure {
        self.backpressure
    }
}
