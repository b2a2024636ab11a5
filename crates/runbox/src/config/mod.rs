use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    FileExtension, Language, LanguageConfig, LanguageRegistry, SOURCE_PLACEHOLDER, SOURCE_STEM,
};
use crate::types::{Identity, ResourceLimits};

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../runbox.example.toml");

/// Timeout applied when a request does not carry one, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How agents restrict the processes they launch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Switch to the agent's uid/gid and apply rlimits through `prlimit`
    #[default]
    Process,

    /// Run commands as the service user with no limits.
    ///
    /// Only for development hosts where the service cannot switch identity.
    Unrestricted,
}

/// What the controller does when every agent is busy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Fail immediately with a retryable pool-exhausted error
    #[default]
    Reject,

    /// Wait for an agent to free up, bounded by `max_wait` when set
    Wait,
}

/// Config for runbox
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory under which per-request workspaces are created.
    /// Uses the system temp dir if not specified.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Timeout in seconds for requests that do not specify one
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,

    /// Number of agents in the pool
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Restriction strategy for launched processes
    #[serde(default)]
    pub isolation: Isolation,

    /// Agent `n` runs as uid = gid = `identity_offset + n`
    #[serde(default)]
    pub identity_offset: u32,

    /// Path to the prlimit binary (uses PATH if not specified).
    #[serde(default)]
    pub prlimit_path: Option<PathBuf>,

    /// Pool exhaustion policy
    #[serde(default)]
    pub backpressure: BackpressurePolicy,

    /// Upper bound in seconds on waiting for an agent under the `wait` policy
    #[serde(default)]
    pub max_wait: Option<f64>,

    /// Seconds to keep draining output after a timed-out process is killed
    #[serde(default = "default_kill_grace")]
    pub kill_grace: f64,

    /// Bytes kept per output stream; the rest is drained and discarded
    #[serde(default = "default_max_output")]
    pub max_output: usize,

    /// Resource ceilings for restricted processes.
    /// Unset fields fall back to the built-in defaults.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, LanguageConfig>,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            workspace_root: None,
            default_timeout: default_timeout(),
            pool_size: default_pool_size(),
            isolation: Isolation::default(),
            identity_offset: 0,
            prlimit_path: None,
            backpressure: BackpressurePolicy::default(),
            max_wait: None,
            kill_grace: default_kill_grace(),
            max_output: default_max_output(),
            default_limits: ResourceLimits::default(),
            languages: HashMap::new(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&LanguageConfig, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Build the language lookup tables
    pub fn registry(&self) -> Result<LanguageRegistry, ConfigError> {
        let entries = self
            .languages
            .iter()
            .map(|(id, config)| Ok((id.parse::<Language>()?, config.clone())))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        LanguageRegistry::new(entries)
    }

    /// Get the path to the prlimit binary
    pub fn prlimit_binary(&self) -> PathBuf {
        self.prlimit_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("prlimit"))
    }

    /// Get the directory workspaces are created in
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Restricted identity of the agent with the given id
    pub fn identity_for(&self, agent_id: u32) -> Identity {
        Identity::uniform(self.identity_offset + agent_id)
    }

    pub fn kill_grace(&self) -> Duration {
        seconds(self.kill_grace)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait.map(seconds)
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        let base = ResourceLimits::default().with_overrides(&self.default_limits);
        match overrides {
            Some(limits) => base.with_overrides(limits),
            None => base,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

/// Validated on load; saturates when fields were changed afterwards
fn seconds(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => duration,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_pool_size() -> u32 {
    4
}

fn default_kill_grace() -> f64 {
    0.5
}

fn default_max_output() -> usize {
    1024 * 1024
}
