//! Code runner for runbox
//!
//! Takes a language and source text, materializes the source in a fresh
//! workspace, runs it through an [`Executor`] and always removes the
//! workspace afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub use crate::runner::workspace::{WORKSPACE_PREFIX, Workspace, WorkspaceError};

mod workspace;

use crate::agent::{AgentError, RuntimeAgent};
use crate::config::{Config, ConfigError, Language, LanguageConfig, LanguageRegistry};
use crate::controller::{Controller, DispatchError};
use crate::types::{ExecutionStatus, RunOutput, RunSpec, SpecError};

/// Anything that can run an execution spec: a single agent or the pool
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, spec: &RunSpec) -> Result<RunOutput, DispatchError>;
}

#[async_trait]
impl Executor for Controller {
    async fn execute(&self, spec: &RunSpec) -> Result<RunOutput, DispatchError> {
        self.submit_request(spec).await
    }
}

#[async_trait]
impl Executor for RuntimeAgent {
    async fn execute(&self, spec: &RunSpec) -> Result<RunOutput, DispatchError> {
        Ok(self.safe_run_cmd(spec).await?)
    }
}

#[async_trait]
impl<T: Executor + ?Sized> Executor for Arc<T> {
    async fn execute(&self, spec: &RunSpec) -> Result<RunOutput, DispatchError> {
        (**self).execute(spec).await
    }
}

/// A single run request
#[derive(Debug, Clone)]
pub struct RunnerProps {
    pub language: Language,
    pub source: String,

    /// Seconds; the configured default applies when None
    pub timeout: Option<u64>,
}

impl RunnerProps {
    pub fn new(language: Language, source: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// Captured output of a run plus how it ended
#[derive(Debug, Clone)]
pub struct RunnerOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_time: f64,
}

impl RunnerOutput {
    /// Error classification, None when the program succeeded
    pub fn error(&self) -> Option<ErrorKind> {
        match self.status {
            ExecutionStatus::Success => None,
            ExecutionStatus::Timeout => Some(ErrorKind::Timeout),
            ExecutionStatus::ProcessFailure => Some(ErrorKind::ProcessFailure),
        }
    }

    fn message(&self) -> Option<String> {
        match self.status {
            ExecutionStatus::Success => None,
            ExecutionStatus::Timeout => Some("time limit exceeded".to_string()),
            ExecutionStatus::ProcessFailure => Some(match (self.exit_code, self.signal) {
                (Some(code), _) => format!("exited with code {code}"),
                (None, Some(signal)) => format!("killed by signal {signal}"),
                (None, None) => "process failed".to_string(),
            }),
        }
    }
}

impl From<RunOutput> for RunnerOutput {
    fn from(output: RunOutput) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status,
            exit_code: output.exit_code,
            signal: output.signal,
            wall_time: output.wall_time,
        }
    }
}

/// Errors that stop a run from producing output
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("invalid request: {0}")]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::UnsupportedLanguage(_) => ErrorKind::UnsupportedLanguage,
            RunnerError::Workspace(_) => ErrorKind::WriteFailure,
            RunnerError::Spec(_) => ErrorKind::InvalidRequest,
            RunnerError::Dispatch(DispatchError::PoolExhausted { .. })
            | RunnerError::Dispatch(DispatchError::Agent(AgentError::Busy(_))) => {
                ErrorKind::PoolExhausted
            }
            // the program could not be started or waited on
            RunnerError::Dispatch(DispatchError::Agent(_)) => ErrorKind::ProcessFailure,
        }
    }
}

/// Wire-level classification of a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ProcessFailure,
    UnsupportedLanguage,
    WriteFailure,
    PoolExhausted,
    InvalidRequest,
}

/// Run request as received from a front end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub language: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Run response sent back to a front end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<RunnerOutput> for RunResponse {
    fn from(output: RunnerOutput) -> Self {
        Self {
            error: output.error(),
            message: output.message(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

impl From<RunnerError> for RunResponse {
    fn from(err: RunnerError) -> Self {
        Self {
            error: Some(err.kind()),
            message: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// Body of the language list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageList {
    pub languages: Vec<String>,
}

impl From<&LanguageRegistry> for LanguageList {
    fn from(registry: &LanguageRegistry) -> Self {
        Self {
            languages: registry
                .runnable()
                .iter()
                .map(|lang| lang.id().to_string())
                .collect(),
        }
    }
}

/// Runs source text through an executor inside throwaway workspaces
#[derive(Debug)]
pub struct CodeRunner<E> {
    executor: E,
    registry: LanguageRegistry,
    workspace_root: PathBuf,
    default_timeout: u64,
}

impl<E: Executor> CodeRunner<E> {
    pub fn new(config: &Config, executor: E) -> Result<Self, ConfigError> {
        Ok(Self {
            executor,
            registry: config.registry()?,
            workspace_root: config.workspace_root(),
            default_timeout: config.default_timeout,
        })
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn workspace_root(&self) -> &std::path::Path {
        &self.workspace_root
    }

    /// Languages that can be run, by id
    pub fn languages(&self) -> LanguageList {
        LanguageList::from(&self.registry)
    }

    /// Run a request in a fresh workspace
    ///
    /// Unsupported languages and invalid timeouts fail before any file I/O.
    /// The workspace is removed on every exit path.
    #[instrument(skip(self, props), fields(language = %props.language, source_len = props.source.len()))]
    pub async fn run(&self, props: &RunnerProps) -> Result<RunnerOutput, RunnerError> {
        let (source_name, command) = self.resolve(props.language)?;
        let timeout = props.timeout.unwrap_or(self.default_timeout);
        SpecError::check_timeout(timeout)?;

        let workspace = Workspace::create(&self.workspace_root).await?;
        let result = self
            .run_in(&workspace, &source_name, command, timeout, props)
            .await;
        // the run result wins over a cleanup failure
        if let Err(e) = workspace.close() {
            debug!(error = %e, "keeping run result despite workspace cleanup failure");
        }

        if let Err(ref e) = result {
            debug!(error = %e, "run failed");
        }
        result
    }

    /// Like [`run`](Self::run), but takes a wire request and always answers
    pub async fn handle(&self, request: RunRequest) -> RunResponse {
        let language = match request.language.parse::<Language>() {
            Ok(language) => language,
            Err(_) => {
                warn!(language = %request.language, "unknown language requested");
                return RunnerError::UnsupportedLanguage(request.language).into();
            }
        };

        let props = RunnerProps {
            language,
            source: request.source,
            timeout: request.timeout,
        };
        match self.run(&props).await {
            Ok(output) => output.into(),
            Err(e) => e.into(),
        }
    }

    fn resolve(&self, language: Language) -> Result<(String, &[String]), RunnerError> {
        let unsupported = || RunnerError::UnsupportedLanguage(language.to_string());
        let command = self
            .registry
            .get(language)
            .and_then(|config| config.run.as_deref())
            .filter(|command| !command.is_empty())
            .ok_or_else(unsupported)?;
        let source_name = self.registry.source_name(language).ok_or_else(unsupported)?;
        Ok((source_name, command))
    }

    async fn run_in(
        &self,
        workspace: &Workspace,
        source_name: &str,
        command: &[String],
        timeout: u64,
        props: &RunnerProps,
    ) -> Result<RunnerOutput, RunnerError> {
        let source_path = workspace
            .write_source(source_name, props.source.as_bytes())
            .await?;
        let argv = LanguageConfig::expand_command(command, &source_path.to_string_lossy());
        let spec = RunSpec::new(argv, timeout)?.with_working_dir(workspace.path());

        let output = self.executor.execute(&spec).await?;
        debug!(status = ?output.status, wall_time = output.wall_time, "run complete");
        Ok(output.into())
    }
}
