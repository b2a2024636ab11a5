//! A library for running small untrusted programs.
//!
//! Runbox takes a language and source text, writes the source into a
//! throwaway workspace and runs it on a pool of runtime agents. Each agent
//! executes under its own unprivileged uid/gid with resource ceilings and a
//! hard wall-clock deadline, and returns the captured stdout and stderr.
//!
//! # Features
//!
//! - **Agent pool**: Fixed-size pool with lowest-id assignment and reject or wait backpressure.
//! - **Restricted identities**: Every agent runs as its own uid/gid, limits applied through `prlimit`.
//! - **Deadlines**: Timed-out programs are killed with their whole process group; partial output is kept.
//! - **Workspaces**: Per-request temporary directories, removed on every exit path.
//! - **TOML configuration**: Languages, pool and isolation settings in one file.

pub use agent::{AgentError, ArgProvider, RuntimeAgent};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use controller::{Backpressure, Controller, DispatchError};
pub use runner::{
    CodeRunner, ErrorKind, Executor, LanguageList, RunRequest, RunResponse, RunnerError,
    RunnerOutput, RunnerProps,
};
pub use types::{AgentState, ExecutionStatus, Identity, ResourceLimits, RunOutput, RunSpec};

pub mod agent;
pub mod config;
pub mod controller;
pub mod runner;
pub mod types;
