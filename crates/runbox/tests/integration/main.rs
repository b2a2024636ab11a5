//! Integration tests for runbox
//!
//! Most tests run agents with the unrestricted provider so they work as any
//! user. Tests needing an interpreter skip when it is not on PATH.
//!
//! Tests that switch uid/gid need root and the `privileged-tests` feature:
//!    cargo test -p runbox --features privileged-tests -- --include-ignored

use std::path::Path;
use std::sync::Arc;

use runbox::agent::{AgentSettings, UnrestrictedArgsProvider};
use runbox::config::{Config, Isolation};
use runbox::{Backpressure, Controller, Identity, RuntimeAgent};

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Whether `program` can be found on PATH
pub(crate) fn has_program(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Skip the current test when `program` is missing
///
/// Defined before the `mod` items below so they see it in textual scope.
macro_rules! require_program {
    ($program:expr) => {
        if !$crate::has_program($program) {
            eprintln!("skipping: {} not found on PATH", $program);
            return;
        }
    };
}

mod agent_state;
mod code_runner;
mod config_loading;
#[cfg(feature = "privileged-tests")]
mod privileged;

/// Agent that keeps the test user's identity
pub(crate) fn unrestricted_agent(id: u32) -> RuntimeAgent {
    RuntimeAgent::new(id, Identity::uniform(id), Arc::new(UnrestrictedArgsProvider))
}

pub(crate) fn unrestricted_pool(size: u32, backpressure: Backpressure) -> Controller {
    Controller::new(
        size,
        Arc::new(UnrestrictedArgsProvider),
        AgentSettings::default(),
        backpressure,
    )
}

/// Default config with workspaces under `root` and no identity switching
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.workspace_root = Some(root.to_path_buf());
    config.isolation = Isolation::Unrestricted;
    config
}

/// Number of entries left under a workspace root
pub(crate) fn leftover_entries(root: &Path) -> usize {
    std::fs::read_dir(root).map(|dir| dir.count()).unwrap_or(0)
}
