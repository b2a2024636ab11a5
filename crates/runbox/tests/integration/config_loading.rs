use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use runbox::config::{BackpressurePolicy, Config, Isolation, Language};
use runbox::{Backpressure, Controller, Identity};

use super::FIXTURES_PATH;

fn fixture(name: &str) -> String {
    format!("{FIXTURES_PATH}/configs/{name}")
}

#[test]
fn test_load_valid_config() {
    let config = Config::from_file(fixture("valid_full.toml")).expect("Failed to load config");

    assert_eq!(
        config.workspace_root(),
        PathBuf::from("/var/lib/runbox/work")
    );
    assert_eq!(config.default_timeout, 5);
    assert_eq!(config.isolation, Isolation::Process);
    assert_eq!(config.backpressure, BackpressurePolicy::Wait);
    assert_eq!(config.max_wait(), Some(Duration::from_secs(10)));
    assert_eq!(config.kill_grace(), Duration::from_secs(1));
    assert_eq!(config.default_limits.cpu_time, Some(4));

    let registry = config.registry().unwrap();
    assert_eq!(registry.runnable(), vec![Language::Python3, Language::Shell]);
    assert_eq!(
        registry.run_command(Language::Shell, "/w/code.sh"),
        Some(vec![
            "bash".to_string(),
            "--norc".to_string(),
            "/w/code.sh".to_string()
        ])
    );
}

#[test]
fn test_pool_from_loaded_config() {
    let config = Config::from_file(fixture("valid_full.toml")).unwrap();
    let pool = Controller::from_config(&config);

    assert_eq!(pool.capacity(), 8);
    assert_eq!(pool.agent(1).unwrap().identity(), Identity::uniform(20001));
    assert_eq!(pool.agent(8).unwrap().identity(), Identity::uniform(20008));
    assert_eq!(pool.agent(1).unwrap().settings().max_output, 65536);
    assert_eq!(
        pool.backpressure(),
        Backpressure::Wait {
            max_wait: Some(Duration::from_secs(10))
        }
    );
}

#[test]
fn test_load_minimal_config() {
    let config = Config::from_file(fixture("valid_minimal.toml")).expect("Failed to load config");

    assert!(config.languages.contains_key("shell"));
    assert_eq!(config.pool_size, 4);
    assert_eq!(config.default_timeout, 3);
    assert_eq!(config.isolation, Isolation::Process);
}

#[test]
fn test_example_config_is_default() {
    let config = Config::parse_toml(runbox::EXAMPLE_CONFIG).unwrap();
    let defaults = Config::default();
    assert_eq!(config.pool_size, defaults.pool_size);
    let ids: BTreeSet<_> = config.languages.keys().collect();
    let default_ids: BTreeSet<_> = defaults.languages.keys().collect();
    assert_eq!(ids, default_ids);
}

#[test]
fn test_load_invalid_configs() {
    for name in [
        "invalid_empty_name.toml",
        "invalid_empty_extension.toml",
        "invalid_empty_run_command.toml",
        "invalid_duplicate_extension.toml",
        "invalid_isolation.toml",
        "invalid_kill_grace.toml",
    ] {
        assert!(
            Config::from_file(fixture(name)).is_err(),
            "{name} should be rejected"
        );
    }
}

#[test]
fn test_load_missing_file() {
    assert!(Config::from_file(fixture("does_not_exist.toml")).is_err());
}
