use std::sync::Arc;

use runbox::config::{Isolation, Language};
use runbox::{CodeRunner, Controller, ErrorKind, RunnerProps};

use super::{leftover_entries, test_config};

const IDENTITY_OFFSET: u32 = 60_000;

fn restricted_runner(root: &std::path::Path) -> CodeRunner<Arc<Controller>> {
    let mut config = test_config(root);
    config.isolation = Isolation::Process;
    config.identity_offset = IDENTITY_OFFSET;
    config.pool_size = 2;
    let controller = Arc::new(Controller::from_config(&config));
    CodeRunner::new(&config, controller).unwrap()
}

#[tokio::test]
#[ignore = "requires root"]
async fn runs_as_the_agent_identity() {
    require_program!("prlimit");
    require_program!("bash");
    let root = tempfile::tempdir().unwrap();
    let runner = restricted_runner(root.path());

    let output = runner
        .run(&RunnerProps::new(Language::Shell, "id -u; id -g"))
        .await
        .unwrap();

    assert_eq!(output.error(), None, "stderr: {}", output.stderr);
    let expected = IDENTITY_OFFSET + 1;
    assert_eq!(output.stdout, format!("{expected}\n{expected}\n"));
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
#[ignore = "requires root"]
async fn restricted_program_cannot_write_large_files() {
    require_program!("prlimit");
    require_program!("bash");
    let root = tempfile::tempdir().unwrap();
    let runner = restricted_runner(root.path());

    // 1000 byte file size ceiling; /tmp is writable by the agent uid
    let output = runner
        .run(&RunnerProps::new(
            Language::Shell,
            "head -c 4096 /dev/zero > /tmp/runbox-fsize-probe-$$",
        ))
        .await
        .unwrap();

    assert_eq!(output.error(), Some(ErrorKind::ProcessFailure));
}
