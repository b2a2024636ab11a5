use std::sync::Arc;
use std::time::{Duration, Instant};

use runbox::config::Language;
use runbox::{
    CodeRunner, Controller, ErrorKind, ExecutionStatus, RunRequest, RunResponse, RunnerError,
    RunnerProps,
};

use super::{leftover_entries, test_config};

fn runner(root: &std::path::Path) -> CodeRunner<Arc<Controller>> {
    let config = test_config(root);
    let controller = Arc::new(Controller::from_config(&config));
    CodeRunner::new(&config, controller).expect("default config should build a runner")
}

#[tokio::test]
async fn shell_echo() {
    require_program!("bash");
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());

    let output = runner
        .run(&RunnerProps::new(Language::Shell, "echo hi").with_timeout(3))
        .await
        .unwrap();

    assert_eq!(output.stdout, "hi\n");
    assert_eq!(output.stderr, "");
    assert_eq!(output.error(), None);
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn python_sleep_times_out() {
    require_program!("python3");
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());

    let started = Instant::now();
    let output = runner
        .run(&RunnerProps::new(Language::Python3, "import time; time.sleep(10)").with_timeout(1))
        .await
        .unwrap();

    assert_eq!(output.error(), Some(ErrorKind::Timeout));
    assert_eq!(output.stdout, "");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn python_exit_is_process_failure() {
    require_program!("python3");
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());

    let output = runner
        .run(&RunnerProps::new(Language::Python3, "import sys; sys.exit(1)").with_timeout(3))
        .await
        .unwrap();

    assert_eq!(output.status, ExecutionStatus::ProcessFailure);
    assert_eq!(output.exit_code, Some(1));
    assert_eq!(output.stdout, "");
    assert_eq!(output.stderr, "");
    assert_eq!(leftover_entries(root.path()), 0);
}

#[tokio::test]
async fn source_reaches_the_program_verbatim() {
    require_program!("bash");
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());

    // the script prints itself
    let source = "cat \"$0\"\n# ünïcödé, tabs\tand no trailing newline";
    let output = runner
        .run(&RunnerProps::new(Language::Shell, source))
        .await
        .unwrap();

    assert_eq!(output.stdout, source);
}

#[tokio::test]
async fn program_runs_inside_its_workspace() {
    require_program!("bash");
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());

    let output = runner
        .run(&RunnerProps::new(Language::Shell, "pwd; ls"))
        .await
        .unwrap();

    let mut lines = output.stdout.lines();
    let cwd = lines.next().unwrap();
    assert!(std::path::Path::new(cwd).starts_with(root.path().canonicalize().unwrap()));
    assert_eq!(lines.next(), Some("code.sh"));
}

#[tokio::test]
async fn unsupported_language_touches_nothing() {
    let root = tempfile::tempdir().unwrap();
    let ws_root = root.path().join("workspaces");
    let runner = runner(&ws_root);

    let result = runner
        .run(&RunnerProps::new(Language::Cpp11, "int main() { return 0; }"))
        .await;

    match result {
        Err(RunnerError::UnsupportedLanguage(lang)) => assert_eq!(lang, "cpp11"),
        other => panic!("expected UnsupportedLanguage, got {other:?}"),
    }
    assert!(!ws_root.exists());
    assert_eq!(runner.executor().available(), runner.executor().capacity());
}

#[tokio::test]
async fn workspaces_removed_on_every_outcome() {
    require_program!("bash");
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());

    let cases = [
        ("echo ok", None),
        ("exit 2", None),
        ("sleep 10", Some(ErrorKind::Timeout)),
        ("touch extra; mkdir -p nested/dir", None),
    ];
    for (source, expected) in cases {
        let output = runner
            .run(&RunnerProps::new(Language::Shell, source).with_timeout(1))
            .await
            .unwrap();
        if let Some(kind) = expected {
            assert_eq!(output.error(), Some(kind));
        }
        assert_eq!(leftover_entries(root.path()), 0, "leftover after {source:?}");
    }
}

#[tokio::test]
async fn handle_answers_wire_requests() {
    require_program!("bash");
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());

    let request: RunRequest =
        serde_json::from_str(r#"{"language": "shell", "source": "echo hi; echo oops >&2; exit 3"}"#)
            .unwrap();
    let response = runner.handle(request).await;

    assert_eq!(
        response,
        RunResponse {
            stdout: "hi\n".to_string(),
            stderr: "oops\n".to_string(),
            error: Some(ErrorKind::ProcessFailure),
            message: Some("exited with code 3".to_string()),
        }
    );

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["error"], "process_failure");
}

#[tokio::test]
async fn language_list_body() {
    let root = tempfile::tempdir().unwrap();
    let runner = runner(root.path());

    let body = serde_json::to_value(runner.languages()).unwrap();
    assert_eq!(body, serde_json::json!({ "languages": ["python3", "shell"] }));
}
