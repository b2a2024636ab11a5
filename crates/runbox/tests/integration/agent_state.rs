use std::sync::Arc;
use std::time::{Duration, Instant};

use runbox::agent::{ArgProvider, CancelScope, Invocation, ProviderError};
use runbox::{AgentError, ExecutionStatus, Identity, RunSpec, RuntimeAgent};

use super::unrestricted_agent;

#[tokio::test]
async fn not_ready_for_whole_execution() {
    let agent = Arc::new(unrestricted_agent(1));
    assert!(agent.is_ready());

    let job = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move {
            let spec = RunSpec::new(["sleep", "1"], 5).unwrap();
            agent.safe_run_cmd(&spec).await
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!agent.is_ready());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!agent.is_ready());

    let output = job.await.unwrap().unwrap();
    assert!(output.is_success());
    assert!(agent.is_ready());
}

#[tokio::test]
async fn concurrent_jobs_on_one_agent() {
    let agent = Arc::new(unrestricted_agent(1));

    let jobs: Vec<_> = (0..2)
        .map(|_| {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move {
                let spec = RunSpec::new(["sleep", "0.5"], 5).unwrap();
                agent.safe_run_cmd(&spec).await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut busy = 0;
    for job in jobs {
        match job.await.unwrap() {
            Ok(output) if output.is_success() => succeeded += 1,
            Err(AgentError::Busy(1)) => busy += 1,
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!((succeeded, busy), (1, 1));
    assert!(agent.is_ready());
}

#[tokio::test]
async fn timeout_keeps_partial_output() {
    let agent = unrestricted_agent(1);
    let spec = RunSpec::new(["sh", "-c", "echo start; echo warn >&2; sleep 10"], 1).unwrap();

    let started = Instant::now();
    let output = agent.safe_run_cmd(&spec).await.unwrap();

    assert_eq!(output.status, ExecutionStatus::Timeout);
    assert_eq!(output.stdout, "start\n");
    assert_eq!(output.stderr, "warn\n");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(agent.is_ready());
}

#[tokio::test]
async fn background_children_cannot_hold_the_pipes() {
    let agent = unrestricted_agent(1);
    let spec = RunSpec::new(["sh", "-c", "sleep 10 & echo bg"], 5).unwrap();

    let started = Instant::now();
    let output = agent.safe_run_cmd(&spec).await.unwrap();

    assert_eq!(output.status, ExecutionStatus::Success);
    assert_eq!(output.stdout, "bg\n");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn signal_death_is_process_failure() {
    let agent = unrestricted_agent(1);
    let spec = RunSpec::new(["sh", "-c", "kill -9 $$"], 5).unwrap();

    let output = agent.safe_run_cmd(&spec).await.unwrap();
    assert_eq!(output.status, ExecutionStatus::ProcessFailure);
    assert_eq!(output.signal, Some(9));
    assert_eq!(output.exit_code, None);
}

#[derive(Debug)]
struct PanickingProvider;

impl ArgProvider for PanickingProvider {
    fn provide(
        &self,
        _spec: &RunSpec,
        _identity: Identity,
        _scope: &CancelScope,
    ) -> Result<Invocation, ProviderError> {
        panic!("provider exploded");
    }
}

#[tokio::test]
async fn panic_restores_ready() {
    let agent = Arc::new(RuntimeAgent::new(
        1,
        Identity::uniform(1),
        Arc::new(PanickingProvider),
    ));

    let job = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move {
            let spec = RunSpec::new(["true"], 1).unwrap();
            agent.safe_run_cmd(&spec).await
        })
    };

    assert!(job.await.unwrap_err().is_panic());
    assert!(agent.is_ready());
}
