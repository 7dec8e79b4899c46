//! Job lifecycle against an in-memory cluster.

mod common;

use common::{failed, job_definition, running, succeeded, FakeCluster};
use futures::FutureExt;
use kubeflow_workloads::{
    Error, ResourceKey, TerminalStatus, WorkloadCoordinator, WorkloadOutcome, WorkloadStatus,
};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

const NS: &str = "test-kubeflow";
const POLL: Duration = Duration::from_millis(1);

fn job_key() -> ResourceKey {
    ResourceKey::job("test-kubeflow", NS)
}

#[tokio::test]
async fn successful_run_collects_logs_and_deletes_job() {
    let cluster = FakeCluster::new()
        .with_job_statuses(vec![running(), running(), succeeded()])
        .with_logs("test-kubeflow-abcde", "3 passed in 41.2s");
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let report = coordinator
        .run(job_definition("test-kubeflow"), NS, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.outcome, WorkloadOutcome::Succeeded);
    assert_eq!(report.namespace, NS);
    assert_eq!(report.logs.as_deref(), Some("3 passed in 41.2s"));
    assert!(!cluster.contains(&job_key()));
    assert_eq!(
        cluster.operations(),
        vec![
            "create Job test-kubeflow/test-kubeflow".to_string(),
            "delete Job test-kubeflow/test-kubeflow".to_string(),
        ]
    );
}

#[tokio::test]
async fn failed_job_is_reported_not_raised() {
    let cluster = FakeCluster::new()
        .with_job_statuses(vec![failed()])
        .with_logs("test-kubeflow-abcde", "1 failed");
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let report = coordinator
        .run(job_definition("test-kubeflow"), NS, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.outcome, WorkloadOutcome::Failed);
    assert_eq!(report.logs.as_deref(), Some("1 failed"));
    assert!(!cluster.contains(&job_key()));
}

#[tokio::test]
async fn backoff_exhausted_after_a_success_is_a_failure() {
    let cluster = FakeCluster::new().with_job_statuses(vec![serde_json::json!({
        "succeeded": 1,
        "failed": 3,
        "conditions": [{
            "type": "Failed",
            "status": "True",
            "reason": "BackoffLimitExceeded"
        }]
    })]);
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let report = coordinator
        .run(job_definition("test-kubeflow"), NS, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.outcome, WorkloadOutcome::Failed);
    assert!(!cluster.contains(&job_key()));
}

#[tokio::test]
async fn stuck_job_times_out_and_is_still_deleted() {
    let cluster = FakeCluster::new().with_job_statuses(vec![running()]);
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let report = coordinator
        .run(job_definition("test-kubeflow"), NS, Duration::from_millis(5))
        .await
        .unwrap();

    assert_eq!(report.outcome, WorkloadOutcome::TimedOut);
    assert!(!cluster.contains(&job_key()));
}

#[tokio::test]
async fn await_terminal_reports_timeout_error() {
    let cluster = FakeCluster::new().with_job_statuses(vec![running()]);
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let mut handle = coordinator
        .submit(job_definition("test-kubeflow"), NS)
        .await
        .unwrap();
    let err = coordinator
        .await_terminal(&mut handle, Duration::from_millis(5))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(handle.status(), WorkloadStatus::Running);
    coordinator.cleanup(&mut handle).await;
}

#[tokio::test]
async fn terminal_status_is_sticky() {
    let cluster = FakeCluster::new().with_job_statuses(vec![succeeded(), running()]);
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let mut handle = coordinator
        .submit(job_definition("test-kubeflow"), NS)
        .await
        .unwrap();
    let terminal = coordinator
        .await_terminal(&mut handle, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(terminal, TerminalStatus::Succeeded);

    // the cluster would now report Running, but a terminal handle is not polled again
    let status = coordinator.poll_status(&mut handle).await.unwrap();
    assert_eq!(status, WorkloadStatus::Succeeded);
    coordinator.cleanup(&mut handle).await;
}

#[tokio::test]
async fn cleanup_tolerates_external_deletion_and_repeats() {
    let cluster = FakeCluster::new().with_job_statuses(vec![succeeded()]);
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let mut handle = coordinator
        .submit(job_definition("test-kubeflow"), NS)
        .await
        .unwrap();
    cluster.remove_externally(&job_key());

    coordinator.cleanup(&mut handle).await;
    coordinator.cleanup(&mut handle).await;

    assert!(handle.is_cleaned_up());
    let deletes = cluster
        .operations()
        .iter()
        .filter(|op| op.starts_with("delete"))
        .count();
    assert_eq!(deletes, 1);
}

#[tokio::test]
async fn panic_while_observing_still_deletes_job() {
    let cluster = FakeCluster::new().panicking_on_job_status();
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let outcome = AssertUnwindSafe(coordinator.run(
        job_definition("test-kubeflow"),
        NS,
        Duration::from_secs(5),
    ))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert!(!cluster.contains(&job_key()));
    assert_eq!(
        cluster.operations().last().map(String::as_str),
        Some("delete Job test-kubeflow/test-kubeflow")
    );
}

#[tokio::test]
async fn log_failure_does_not_change_outcome() {
    let cluster = FakeCluster::new()
        .with_job_statuses(vec![succeeded()])
        .failing_logs();
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let report = coordinator
        .run(job_definition("test-kubeflow"), NS, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.outcome, WorkloadOutcome::Succeeded);
    assert!(report.logs.is_none());
    assert!(!cluster.contains(&job_key()));
}

#[tokio::test]
async fn logs_from_several_pods_are_labelled() {
    let cluster = FakeCluster::new()
        .with_job_statuses(vec![failed()])
        .with_logs("test-kubeflow-aaaaa", "first attempt")
        .with_logs("test-kubeflow-bbbbb", "second attempt");
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let handle = coordinator
        .submit(job_definition("test-kubeflow"), NS)
        .await
        .unwrap();
    let logs = coordinator.fetch_logs(&handle).await.unwrap();

    assert!(logs.contains("==> test-kubeflow-aaaaa <==\nfirst attempt"));
    assert!(logs.contains("==> test-kubeflow-bbbbb <==\nsecond attempt"));
}

#[tokio::test]
async fn multiple_objects_are_rejected_before_submission() {
    let cluster = FakeCluster::new();
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let mut definition = job_definition("first");
    definition.extend(job_definition("second"));

    let err = coordinator
        .run(definition, NS, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("Expected 1 Job, got 2!"));
    assert!(cluster.operations().is_empty());
}

#[tokio::test]
async fn rejected_create_still_attempts_cleanup() {
    let cluster = FakeCluster::new().failing_create_of("Job");
    let coordinator = WorkloadCoordinator::new(&cluster, POLL);

    let err = coordinator
        .run(job_definition("test-kubeflow"), NS, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(err.is_api_status(500));
    assert_eq!(
        cluster.operations(),
        vec!["delete Job test-kubeflow/test-kubeflow".to_string()]
    );
}
