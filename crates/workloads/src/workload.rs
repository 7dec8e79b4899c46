//! Workload lifecycle coordination.
//!
//! A workload is a Kubernetes `Job` rendered from a template. The
//! coordinator submits it, polls its status until it finishes or the
//! deadline passes, collects the logs of its pods and deletes it again.
//! [`WorkloadCoordinator::run`] strings those steps together and always
//! deletes the Job, whatever happens in between.

use crate::cluster::{Cluster, ResourceKey};
use crate::error::{Error, Result};
use crate::probe::Probe;
use crate::templates::expect_single;
use futures::FutureExt;
use k8s_openapi::api::batch::v1::JobStatus;
use kube::api::DynamicObject;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Status of a workload as last read back from the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkloadStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl WorkloadStatus {
    /// Classify a Job's status sub-resource
    pub fn from_job_status(status: Option<&JobStatus>) -> Self {
        let Some(status) = status else {
            return WorkloadStatus::Pending;
        };

        let has_condition = |kind: &str| {
            status
                .conditions
                .as_ref()
                .is_some_and(|conds| conds.iter().any(|c| c.type_ == kind && c.status == "True"))
        };
        let active = status.active.unwrap_or(0);

        // A Failed condition wins over pods that succeeded before the backoff limit was hit
        if has_condition("Complete") {
            WorkloadStatus::Succeeded
        } else if has_condition("Failed") || (status.failed.unwrap_or(0) > 0 && active == 0) {
            WorkloadStatus::Failed
        } else if status.succeeded.unwrap_or(0) > 0 && active == 0 {
            WorkloadStatus::Succeeded
        } else if active > 0 {
            WorkloadStatus::Running
        } else {
            WorkloadStatus::Pending
        }
    }

    /// Classify a Job read back as a dynamic object
    pub fn from_object(object: &DynamicObject) -> Result<Self> {
        let status = match object.data.get("status") {
            Some(raw) if !raw.is_null() => Some(serde_json::from_value::<JobStatus>(raw.clone())?),
            _ => None,
        };
        Ok(Self::from_job_status(status.as_ref()))
    }

    pub fn is_terminal(self) -> bool {
        self.terminal().is_some()
    }

    pub fn terminal(self) -> Option<TerminalStatus> {
        match self {
            WorkloadStatus::Succeeded => Some(TerminalStatus::Succeeded),
            WorkloadStatus::Failed => Some(TerminalStatus::Failed),
            WorkloadStatus::Pending | WorkloadStatus::Running => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            WorkloadStatus::Pending => 0,
            WorkloadStatus::Running => 1,
            WorkloadStatus::Succeeded | WorkloadStatus::Failed => 2,
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadStatus::Pending => "Pending",
            WorkloadStatus::Running => "Running",
            WorkloadStatus::Succeeded => "Succeeded",
            WorkloadStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminalStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalStatus::Succeeded => f.write_str("Succeeded"),
            TerminalStatus::Failed => f.write_str("Failed"),
        }
    }
}

/// A submitted workload. Owned by the coordinator until cleanup.
#[derive(Debug)]
pub struct WorkloadHandle {
    key: ResourceKey,
    status: WorkloadStatus,
    cleaned_up: bool,
}

impl WorkloadHandle {
    fn new(key: ResourceKey) -> Self {
        Self {
            key,
            status: WorkloadStatus::Pending,
            cleaned_up: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn namespace(&self) -> &str {
        self.key.namespace.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn status(&self) -> WorkloadStatus {
        self.status
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// Record an observation. Terminal states stick and status never moves backwards.
    fn observe(&mut self, status: WorkloadStatus) -> WorkloadStatus {
        if !self.status.is_terminal() && status.rank() >= self.status.rank() {
            self.status = status;
        }
        self.status
    }
}

/// How a workload run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkloadOutcome {
    Succeeded,
    Failed,
    /// No terminal state before the deadline; the run is inconclusive
    TimedOut,
}

impl WorkloadOutcome {
    pub fn is_success(self) -> bool {
        self == WorkloadOutcome::Succeeded
    }
}

impl fmt::Display for WorkloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadOutcome::Succeeded => f.write_str("Succeeded"),
            WorkloadOutcome::Failed => f.write_str("Failed"),
            WorkloadOutcome::TimedOut => f.write_str("TimedOut"),
        }
    }
}

/// Result of [`WorkloadCoordinator::run`]
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub name: String,
    pub namespace: String,
    pub outcome: WorkloadOutcome,
    /// Pod logs, when they could be fetched
    pub logs: Option<String>,
    pub elapsed: Duration,
}

pub struct WorkloadCoordinator<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    poll_interval: Duration,
}

impl<'a, C: Cluster + ?Sized> WorkloadCoordinator<'a, C> {
    pub fn new(cluster: &'a C, poll_interval: Duration) -> Self {
        Self {
            cluster,
            poll_interval,
        }
    }

    /// Validate a rendered definition and bind it to `namespace` without contacting the cluster
    fn prepare(
        definition: Vec<DynamicObject>,
        namespace: &str,
    ) -> Result<(DynamicObject, WorkloadHandle)> {
        let mut object = expect_single(definition, "Job")?;
        object.metadata.namespace = Some(namespace.to_string());

        let key = ResourceKey::for_object(&object)?;
        if key.gvk.group != "batch" || key.gvk.kind != "Job" {
            return Err(Error::Validation(format!(
                "Expected a batch Job, got {}/{}",
                key.gvk.api_version(),
                key.gvk.kind
            )));
        }
        Ok((object, WorkloadHandle::new(key)))
    }

    /// Send the workload definition to the cluster, scoped to `namespace`
    pub async fn submit(
        &self,
        definition: Vec<DynamicObject>,
        namespace: &str,
    ) -> Result<WorkloadHandle> {
        let (object, handle) = Self::prepare(definition, namespace)?;
        self.create(&object, &handle).await?;
        Ok(handle)
    }

    async fn create(&self, object: &DynamicObject, handle: &WorkloadHandle) -> Result<()> {
        info!(
            namespace = handle.namespace(),
            job = handle.name(),
            "Starting Kubernetes Job {}/{}",
            handle.namespace(),
            handle.name()
        );
        self.cluster.create(object).await?;
        Ok(())
    }

    /// Read the current status once. A handle already in a terminal state is not polled again.
    pub async fn poll_status(&self, handle: &mut WorkloadHandle) -> Result<WorkloadStatus> {
        if handle.status.is_terminal() {
            return Ok(handle.status);
        }

        let object = match self.cluster.get(&handle.key).await {
            Probe::Found(object) => object,
            Probe::Absent => {
                return Err(Error::NotFound {
                    kind: "Job".to_string(),
                    name: format!("{}/{}", handle.namespace(), handle.name()),
                })
            }
            Probe::Error(err) => return Err(err),
        };

        let observed = WorkloadStatus::from_object(&object)?;
        Ok(handle.observe(observed))
    }

    /// Poll until the workload reaches `Succeeded` or `Failed`, or `timeout` elapses
    pub async fn await_terminal(
        &self,
        handle: &mut WorkloadHandle,
        timeout: Duration,
    ) -> Result<TerminalStatus> {
        let start = Instant::now();

        loop {
            let status = self.poll_status(handle).await?;
            if let Some(terminal) = status.terminal() {
                info!(
                    namespace = handle.namespace(),
                    job = handle.name(),
                    status = %terminal,
                    elapsed_secs = start.elapsed().as_secs(),
                    "Job reached terminal state"
                );
                return Ok(terminal);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(
                    namespace = handle.namespace(),
                    job = handle.name(),
                    status = %status,
                    elapsed_secs = elapsed.as_secs(),
                    "Timeout waiting for Job"
                );
                return Err(Error::Timeout {
                    what: format!("Job {}/{}", handle.namespace(), handle.name()),
                    waited: elapsed,
                });
            }

            debug!(
                namespace = handle.namespace(),
                job = handle.name(),
                status = %status,
                elapsed_secs = elapsed.as_secs(),
                "Job still running, waiting..."
            );
            sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Logs of the workload's pods. Failures are logged and returned, never fatal.
    pub async fn fetch_logs(&self, handle: &WorkloadHandle) -> Result<String> {
        info!(
            namespace = handle.namespace(),
            job = handle.name(),
            "Fetching Job logs..."
        );
        let selector = format!("job-name={}", handle.name());
        let pods = match self.cluster.pod_logs(handle.namespace(), &selector).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(
                    namespace = handle.namespace(),
                    job = handle.name(),
                    error = %e,
                    "Failed to fetch Job logs"
                );
                return Err(e);
            }
        };

        let text = match pods.as_slice() {
            [single] => single.text.clone(),
            _ => pods
                .iter()
                .map(|p| format!("==> {} <==\n{}", p.pod, p.text))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        Ok(text)
    }

    /// Delete the workload. Safe to call repeatedly; never fails.
    pub async fn cleanup(&self, handle: &mut WorkloadHandle) {
        if handle.cleaned_up {
            debug!(job = handle.name(), "Job already cleaned up");
            return;
        }
        handle.cleaned_up = true;

        info!(
            namespace = handle.namespace(),
            job = handle.name(),
            "Deleting Job {}/{}...",
            handle.namespace(),
            handle.name()
        );
        match self.cluster.delete(&handle.key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(job = handle.name(), "Job was already gone");
            }
            Err(e) => {
                warn!(
                    namespace = handle.namespace(),
                    job = handle.name(),
                    error = %e,
                    "Failed to delete Job"
                );
            }
        }
    }

    /// Submit, wait, fetch logs and delete. The Job is deleted on every path,
    /// including a panic while it is being observed.
    pub async fn run(
        &self,
        definition: Vec<DynamicObject>,
        namespace: &str,
        timeout: Duration,
    ) -> Result<WorkloadReport> {
        let (object, mut handle) = Self::prepare(definition, namespace)?;
        let start = Instant::now();

        let result = AssertUnwindSafe(self.observe(&object, &mut handle, timeout))
            .catch_unwind()
            .await;

        self.cleanup(&mut handle).await;

        let (outcome, logs) = match result {
            Ok(observed) => observed?,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        Ok(WorkloadReport {
            name: handle.name().to_string(),
            namespace: handle.namespace().to_string(),
            outcome,
            logs,
            elapsed: start.elapsed(),
        })
    }

    async fn observe(
        &self,
        object: &DynamicObject,
        handle: &mut WorkloadHandle,
        timeout: Duration,
    ) -> Result<(WorkloadOutcome, Option<String>)> {
        self.create(object, handle).await?;

        let waited = self.await_terminal(handle, timeout).await;
        let logs = self.fetch_logs(handle).await.ok();
        if let Some(text) = &logs {
            info!(job = handle.name(), "Job logs:\n{}", text);
        }

        let outcome = match waited {
            Ok(TerminalStatus::Succeeded) => WorkloadOutcome::Succeeded,
            Ok(TerminalStatus::Failed) => WorkloadOutcome::Failed,
            Err(e) if e.is_timeout() => WorkloadOutcome::TimedOut,
            Err(e) => return Err(e),
        };
        Ok((outcome, logs))
    }
}
