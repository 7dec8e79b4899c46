//! The notebook test run.
//!
//! Resources are acquired in the order Profile, ConfigMap, Job and released
//! in reverse. A release is armed as soon as its create call returns, so a
//! failure (or panic) after that point still releases everything acquired
//! so far, while a resource whose create failed is never deleted.

use crate::cluster::Cluster;
use crate::config::RunConfig;
use crate::configmap;
use crate::error::Result;
use crate::profile::ProfileManager;
use crate::templates::{JobContext, TemplateRenderer};
use crate::workload::{WorkloadCoordinator, WorkloadOutcome, WorkloadReport};
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{error, info};

/// Outcome of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub namespace: String,
    /// Name of the auxiliary ConfigMap, when one was created
    pub configmap: Option<String>,
    pub workload: WorkloadReport,
}

impl SuiteReport {
    pub fn is_success(&self) -> bool {
        self.workload.outcome.is_success()
    }

    /// 0 on success, 1 when the workload failed, 2 when it timed out
    pub fn exit_code(&self) -> u8 {
        match self.workload.outcome {
            WorkloadOutcome::Succeeded => 0,
            WorkloadOutcome::Failed => 1,
            WorkloadOutcome::TimedOut => 2,
        }
    }
}

/// Run `body`, then `release`, even if `body` panics
async fn release_after<T>(body: impl Future<Output = T>, release: impl Future<Output = ()>) -> T {
    let outcome = AssertUnwindSafe(body).catch_unwind().await;
    release.await;
    match outcome {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

pub struct Suite<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    config: RunConfig,
    renderer: TemplateRenderer,
}

impl<'a, C: Cluster + ?Sized> Suite<'a, C> {
    pub fn new(cluster: &'a C, config: RunConfig) -> Self {
        Self {
            cluster,
            config,
            renderer: TemplateRenderer::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn profiles(&self) -> ProfileManager<'_, C> {
        ProfileManager::new(
            self.cluster,
            &self.renderer,
            self.config.profile_resource.clone(),
            self.config.profile_template_path(),
            self.config.wait.poll_interval(),
        )
    }

    pub async fn run(&self) -> Result<SuiteReport> {
        let namespace = self.config.namespace.as_str();
        info!(namespace, "Starting Kubeflow workloads run");

        let profiles = self.profiles();
        profiles.create(namespace).await?;
        release_after(self.run_in_profile(&profiles), profiles.delete(namespace)).await
    }

    async fn run_in_profile(&self, profiles: &ProfileManager<'_, C>) -> Result<SuiteReport> {
        let namespace = self.config.namespace.as_str();

        profiles.probe(namespace).await.require("Profile", namespace)?;
        profiles
            .wait_namespace_active(namespace, self.config.wait.namespace_timeout())
            .await?;

        let Some(env_file) = &self.config.env_file else {
            let workload = self.run_workload().await?;
            return Ok(self.report(None, workload));
        };

        let data = configmap::read_env_file(env_file)?;
        let name = self.config.configmap_name.as_str();

        configmap::create(self.cluster, name, namespace, data.clone()).await?;
        let workload = release_after(
            self.run_with_configmap(&data),
            configmap::delete(self.cluster, name, namespace),
        )
        .await?;

        Ok(self.report(Some(name.to_string()), workload))
    }

    async fn run_with_configmap(&self, data: &BTreeMap<String, String>) -> Result<WorkloadReport> {
        let namespace = self.config.namespace.as_str();
        let name = self.config.configmap_name.as_str();

        configmap::assert_created(self.cluster, name, namespace, data).await?;
        self.run_workload().await
    }

    async fn run_workload(&self) -> Result<WorkloadReport> {
        let config = &self.config;
        let context = JobContext {
            configmap_name: config.configmap_name.clone(),
            job_name: config.job_name.clone(),
            test_dir: config.absolute_tests_dir()?.display().to_string(),
            test_image: config.tests_image.clone(),
            pytest_cmd: config.pytest_cmd(),
        };
        let definition = self
            .renderer
            .load_all(&config.job_template_path(), &context)?;

        let coordinator = WorkloadCoordinator::new(self.cluster, config.wait.poll_interval());
        let report = coordinator
            .run(definition, &config.namespace, config.wait.job_timeout())
            .await?;

        match report.outcome {
            WorkloadOutcome::Succeeded => {
                info!(
                    namespace = %report.namespace,
                    job = %report.name,
                    elapsed_secs = report.elapsed.as_secs(),
                    "Notebook tests passed"
                );
            }
            WorkloadOutcome::Failed => {
                error!(
                    namespace = %report.namespace,
                    job = %report.name,
                    "Something went wrong while running Job {}/{}. Please inspect the attached logs for more info...",
                    report.namespace,
                    report.name
                );
            }
            WorkloadOutcome::TimedOut => {
                error!(
                    namespace = %report.namespace,
                    job = %report.name,
                    timeout_secs = config.wait.job_timeout_seconds,
                    "Job {}/{} did not finish in time; the run is inconclusive",
                    report.namespace,
                    report.name
                );
            }
        }

        Ok(report)
    }

    fn report(&self, configmap: Option<String>, workload: WorkloadReport) -> SuiteReport {
        SuiteReport {
            namespace: self.config.namespace.clone(),
            configmap,
            workload,
        }
    }
}
