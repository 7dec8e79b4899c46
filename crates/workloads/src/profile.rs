//! Kubeflow Profile lifecycle.
//!
//! Creating a Profile makes the Kubeflow profile controller create a
//! namespace of the same name. Workloads may only be submitted once that
//! namespace reports phase `Active`.

use crate::cluster::{Cluster, ResourceKey};
use crate::config::ProfileResource;
use crate::error::{Error, Result};
use crate::probe::Probe;
use crate::templates::{expect_single, ProfileContext, TemplateRenderer};
use kube::api::DynamicObject;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub const NAMESPACE_ACTIVE: &str = "Active";

pub struct ProfileManager<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    renderer: &'a TemplateRenderer,
    resource: ProfileResource,
    template: PathBuf,
    poll_interval: Duration,
}

impl<'a, C: Cluster + ?Sized> ProfileManager<'a, C> {
    pub fn new(
        cluster: &'a C,
        renderer: &'a TemplateRenderer,
        resource: ProfileResource,
        template: PathBuf,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cluster,
            renderer,
            resource,
            template,
            poll_interval,
        }
    }

    fn key(&self, name: &str) -> ResourceKey {
        ResourceKey::cluster_scoped(self.resource.gvk(), name)
    }

    /// Render the Profile template for `namespace` and create it.
    /// A Profile that already exists is left in place.
    pub async fn create(&self, namespace: &str) -> Result<()> {
        info!(namespace, "Creating Profile {}...", namespace);

        let objects = self.renderer.load_all(
            &self.template,
            &ProfileContext {
                namespace: namespace.to_string(),
            },
        )?;
        let profile = expect_single(objects, "Profile")?;
        self.check_kind(&profile)?;

        match self.cluster.create(&profile).await {
            Ok(_) => {
                info!(namespace, "Created Profile {}", namespace);
                Ok(())
            }
            Err(e) if e.is_api_status(409) => {
                info!(namespace, "Profile {} already exists", namespace);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn check_kind(&self, profile: &DynamicObject) -> Result<()> {
        let key = ResourceKey::for_object(profile)?;
        if key.gvk != self.resource.gvk() {
            return Err(Error::Validation(format!(
                "Profile template produced {}/{}, expected {}/{}",
                key.gvk.api_version(),
                key.gvk.kind,
                self.resource.api_version(),
                self.resource.kind
            )));
        }
        Ok(())
    }

    pub async fn probe(&self, namespace: &str) -> Probe<DynamicObject> {
        self.cluster.get(&self.key(namespace)).await
    }

    /// Poll the namespace until its phase is `Active`
    pub async fn wait_namespace_active(&self, namespace: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let key = ResourceKey::namespace(namespace);

        loop {
            let phase = match self.cluster.get(&key).await {
                Probe::Found(ns) => namespace_phase(&ns),
                Probe::Absent => None,
                Probe::Error(e) => return Err(e),
            };

            if phase.as_deref() == Some(NAMESPACE_ACTIVE) {
                info!(namespace, "Namespace {} is Active", namespace);
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout {
                    what: format!("namespace {namespace} to become {NAMESPACE_ACTIVE}"),
                    waited: elapsed,
                });
            }

            debug!(
                namespace,
                phase = phase.as_deref().unwrap_or("<absent>"),
                elapsed_secs = elapsed.as_secs(),
                "Namespace not active yet, waiting..."
            );
            sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Delete the Profile. Missing Profiles are ignored; other failures are logged.
    pub async fn delete(&self, namespace: &str) {
        info!(namespace, "Deleting Profile {}...", namespace);
        match self.cluster.delete(&self.key(namespace)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(namespace, "Profile was already gone");
            }
            Err(e) => {
                warn!(namespace, error = %e, "Failed to delete Profile");
            }
        }
    }
}

/// `status.phase` of a Namespace object
pub fn namespace_phase(namespace: &DynamicObject) -> Option<String> {
    namespace
        .data
        .get("status")
        .and_then(|status| status.get("phase"))
        .and_then(|phase| phase.as_str())
        .map(str::to_string)
}
