//! Cluster API access.
//!
//! The driver talks to Kubernetes only through the [`Cluster`] trait so the
//! lifecycle logic can be exercised against an in-memory cluster in tests.
//! [`KubeCluster`] is the real implementation on top of `kube::Client`; it
//! resolves `apiVersion`/`kind` through API discovery, which is how custom
//! resources such as `Profile` become usable without generated types.

use crate::error::{Error, Result};
use crate::probe::Probe;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, LogParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, Scope};
use kube::{Client, ResourceExt};
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

/// Identifies one object in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub gvk: GroupVersionKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceKey {
    pub fn cluster_scoped(gvk: GroupVersionKind, name: impl Into<String>) -> Self {
        Self {
            gvk,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn namespaced(
        gvk: GroupVersionKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            gvk,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    pub fn job(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::namespaced(GroupVersionKind::gvk("batch", "v1", "Job"), name, namespace)
    }

    pub fn config_map(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::namespaced(GroupVersionKind::gvk("", "v1", "ConfigMap"), name, namespace)
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        Self::cluster_scoped(GroupVersionKind::gvk("", "v1", "Namespace"), name)
    }

    /// Key of a rendered object; the object must carry a type and a name
    pub fn for_object(object: &DynamicObject) -> Result<Self> {
        let gvk = gvk_of(object)?;
        let name = object.metadata.name.clone().ok_or_else(|| {
            Error::Validation(format!("{} object has no metadata.name", gvk.kind))
        })?;
        Ok(Self {
            gvk,
            name,
            namespace: object.metadata.namespace.clone(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.gvk.kind, ns, self.name),
            None => write!(f, "{} {}", self.gvk.kind, self.name),
        }
    }
}

/// Group/version/kind of a rendered object, read from its `apiVersion` and `kind`
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| Error::Validation("object has no apiVersion/kind".to_string()))?;
    if types.kind.is_empty() || types.api_version.is_empty() {
        return Err(Error::Validation(
            "object has an empty apiVersion or kind".to_string(),
        ));
    }
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Logs of one pod belonging to a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodLog {
    pub pod: String,
    pub text: String,
}

/// The subset of the Kubernetes API the driver uses.
///
/// Objects passed to `create` and `replace` carry their target namespace in
/// `metadata.namespace`; cluster-scoped objects leave it unset.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject>;

    async fn replace(&self, object: &DynamicObject) -> Result<DynamicObject>;

    async fn get(&self, key: &ResourceKey) -> Probe<DynamicObject>;

    /// Delete an object; a missing object is reported as `Error::NotFound`
    async fn delete(&self, key: &ResourceKey) -> Result<()>;

    /// Logs of every pod in `namespace` matching `label_selector`
    async fn pod_logs(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodLog>>;
}

/// [`Cluster`] backed by a live API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    async fn api_for(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>> {
        let (resource, capabilities) = discovery::pinned_kind(&self.client, gvk)
            .await
            .map_err(|source| Error::Discovery {
                api_version: gvk.api_version(),
                kind: gvk.kind.clone(),
                source,
            })?;

        let api = match (capabilities.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            (Scope::Namespaced, None) => {
                Api::default_namespaced_with(self.client.clone(), &resource)
            }
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api)
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let key = ResourceKey::for_object(object)?;
        let api = self.api_for(&key.gvk, key.namespace.as_deref()).await?;
        debug!(resource = %key, "Creating object");
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn replace(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let key = ResourceKey::for_object(object)?;
        let api = self.api_for(&key.gvk, key.namespace.as_deref()).await?;

        // Replace requires the current resourceVersion
        let existing = api.get(&key.name).await?;
        let mut updated = object.clone();
        updated.metadata.resource_version = existing.resource_version();

        debug!(resource = %key, "Replacing object");
        Ok(api
            .replace(&key.name, &PostParams::default(), &updated)
            .await?)
    }

    async fn get(&self, key: &ResourceKey) -> Probe<DynamicObject> {
        let api = match self.api_for(&key.gvk, key.namespace.as_deref()).await {
            Ok(api) => api,
            Err(err) => return Probe::Error(err),
        };
        Probe::from_result(api.get(&key.name).await.map_err(Error::from))
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let api = self.api_for(&key.gvk, key.namespace.as_deref()).await?;
        debug!(resource = %key, "Deleting object");
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(Error::NotFound {
                kind: key.gvk.kind.clone(),
                name: key.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn pod_logs(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodLog>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await?;

        let names = list.items.iter().map(ResourceExt::name_any).collect();
        Ok(collect_pod_logs(names, |name| {
            let pods = pods.clone();
            async move {
                pods.logs(&name, &LogParams::default())
                    .await
                    .map_err(Error::from)
            }
        })
        .await)
    }
}

/// Fetch the logs of each pod in turn. A pod whose logs cannot be read is
/// kept with a note in place of its logs, so one failure does not hide the rest.
async fn collect_pod_logs<F, Fut>(names: Vec<String>, fetch: F) -> Vec<PodLog>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut logs = Vec::with_capacity(names.len());
    for name in names {
        let text = match fetch(name.clone()).await {
            Ok(text) => text,
            Err(e) => {
                warn!(pod = %name, error = %e, "Failed to fetch pod logs");
                format!("<logs unavailable: {e}>")
            }
        };
        logs.push(PodLog { pod: name, text });
    }
    logs
}
