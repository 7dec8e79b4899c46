//! Auxiliary ConfigMap seeded from an env file.

use crate::cluster::{Cluster, ResourceKey};
use crate::error::{Error, Result};
use crate::probe::Probe;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Parse a `KEY=value` env file into ConfigMap data
pub fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.is_file() {
        return Err(Error::Config(format!(
            "{} is not a valid file path!",
            path.display()
        )));
    }

    let entries = dotenv::from_path_iter(path).map_err(|source| Error::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;

    let mut data = BTreeMap::new();
    for entry in entries {
        let (key, value) = entry.map_err(|source| Error::EnvFile {
            path: path.to_path_buf(),
            source,
        })?;
        data.insert(key, value);
    }
    Ok(data)
}

/// Build the ConfigMap object for `name` in `namespace`
pub fn build_config_map(
    name: &str,
    namespace: &str,
    data: BTreeMap<String, String>,
) -> Result<DynamicObject> {
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "kubeflow-workloads".to_string(),
            )])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };

    let mut value = serde_json::to_value(&config_map)?;
    value["apiVersion"] = "v1".into();
    value["kind"] = "ConfigMap".into();
    Ok(serde_json::from_value(value)?)
}

/// `data` of a ConfigMap read back as a dynamic object
pub fn config_map_data(object: &DynamicObject) -> Result<BTreeMap<String, String>> {
    match object.data.get("data") {
        Some(raw) if !raw.is_null() => Ok(serde_json::from_value(raw.clone())?),
        _ => Ok(BTreeMap::new()),
    }
}

/// Create the ConfigMap, replacing one left over from an earlier run
pub async fn create<C: Cluster + ?Sized>(
    cluster: &C,
    name: &str,
    namespace: &str,
    data: BTreeMap<String, String>,
) -> Result<()> {
    info!(namespace, configmap = name, "Creating ConfigMap {}/{}...", namespace, name);
    let object = build_config_map(name, namespace, data)?;

    match cluster.create(&object).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_api_status(409) => {
            info!(
                namespace,
                configmap = name,
                "ConfigMap exists, updating with latest content"
            );
            cluster.replace(&object).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}

/// Check that the ConfigMap exists and carries exactly `expected`
pub async fn assert_created<C: Cluster + ?Sized>(
    cluster: &C,
    name: &str,
    namespace: &str,
    expected: &BTreeMap<String, String>,
) -> Result<()> {
    let object = cluster
        .get(&ResourceKey::config_map(name, namespace))
        .await
        .require("ConfigMap", &format!("{namespace}/{name}"))?;

    let actual = config_map_data(&object)?;
    if &actual != expected {
        let missing: Vec<_> = expected
            .keys()
            .filter(|k| actual.get(*k) != expected.get(*k))
            .cloned()
            .collect();
        return Err(Error::Validation(format!(
            "ConfigMap {namespace}/{name} data does not match the env file (differing keys: {})",
            missing.join(", ")
        )));
    }

    debug!(namespace, configmap = name, keys = actual.len(), "ConfigMap verified");
    Ok(())
}

pub async fn probe<C: Cluster + ?Sized>(
    cluster: &C,
    name: &str,
    namespace: &str,
) -> Probe<DynamicObject> {
    cluster.get(&ResourceKey::config_map(name, namespace)).await
}

/// Delete the ConfigMap. Missing ConfigMaps are ignored; other failures are logged.
pub async fn delete<C: Cluster + ?Sized>(cluster: &C, name: &str, namespace: &str) {
    info!(namespace, configmap = name, "Deleting ConfigMap {}/{}...", namespace, name);
    match cluster.delete(&ResourceKey::config_map(name, namespace)).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            debug!(namespace, configmap = name, "ConfigMap was already gone");
        }
        Err(e) => {
            warn!(namespace, configmap = name, error = %e, "Failed to delete ConfigMap");
        }
    }
}
