//! In-memory cluster used by the integration tests.
//!
//! Stores objects by key, plays back a scripted list of Job statuses on
//! every GET of a Job, and emulates the Kubeflow profile controller by
//! creating an `Active` namespace next to every Profile.

#![allow(dead_code)]

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use kubeflow_workloads::cluster::gvk_of;
use kubeflow_workloads::{Cluster, Error, PodLog, Probe, ResourceKey, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    objects: HashMap<ResourceKey, DynamicObject>,
    job_statuses: VecDeque<Value>,
    logs: Vec<PodLog>,
    operations: Vec<String>,
    created: Vec<DynamicObject>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    inactive_namespaces: bool,
    panic_on_job_status: bool,
    fail_create_kind: Option<String>,
    fail_logs: bool,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job statuses returned by successive GETs; the last one repeats
    pub fn with_job_statuses(self, statuses: Vec<Value>) -> Self {
        self.state.lock().unwrap().job_statuses = statuses.into();
        self
    }

    /// Namespaces stay `Pending` instead of becoming `Active`
    pub fn with_inactive_namespaces(mut self) -> Self {
        self.inactive_namespaces = true;
        self
    }

    /// Job GETs panic, simulating a crash while the workload is observed
    pub fn panicking_on_job_status(mut self) -> Self {
        self.panic_on_job_status = true;
        self
    }

    /// Every create of `kind` fails with an API error
    pub fn failing_create_of(mut self, kind: &str) -> Self {
        self.fail_create_kind = Some(kind.to_string());
        self
    }

    pub fn failing_logs(mut self) -> Self {
        self.fail_logs = true;
        self
    }

    pub fn with_logs(self, pod: &str, text: &str) -> Self {
        self.state.lock().unwrap().logs.push(PodLog {
            pod: pod.to_string(),
            text: text.to_string(),
        });
        self
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    pub fn object(&self, key: &ResourceKey) -> Option<DynamicObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    /// Every object currently stored
    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Create/delete calls in the order they happened, e.g. `create Job ns/name`
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Every object of `kind` that was successfully created, including deleted ones
    pub fn created(&self, kind: &str) -> Vec<DynamicObject> {
        self.state
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|obj| obj.types.as_ref().is_some_and(|t| t.kind == kind))
            .cloned()
            .collect()
    }

    /// Remove an object behind the driver's back
    pub fn remove_externally(&self, key: &ResourceKey) {
        self.state.lock().unwrap().objects.remove(key);
    }

    pub fn insert(&self, object: DynamicObject) {
        let key = ResourceKey::for_object(&object).unwrap();
        self.state.lock().unwrap().objects.insert(key, object);
    }

    fn namespace_object(name: &str, phase: &str) -> DynamicObject {
        let mut ns = DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "Namespace".to_string(),
            }),
            metadata: Default::default(),
            data: json!({ "status": { "phase": phase } }),
        };
        ns.metadata.name = Some(name.to_string());
        ns
    }

    fn api_error(code: u16, message: &str) -> Error {
        Error::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: String::new(),
            code,
        }))
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let key = ResourceKey::for_object(object)?;
        if self.fail_create_kind.as_deref() == Some(key.kind()) {
            return Err(Self::api_error(500, "injected create failure"));
        }

        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("create {key}"));
        if state.objects.contains_key(&key) {
            return Err(Self::api_error(409, "already exists"));
        }

        if key.kind() == "Profile" {
            let phase = if self.inactive_namespaces { "Pending" } else { "Active" };
            state.objects.insert(
                ResourceKey::namespace(&key.name),
                Self::namespace_object(&key.name, phase),
            );
        }
        state.created.push(object.clone());
        state.objects.insert(key, object.clone());
        Ok(object.clone())
    }

    async fn replace(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let key = ResourceKey::for_object(object)?;
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("replace {key}"));
        if !state.objects.contains_key(&key) {
            return Err(Self::api_error(404, "not found"));
        }
        state.objects.insert(key, object.clone());
        Ok(object.clone())
    }

    async fn get(&self, key: &ResourceKey) -> Probe<DynamicObject> {
        if key.kind() == "Job" && self.panic_on_job_status {
            panic!("status read exploded");
        }

        let mut state = self.state.lock().unwrap();
        let Some(mut object) = state.objects.get(key).cloned() else {
            return Probe::Absent;
        };

        if key.kind() == "Job" {
            let status = if state.job_statuses.len() > 1 {
                state.job_statuses.pop_front()
            } else {
                state.job_statuses.front().cloned()
            };
            if let Some(status) = status {
                object.data["status"] = status.clone();
                if let Some(stored) = state.objects.get_mut(key) {
                    stored.data["status"] = status;
                }
            }
        }
        Probe::Found(object)
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("delete {key}"));
        if state.objects.remove(key).is_none() {
            return Err(Error::NotFound {
                kind: key.kind().to_string(),
                name: key.name.clone(),
            });
        }
        if key.kind() == "Profile" {
            state.objects.remove(&ResourceKey::namespace(&key.name));
        }
        Ok(())
    }

    async fn pod_logs(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodLog>> {
        if self.fail_logs {
            return Err(Self::api_error(500, "log stream unavailable"));
        }
        let state = self.state.lock().unwrap();
        let job_name = label_selector.trim_start_matches("job-name=");
        if !state
            .objects
            .contains_key(&ResourceKey::job(job_name, namespace))
        {
            return Ok(Vec::new());
        }
        Ok(state.logs.clone())
    }
}

pub fn running() -> Value {
    json!({ "active": 1 })
}

pub fn succeeded() -> Value {
    json!({
        "succeeded": 1,
        "conditions": [{ "type": "Complete", "status": "True" }]
    })
}

pub fn failed() -> Value {
    json!({
        "failed": 1,
        "conditions": [{ "type": "Failed", "status": "True" }]
    })
}

/// The crate's own template directory
pub fn assets_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

/// A single rendered Job definition for the given name
pub fn job_definition(name: &str) -> Vec<DynamicObject> {
    let object: DynamicObject = serde_json::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": name },
        "spec": { "backoffLimit": 0 }
    }))
    .unwrap();
    assert!(gvk_of(&object).is_ok());
    vec![object]
}
