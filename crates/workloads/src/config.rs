//! Run Configuration
//!
//! Everything that identifies a single test run: the tenant namespace, the
//! names of the objects created in it, the image that runs the notebook
//! tests, where templates and tests live, and how long to wait. Values come
//! from an optional YAML file and are then overridden from the command line.

use crate::error::{Error, Result};
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "test-kubeflow";
pub const DEFAULT_TESTS_IMAGE: &str = "kubeflownotebookswg/jupyter-scipy:v1.7.0";
pub const PYTEST_CMD_BASE: &str = "pytest";

/// Main run configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Profile name, which is also the namespace the Profile controller creates
    pub namespace: String,

    /// Name of the ConfigMap seeded from the env file
    pub configmap_name: String,

    /// Name of the Job running the notebook tests
    pub job_name: String,

    /// Container image the Job runs
    pub tests_image: String,

    /// Host directory holding the notebook tests, mounted into the Job
    pub tests_dir: PathBuf,

    /// Directory holding the Handlebars templates
    pub assets_dir: PathBuf,

    /// Profile template file name, relative to `assets_dir`
    pub profile_template: String,

    /// Job template file name, relative to `assets_dir`
    pub job_template: String,

    /// Command the Job runs before any filter is appended
    pub pytest_cmd_base: String,

    /// Optional pytest `-k` expression
    pub filter: Option<String>,

    /// Optional env file whose entries seed the ConfigMap
    pub env_file: Option<PathBuf>,

    /// Coordinates of the cluster-scoped Profile resource
    pub profile_resource: ProfileResource,

    /// Poll interval and deadlines
    pub wait: WaitConfig,
}

/// Group/version/kind of the Profile custom resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResource {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ProfileResource {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl Default for ProfileResource {
    fn default() -> Self {
        Self {
            group: "kubeflow.org".to_string(),
            version: "v1".to_string(),
            kind: "Profile".to_string(),
        }
    }
}

/// Wait configuration (all values in seconds)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WaitConfig {
    pub poll_interval_seconds: u64,
    pub job_timeout_seconds: u64,
    pub namespace_timeout_seconds: u64,
}

impl WaitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    pub fn namespace_timeout(&self) -> Duration {
        Duration::from_secs(self.namespace_timeout_seconds)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            job_timeout_seconds: 30 * 60,
            namespace_timeout_seconds: 120,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            configmap_name: DEFAULT_NAMESPACE.to_string(),
            job_name: DEFAULT_NAMESPACE.to_string(),
            tests_image: DEFAULT_TESTS_IMAGE.to_string(),
            tests_dir: PathBuf::from("tests"),
            assets_dir: PathBuf::from("assets"),
            profile_template: "test-profile.yaml.hbs".to_string(),
            job_template: "test-job.yaml.hbs".to_string(),
            pytest_cmd_base: PYTEST_CMD_BASE.to_string(),
            filter: None,
            env_file: None,
            profile_resource: ProfileResource::default(),
            wait: WaitConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&raw).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {e}", path.display()))
        })
    }

    /// The command the Job runs, with the `-k` filter appended when present
    pub fn pytest_cmd(&self) -> String {
        match self.filter.as_deref().map(str::trim) {
            Some(filter) if !filter.is_empty() => {
                format!("{} -k '{filter}'", self.pytest_cmd_base)
            }
            _ => self.pytest_cmd_base.clone(),
        }
    }

    pub fn profile_template_path(&self) -> PathBuf {
        self.assets_dir.join(&self.profile_template)
    }

    pub fn job_template_path(&self) -> PathBuf {
        self.assets_dir.join(&self.job_template)
    }

    /// The tests directory as an absolute path, since it ends up in a hostPath volume
    pub fn absolute_tests_dir(&self) -> Result<PathBuf> {
        if self.tests_dir.is_absolute() {
            return Ok(self.tests_dir.clone());
        }
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Failed to resolve current directory: {e}")))?;
        Ok(cwd.join(&self.tests_dir))
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("namespace", &self.namespace),
            ("configmapName", &self.configmap_name),
            ("jobName", &self.job_name),
        ] {
            if !is_dns_label(value) {
                return Err(Error::Config(format!(
                    "{field} '{value}' is not a valid DNS-1123 label"
                )));
            }
        }

        if self.tests_image.trim().is_empty() {
            return Err(Error::Config("testsImage must not be empty".to_string()));
        }
        if self.pytest_cmd_base.trim().is_empty() {
            return Err(Error::Config("pytestCmdBase must not be empty".to_string()));
        }
        if self.profile_resource.version.is_empty() || self.profile_resource.kind.is_empty() {
            return Err(Error::Config(
                "profileResource requires version and kind".to_string(),
            ));
        }
        if let Some(filter) = &self.filter {
            if filter.contains('\'') {
                return Err(Error::Config(
                    "filter must not contain single quotes".to_string(),
                ));
            }
        }

        let wait = &self.wait;
        if wait.poll_interval_seconds == 0 {
            return Err(Error::Config("pollIntervalSeconds must be > 0".to_string()));
        }
        if wait.job_timeout_seconds < wait.poll_interval_seconds
            || wait.namespace_timeout_seconds < wait.poll_interval_seconds
        {
            return Err(Error::Config(
                "timeouts must not be shorter than the poll interval".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}
