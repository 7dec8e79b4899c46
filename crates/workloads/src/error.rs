//! Error types shared by the driver.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A rendered template or a cluster object did not have the expected shape
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested object does not exist in the cluster
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),

    #[error("Failed to resolve {api_version}/{kind} through API discovery: {source}")]
    Discovery {
        api_version: String,
        kind: String,
        #[source]
        source: kube::Error,
    },

    /// A terminal state was not reached before the deadline
    #[error("Timed out after {}s waiting for {what}", waited.as_secs())]
    Timeout { what: String, waited: Duration },

    #[error("Template rendering error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("Failed to read template {}: {source}", path.display())]
    TemplateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read env file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenv::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::Api(err)
    }
}

impl Error {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True for an API response with the given HTTP status code
    #[must_use]
    pub fn is_api_status(&self, code: u16) -> bool {
        matches!(self, Error::Api(kube::Error::Api(ae)) if ae.code == code)
    }
}
