//! Existence probes.
//!
//! A GET against the cluster can come back with the object, with a 404, or
//! with some other failure. Callers that only care whether something exists
//! match on [`Probe`] instead of inspecting status codes on an error.

use crate::error::{Error, Result};

#[derive(Debug)]
pub enum Probe<T> {
    Found(T),
    Absent,
    Error(Error),
}

impl<T> Probe<T> {
    /// Classify the result of a GET, mapping `NotFound` and HTTP 404 to `Absent`.
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Probe::Found(value),
            Err(err) if err.is_not_found() || err.is_api_status(404) => Probe::Absent,
            Err(err) => Probe::Error(err),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Probe::Found(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Probe::Absent)
    }

    /// `Some(value)` when found, `None` when absent; other failures propagate.
    pub fn into_option(self) -> Result<Option<T>> {
        match self {
            Probe::Found(value) => Ok(Some(value)),
            Probe::Absent => Ok(None),
            Probe::Error(err) => Err(err),
        }
    }

    /// Require the object to exist, turning absence into `Error::NotFound`.
    pub fn require(self, kind: &str, name: &str) -> Result<T> {
        self.into_option()?.ok_or_else(|| Error::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Probe<U> {
        match self {
            Probe::Found(value) => Probe::Found(f(value)),
            Probe::Absent => Probe::Absent,
            Probe::Error(err) => Probe::Error(err),
        }
    }
}
