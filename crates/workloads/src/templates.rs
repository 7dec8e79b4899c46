//! Template rendering for the Profile and Job manifests.
//!
//! Templates are Handlebars files producing (possibly multi-document) YAML.
//! Rendering yields a list of `DynamicObject`s; callers then insist on the
//! exact number of objects they expect with [`expect_single`].

use crate::cluster::gvk_of;
use crate::error::{Error, Result};
use handlebars::Handlebars;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Variables available to the Profile template
#[derive(Debug, Clone, Serialize)]
pub struct ProfileContext {
    pub namespace: String,
}

/// Variables available to the Job template
#[derive(Debug, Clone, Serialize)]
pub struct JobContext {
    pub configmap_name: String,
    pub job_name: String,
    pub test_dir: String,
    pub test_image: String,
    pub pytest_cmd: String,
}

pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        // Missing variables must fail instead of rendering an empty field
        handlebars.set_strict_mode(true);
        // Output is YAML, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn render_str<T: Serialize>(&self, template: &str, context: &T) -> Result<String> {
        Ok(self.handlebars.render_template(template, context)?)
    }

    pub fn render_file<T: Serialize>(&self, path: &Path, context: &T) -> Result<String> {
        debug!("Loading template from: {}", path.display());
        let template = fs::read_to_string(path).map_err(|source| Error::TemplateFile {
            path: path.to_path_buf(),
            source,
        })?;
        self.render_str(&template, context)
    }

    /// Render a template file and parse every YAML document it produces
    pub fn load_all<T: Serialize>(&self, path: &Path, context: &T) -> Result<Vec<DynamicObject>> {
        let rendered = self.render_file(path, context)?;
        parse_all_yaml(&rendered)
    }
}

/// Parse a multi-document YAML stream into objects, skipping empty documents
pub fn parse_all_yaml(input: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_json::from_value(serde_json::to_value(&value)?)?;
        gvk_of(&object)?;
        objects.push(object);
    }
    Ok(objects)
}

/// Exactly one object, or a `Validation` error naming what was expected
pub fn expect_single(mut objects: Vec<DynamicObject>, what: &str) -> Result<DynamicObject> {
    if objects.len() != 1 {
        return Err(Error::Validation(format!(
            "Expected 1 {what}, got {}!",
            objects.len()
        )));
    }
    Ok(objects.remove(0))
}
