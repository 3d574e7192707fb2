//! Request payload templates.
//!
//! Pod and container requests are externally supplied JSON or YAML
//! documents. The harness never models the runtime's schema; it reads the
//! document, sets individual dotted fields, and writes the result to a new
//! file the control-plane CLI can consume.

use std::path::{Path, PathBuf};

use crestore_common::error::{CrestoreError, Result};
use serde_json::{Map, Value};

/// Pod field holding the host directory container logs are written to.
pub const POD_LOG_DIRECTORY: &str = "log_directory";

/// Pod field holding the cgroup parent.
pub const POD_CGROUP_PARENT: &str = "linux.cgroup_parent";

/// Container field holding the image reference.
pub const CONTAINER_IMAGE: &str = "image.image";

/// A loaded request document.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadTemplate {
    source: PathBuf,
    document: Value,
}

impl PayloadTemplate {
    /// Loads a template from disk.
    ///
    /// `.yaml` and `.yml` files are parsed as YAML, everything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, cannot be parsed, or
    /// does not contain a mapping at the top level.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CrestoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let document: Value = if is_yaml(path) {
            serde_yaml::from_str(&content).map_err(|e| payload_error(path, e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| payload_error(path, e.to_string()))?
        };
        if !document.is_object() {
            return Err(payload_error(path, "top level is not a mapping".into()));
        }
        Ok(Self {
            source: path.to_path_buf(),
            document,
        })
    }

    /// Returns a copy of the template with one field replaced.
    ///
    /// Intermediate mappings are created when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if an intermediate segment exists but is not a
    /// mapping, or if the field path is empty.
    pub fn with_field(&self, field: &str, value: impl Into<Value>) -> Result<Self> {
        let mut patched = self.clone();
        set_field(&mut patched.document, field, value.into())
            .map_err(|message| payload_error(&self.source, message))?;
        Ok(patched)
    }

    /// Reads a string field, if present.
    #[must_use]
    pub fn field_str(&self, field: &str) -> Option<&str> {
        field
            .split('.')
            .try_fold(&self.document, |node, key| node.get(key))
            .and_then(Value::as_str)
    }

    /// Writes the document as JSON into `dir` under `file_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let path = dir.join(file_name);
        let rendered = serde_json::to_string_pretty(&self.document)?;
        std::fs::write(&path, rendered).map_err(|e| CrestoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!(template = %self.source.display(), path = %path.display(), "payload written");
        Ok(path)
    }
}

fn set_field(root: &mut Value, field: &str, value: Value) -> std::result::Result<(), String> {
    let segments: Vec<&str> = field.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err("empty field path".into());
    };

    let mut node = root;
    for segment in parents {
        let map = node
            .as_object_mut()
            .ok_or_else(|| format!("`{segment}` is not inside a mapping in `{field}`"))?;
        node = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = node
        .as_object_mut()
        .ok_or_else(|| format!("parent of `{last}` is not a mapping in `{field}`"))?;
    let _ = map.insert((*last).to_string(), value);
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

fn payload_error(path: &Path, message: String) -> CrestoreError {
    CrestoreError::Payload {
        path: path.to_path_buf(),
        message,
    }
}
