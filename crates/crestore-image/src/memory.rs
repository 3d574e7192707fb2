//! In-memory converter and store for exercising the image-mediated path
//! without a builder or store binary.
//!
//! The "export" written by [`MemoryImageBridge::convert`] records the archive
//! path; importing it registers that archive under the reference with the
//! [`MemoryRuntime`], which then restores from it on create.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crestore_common::error::{CrestoreError, Result};
use crestore_common::types::CheckpointImage;
use crestore_runtime::backend::memory::MemoryRuntime;

use crate::converter::ArtifactConverter;
use crate::store::ImageStore;

/// Converter and store backed by a shared [`MemoryRuntime`].
#[derive(Debug)]
pub struct MemoryImageBridge {
    runtime: Arc<MemoryRuntime>,
    reference: String,
    failing: Mutex<Vec<&'static str>>,
    calls: Mutex<Vec<String>>,
}

impl MemoryImageBridge {
    /// Creates a bridge committing images under `reference`.
    #[must_use]
    pub fn new(runtime: Arc<MemoryRuntime>, reference: impl Into<String>) -> Self {
        Self {
            runtime,
            reference: reference.into(),
            failing: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Makes every later call of `operation` (`convert`, `import`, `remove`)
    /// fail.
    pub fn fail_on(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(operation);
        }
    }

    /// Returns the operations called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(operation.to_string());
        }
        let failing = self.failing.lock().is_ok_and(|f| f.contains(&operation));
        if failing {
            return Err(CrestoreError::CommandFailed {
                command: format!("memory-image {operation}"),
                code: 1,
                stderr: "injected failure".into(),
            });
        }
        Ok(())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CrestoreError + '_ {
    move |source| CrestoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl ArtifactConverter for MemoryImageBridge {
    fn convert(&self, archive: &Path, container_name: &str, export: &Path) -> Result<CheckpointImage> {
        self.enter("convert")?;
        if !archive.is_file() {
            return Err(CrestoreError::NotFound {
                kind: "checkpoint archive",
                id: archive.display().to_string(),
            });
        }
        std::fs::write(export, archive.to_string_lossy().as_bytes()).map_err(io_error(export))?;
        tracing::debug!(container_name, export = %export.display(), "memory image exported");
        Ok(CheckpointImage {
            reference: self.reference.clone(),
            export_path: export.to_path_buf(),
        })
    }
}

impl ImageStore for MemoryImageBridge {
    fn import(&self, export: &Path, reference: &str) -> Result<()> {
        self.remove(reference)?;
        self.enter("import")?;
        let archive = std::fs::read_to_string(export).map_err(io_error(export))?;
        self.runtime.register_image(reference, &PathBuf::from(archive.trim()));
        Ok(())
    }

    fn remove(&self, reference: &str) -> Result<()> {
        self.enter("remove")?;
        self.runtime.unregister_image(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_makes_reference_resolvable_and_remove_forgets_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("cp.tar");
        std::fs::write(&archive, b"checkpoint").expect("archive");
        let runtime = Arc::new(MemoryRuntime::new());
        let bridge = MemoryImageBridge::new(Arc::clone(&runtime), "localhost/cp:latest");

        let image = bridge
            .convert(&archive, "counter", &dir.path().join("cp-image.tar"))
            .expect("convert");
        bridge.import(&image.export_path, &image.reference).expect("import");
        assert!(runtime.has_image("localhost/cp:latest"));

        bridge.remove(&image.reference).expect("remove");
        assert!(!runtime.has_image("localhost/cp:latest"));
        assert_eq!(bridge.calls(), ["convert", "remove", "import", "remove"]);
    }

    #[test]
    fn convert_of_missing_archive_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bridge = MemoryImageBridge::new(Arc::new(MemoryRuntime::new()), "localhost/cp:latest");
        let err = bridge
            .convert(&dir.path().join("absent.tar"), "counter", &dir.path().join("out.tar"))
            .expect_err("missing archive");
        assert!(matches!(err, CrestoreError::NotFound { .. }));
    }
}
