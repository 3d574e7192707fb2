//! Run-scoped resources.
//!
//! A [`RunContext`] owns the run-local temporary directory, the helper files
//! registered for removal, and the run's single success flag. Dropping it
//! releases everything, so cleanup happens on every exit path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crestore_common::constants::APP_NAME;
use crestore_common::error::{CrestoreError, Result};
use crestore_common::types::RestoreVariant;
use tempfile::TempDir;
use uuid::Uuid;

/// Resources owned by one harness invocation.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    root: PathBuf,
    dir: Option<TempDir>,
    keep: bool,
    helper_files: Vec<PathBuf>,
    success: bool,
    released: bool,
}

impl RunContext {
    /// Creates the run directory under the system temp location.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create(keep: bool) -> Result<Self> {
        Self::create_in(&std::env::temp_dir(), keep)
    }

    /// Creates the run directory under `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create_in(parent: &Path, keep: bool) -> Result<Self> {
        let run_id = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("{APP_NAME}-{}-", run_id.simple()))
            .tempdir_in(parent)
            .map_err(|e| CrestoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        let root = dir.path().to_path_buf();
        tracing::info!(run_id = %run_id, dir = %root.display(), "run directory created");
        Ok(Self {
            run_id,
            started_at: Utc::now(),
            root,
            dir: Some(dir),
            keep,
            helper_files: Vec::new(),
            success: false,
            released: false,
        })
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns when the run started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the run directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates and returns a fresh directory for one scenario.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn scenario_dir(&self, variant: RestoreVariant) -> Result<PathBuf> {
        let dir = self.root.join(variant.to_string());
        let logs = dir.join("logs");
        std::fs::create_dir_all(&logs).map_err(|e| CrestoreError::Io {
            path: logs.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    /// Registers an extra file to delete during release.
    pub fn register_helper(&mut self, path: impl Into<PathBuf>) {
        self.helper_files.push(path.into());
    }

    /// Sets the success flag. Called only after a fully verified run.
    pub fn mark_success(&mut self) {
        self.success = true;
    }

    /// Returns the success flag.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.success
    }

    /// Deletes the run directory and helper files.
    ///
    /// Failures are logged and returned as messages; they never change the
    /// success flag. Calling this more than once is harmless.
    pub fn release(&mut self) -> Vec<String> {
        if self.released {
            return Vec::new();
        }
        self.released = true;

        let mut problems = Vec::new();
        for helper in self.helper_files.drain(..) {
            match std::fs::remove_file(&helper) {
                Ok(()) => tracing::debug!(path = %helper.display(), "helper removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %helper.display(), error = %e, "failed to remove helper");
                    problems.push(format!("{}: {e}", helper.display()));
                }
            }
        }

        if let Some(dir) = self.dir.take() {
            if self.keep {
                let kept = dir.keep();
                tracing::info!(dir = %kept.display(), "run directory kept");
            } else if let Err(e) = dir.close() {
                tracing::warn!(dir = %self.root.display(), error = %e, "failed to remove run directory");
                problems.push(format!("{}: {e}", self.root.display()));
            } else {
                tracing::debug!(dir = %self.root.display(), "run directory removed");
            }
        }
        problems
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_flag_defaults_false() {
        let parent = tempfile::tempdir().expect("tempdir");
        let mut ctx = RunContext::create_in(parent.path(), false).expect("ctx");
        assert!(!ctx.succeeded());
        ctx.mark_success();
        assert!(ctx.succeeded());
    }

    #[test]
    fn drop_removes_run_directory_and_helpers() {
        let parent = tempfile::tempdir().expect("tempdir");
        let helper = parent.path().join("helper-bin");
        std::fs::write(&helper, b"#!/bin/sh\n").expect("helper");

        let path = {
            let mut ctx = RunContext::create_in(parent.path(), false).expect("ctx");
            ctx.register_helper(&helper);
            let scenario = ctx.scenario_dir(RestoreVariant::Direct).expect("scenario");
            std::fs::write(scenario.join("cp.tar"), b"x").expect("archive");
            ctx.path().to_path_buf()
        };
        assert!(!path.exists());
        assert!(!helper.exists());
    }

    #[test]
    fn keep_retains_run_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let mut ctx = RunContext::create_in(parent.path(), true).expect("ctx");
        let path = ctx.path().to_path_buf();
        assert!(ctx.release().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn release_is_idempotent_and_tolerates_missing_helpers() {
        let parent = tempfile::tempdir().expect("tempdir");
        let mut ctx = RunContext::create_in(parent.path(), false).expect("ctx");
        ctx.register_helper(parent.path().join("never-created"));
        assert!(ctx.release().is_empty());
        assert!(ctx.release().is_empty());
    }

    #[test]
    fn scenario_dir_has_log_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let ctx = RunContext::create_in(parent.path(), false).expect("ctx");
        let dir = ctx.scenario_dir(RestoreVariant::Image).expect("scenario");
        assert!(dir.join("logs").is_dir());
        assert!(dir.ends_with("image-mediated"));
    }
}
