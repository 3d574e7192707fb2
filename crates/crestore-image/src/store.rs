//! Bridge into the runtime's backing image store.
//!
//! CRI-O shares containers/storage with `podman`; containerd keeps CRI images
//! in its own namespace, reachable through `ctr`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crestore_common::error::{CrestoreError, Result};
use crestore_runtime::exec::{CommandRunner, CommandSpec};

/// Interval between store polls while waiting for a removal to land.
const REMOVAL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Moves exported images in and out of the runtime's image store.
///
/// Both operations are idempotent.
pub trait ImageStore: Send + Sync {
    /// Imports the image exported at `export`, replacing any stale image
    /// under `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stale image cannot be removed, the import
    /// fails, or the image is not resolvable afterwards.
    fn import(&self, export: &Path, reference: &str) -> Result<()>;

    /// Removes `reference` and waits until the store no longer lists it.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails or is not confirmed in time.
    fn remove(&self, reference: &str) -> Result<()>;
}

/// Store bridge driving `podman`.
pub struct PodmanStore {
    binary: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl PodmanStore {
    /// Creates a bridge using the given binary and per-call deadline.
    #[must_use]
    pub fn new(binary: impl Into<String>, timeout: Duration, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            runner,
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary, self.timeout)
    }

    /// Returns whether the store currently resolves `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub fn exists(&self, reference: &str) -> Result<bool> {
        let spec = self.command().args(["image", "exists"]).arg(reference);
        let output = self.runner.run(&spec)?;
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(CrestoreError::CommandFailed {
                command: spec.to_string(),
                code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

}

/// Polls `exists` until it reports the image gone or `timeout` passes.
fn wait_until_absent(
    query: &str,
    timeout: Duration,
    mut exists: impl FnMut() -> Result<bool>,
) -> Result<()> {
    let start = Instant::now();
    while exists()? {
        if start.elapsed() >= timeout {
            return Err(CrestoreError::Timeout {
                command: query.to_string(),
                timeout,
            });
        }
        std::thread::sleep(REMOVAL_POLL_INTERVAL);
    }
    Ok(())
}

impl ImageStore for PodmanStore {
    fn import(&self, export: &Path, reference: &str) -> Result<()> {
        self.remove(reference)?;

        let load = self
            .command()
            .args(["load", "--input"])
            .arg(export.to_string_lossy());
        let _ = self.runner.run_checked(&load)?;

        if !self.exists(reference)? {
            return Err(CrestoreError::NotFound {
                kind: "imported image",
                id: reference.to_string(),
            });
        }
        tracing::info!(image = reference, export = %export.display(), "image imported into store");
        Ok(())
    }

    fn remove(&self, reference: &str) -> Result<()> {
        let rmi = self
            .command()
            .args(["rmi", "--ignore", "--force"])
            .arg(reference);
        let _ = self.runner.run_checked(&rmi)?;
        let query = format!("{} image exists {reference}", self.binary);
        wait_until_absent(&query, self.timeout, || self.exists(reference))?;
        tracing::info!(image = reference, "image absent from store");
        Ok(())
    }
}

/// Store bridge driving containerd's `ctr` in one namespace.
pub struct CtrStore {
    binary: String,
    namespace: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl CtrStore {
    /// Creates a bridge for `namespace` using the given binary and deadline.
    #[must_use]
    pub fn new(
        binary: impl Into<String>,
        namespace: impl Into<String>,
        timeout: Duration,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            binary: binary.into(),
            namespace: namespace.into(),
            timeout,
            runner,
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary, self.timeout).args(["-n", self.namespace.as_str(), "images"])
    }

    /// Returns whether the namespace currently holds `reference`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub fn exists(&self, reference: &str) -> Result<bool> {
        let spec = self.command().args(["ls", "-q"]).arg(format!("name=={reference}"));
        let output = self.runner.run_checked(&spec)?;
        Ok(output.stdout_lines().iter().any(|line| line.trim() == reference))
    }
}

impl ImageStore for CtrStore {
    fn import(&self, export: &Path, reference: &str) -> Result<()> {
        self.remove(reference)?;

        let import = self.command().arg("import").arg(export.to_string_lossy());
        let _ = self.runner.run_checked(&import)?;

        if !self.exists(reference)? {
            return Err(CrestoreError::NotFound {
                kind: "imported image",
                id: reference.to_string(),
            });
        }
        tracing::info!(image = reference, namespace = %self.namespace, "image imported into containerd");
        Ok(())
    }

    fn remove(&self, reference: &str) -> Result<()> {
        let rm = self.command().args(["rm", "--sync"]).arg(reference);
        let output = self.runner.run(&rm)?;
        if !output.success() && !output.stderr.to_ascii_lowercase().contains("not found") {
            return Err(CrestoreError::CommandFailed {
                command: rm.to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        let query = format!("{} -n {} images ls -q name=={reference}", self.binary, self.namespace);
        wait_until_absent(&query, self.timeout, || self.exists(reference))?;
        tracing::info!(image = reference, namespace = %self.namespace, "image absent from containerd");
        Ok(())
    }
}
