//! Runtime control-plane abstraction.
//!
//! The harness manipulates pods and containers only through
//! [`ControlPlane`]. The production implementation shells out to `crictl`;
//! tests substitute an in-memory runtime.

pub mod crictl;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use std::path::Path;
use std::time::Duration;

use crestore_common::error::Result;
use crestore_common::types::{ContainerId, PodId};

use crate::exec::ExecOutput;

/// Request files for one container in one pod.
#[derive(Debug, Clone, Copy)]
pub struct ContainerRequest<'a> {
    /// Pod the container is created in.
    pub pod: &'a PodId,
    /// Patched container request file.
    pub container_spec: &'a Path,
    /// Patched pod request file the pod was created from.
    pub pod_spec: &'a Path,
}

/// Operations the harness needs from a container runtime.
///
/// Every call is synchronous and bounded by a deadline. Removal operations
/// are idempotent: an already absent target is success.
pub trait ControlPlane: Send + Sync {
    /// Creates and starts a pod sandbox from a request file.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the request or times out.
    fn create_pod(&self, pod_spec: &Path) -> Result<PodId>;

    /// Creates a container inside an existing pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the request or times out.
    fn create_container(&self, request: ContainerRequest<'_>) -> Result<ContainerId>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    fn start_container(&self, id: &ContainerId) -> Result<()>;

    /// Runs a command inside a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the command exits non-zero or times out.
    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput>;

    /// Returns the container's log lines.
    ///
    /// # Errors
    ///
    /// Returns an error if logs cannot be retrieved.
    fn logs(&self, id: &ContainerId) -> Result<Vec<String>>;

    /// Checkpoints a running container and exports the archive to `export`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails or exceeds `timeout`.
    fn checkpoint(&self, id: &ContainerId, export: &Path, timeout: Duration) -> Result<()>;

    /// Lists the containers of a pod, in any state.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    fn list_containers(&self, pod: &PodId) -> Result<Vec<ContainerId>>;

    /// Stops and removes a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container exists and cannot be removed.
    fn stop_and_remove_container(&self, id: &ContainerId) -> Result<()>;

    /// Stops and removes a pod with all its containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod exists and cannot be removed.
    fn remove_pod(&self, id: &PodId) -> Result<()>;

    /// Force-removes every pod known to the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot complete the removal.
    fn remove_all_pods(&self) -> Result<()>;

    /// Pulls an image into the runtime's store.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails or times out.
    fn pull_image(&self, reference: &str) -> Result<()>;

    /// Removes an image from the runtime's store.
    ///
    /// # Errors
    ///
    /// Returns an error if the image exists and cannot be removed.
    fn remove_image(&self, reference: &str) -> Result<()>;
}

/// Returns true if a CLI error message means the target does not exist.
#[must_use]
pub fn is_absent_message(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    ["not found", "no such", "does not exist", "image not known"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_messages_are_recognised() {
        assert!(is_absent_message("rpc error: code = NotFound desc = could not find pod: not found"));
        assert!(is_absent_message("Error: no such image"));
        assert!(is_absent_message("Error: localhost/cp:latest: image not known"));
        assert!(!is_absent_message("context deadline exceeded"));
    }
}
