//! Harness-side view of pod and container lifecycles.
//!
//! The runtime is the source of truth; these records track what the harness
//! has asked for so that illegal transitions (checkpointing a container that
//! was never started, restoring into the pod that was checkpointed) are
//! rejected before a control-plane call is made.

use std::path::PathBuf;

use crestore_common::error::{CrestoreError, Result};
use crestore_common::types::{ContainerId, ContainerState, ImageRef, PodId, PodState};

/// A pod sandbox created during a scenario.
#[derive(Debug, Clone)]
pub struct PodSandbox {
    /// Identifier assigned by the runtime.
    pub id: PodId,
    /// Patched request file the pod was created from.
    pub spec_path: PathBuf,
    /// Cgroup parent written into the request, if any.
    pub cgroup_parent: Option<String>,
    /// Current lifecycle state.
    pub state: PodState,
}

impl PodSandbox {
    /// Records a freshly created pod.
    #[must_use]
    pub const fn running(id: PodId, spec_path: PathBuf, cgroup_parent: Option<String>) -> Self {
        Self {
            id,
            spec_path,
            cgroup_parent,
            state: PodState::Running,
        }
    }

    /// Marks the pod as removed.
    pub fn tear_down(&mut self) {
        self.state = PodState::TornDown;
        tracing::debug!(pod = %self.id, "pod marked torn down");
    }

    /// Checks that a container checkpointed in `original` may be restored
    /// into this pod.
    ///
    /// # Errors
    ///
    /// Returns an error if this pod is not running, if it is the original
    /// pod, or if the original pod has not been torn down yet.
    pub fn accepts_restore_from(&self, original: &Self) -> Result<()> {
        let refused = |why: String| {
            Err(CrestoreError::Config {
                message: format!("cannot restore into pod {}: {why}", self.id),
            })
        };
        if self.state != PodState::Running {
            return refused(format!("pod is {}", self.state));
        }
        if self.id == original.id {
            return refused("it is the pod the checkpoint was taken in".into());
        }
        if original.state != PodState::TornDown {
            return refused(format!("original pod {} is still {}", original.id, original.state));
        }
        Ok(())
    }
}

/// A container created during a scenario.
#[derive(Debug, Clone)]
pub struct Container {
    /// Identifier assigned by the runtime.
    pub id: ContainerId,
    /// Pod the container lives in.
    pub pod: PodId,
    /// Image or archive the container was created from.
    pub image: ImageRef,
    /// Current lifecycle state.
    pub state: ContainerState,
}

impl Container {
    /// Records a freshly created container.
    #[must_use]
    pub const fn created(id: ContainerId, pod: PodId, image: ImageRef) -> Self {
        Self {
            id,
            pod,
            image,
            state: ContainerState::Created,
        }
    }

    /// Transitions `Created` to `Started`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not in `Created`.
    pub fn mark_started(&mut self) -> Result<()> {
        self.transition(ContainerState::Created, ContainerState::Started)
    }

    /// Transitions `Started` to `Checkpointed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not running.
    pub fn mark_checkpointed(&mut self) -> Result<()> {
        if !self.state.can_checkpoint() {
            return Err(CrestoreError::Config {
                message: format!(
                    "container {} cannot be checkpointed while {}",
                    self.id, self.state
                ),
            });
        }
        self.state = ContainerState::Checkpointed;
        Ok(())
    }

    /// Marks the container as stopped, from any state.
    pub fn mark_stopped(&mut self) {
        self.state = ContainerState::Stopped;
    }

    fn transition(&mut self, from: ContainerState, to: ContainerState) -> Result<()> {
        if self.state != from {
            return Err(CrestoreError::Config {
                message: format!(
                    "container {} cannot move to {to} while {}",
                    self.id, self.state
                ),
            });
        }
        self.state = to;
        tracing::debug!(container = %self.id, state = %to, "container state changed");
        Ok(())
    }
}
