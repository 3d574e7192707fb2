//! `crictl`-backed control-plane client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crestore_common::config::Timeouts;
use crestore_common::constants::COMMAND_GRACE_MS;
use crestore_common::error::{CrestoreError, Result};
use crestore_common::types::{ContainerId, PodId};

use super::{ContainerRequest, ControlPlane, is_absent_message};
use crate::exec::{CommandRunner, CommandSpec, ExecOutput};

/// Drives a CRI runtime through the `crictl` command line.
///
/// Each call passes the runtime endpoint and the call's deadline to
/// `crictl --timeout`; the process itself is killed a short grace period
/// after that deadline if `crictl` does not return on its own.
pub struct CrictlClient {
    binary: String,
    endpoint: String,
    timeouts: Timeouts,
    runner: Arc<dyn CommandRunner>,
}

impl CrictlClient {
    /// Creates a client for the runtime listening on `endpoint`.
    #[must_use]
    pub fn new(
        binary: impl Into<String>,
        endpoint: impl Into<String>,
        timeouts: Timeouts,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            binary: binary.into(),
            endpoint: endpoint.into(),
            timeouts,
            runner,
        }
    }

    fn command(&self, timeout: Duration) -> CommandSpec {
        CommandSpec::new(
            &self.binary,
            timeout + Duration::from_millis(COMMAND_GRACE_MS),
        )
        .arg(format!("--runtime-endpoint={}", self.endpoint))
        .arg(format!("--timeout={}s", timeout.as_secs().max(1)))
    }

    /// Runs a command that prints an identifier on its first output line.
    fn run_for_id(&self, spec: &CommandSpec, kind: &str) -> Result<String> {
        let output = self.runner.run_checked(spec)?;
        output
            .stdout_lines()
            .into_iter()
            .next()
            .map(|line| line.trim().to_string())
            .ok_or_else(|| CrestoreError::Config {
                message: format!("`{spec}` returned no {kind} id"),
            })
    }

    /// Runs a removal, treating "not found" as success.
    fn run_idempotent(&self, spec: &CommandSpec) -> Result<()> {
        match self.runner.run_checked(spec) {
            Ok(_) => Ok(()),
            Err(CrestoreError::CommandFailed { stderr, .. }) if is_absent_message(&stderr) => {
                tracing::debug!(cmd = %spec, "target already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl ControlPlane for CrictlClient {
    fn create_pod(&self, pod_spec: &Path) -> Result<PodId> {
        let spec = self
            .command(self.timeouts.call())
            .arg("runp")
            .arg(pod_spec.to_string_lossy());
        let id = self.run_for_id(&spec, "pod")?;
        tracing::info!(pod = %id, "pod sandbox created");
        Ok(PodId::new(id))
    }

    fn create_container(&self, request: ContainerRequest<'_>) -> Result<ContainerId> {
        let spec = self
            .command(self.timeouts.create())
            .arg("create")
            .arg(request.pod.as_str())
            .arg(request.container_spec.to_string_lossy())
            .arg(request.pod_spec.to_string_lossy());
        let id = self.run_for_id(&spec, "container")?;
        tracing::info!(pod = %request.pod, container = %id, "container created");
        Ok(ContainerId::new(id))
    }

    fn start_container(&self, id: &ContainerId) -> Result<()> {
        let spec = self.command(self.timeouts.call()).arg("start").arg(id.as_str());
        let _ = self.runner.run_checked(&spec)?;
        tracing::info!(container = %id, "container started");
        Ok(())
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        if cmd.is_empty() {
            return Err(CrestoreError::Config {
                message: "exec command is empty".into(),
            });
        }
        tracing::debug!(container = %id, cmd = ?cmd, "exec into container");
        let spec = self
            .command(self.timeouts.call())
            .arg("exec")
            .arg(id.as_str())
            .args(cmd.iter().cloned());
        self.runner.run_checked(&spec)
    }

    fn logs(&self, id: &ContainerId) -> Result<Vec<String>> {
        let spec = self.command(self.timeouts.call()).arg("logs").arg(id.as_str());
        Ok(self.runner.run_checked(&spec)?.stdout_lines())
    }

    fn checkpoint(&self, id: &ContainerId, export: &Path, timeout: Duration) -> Result<()> {
        let spec = self
            .command(timeout)
            .arg("checkpoint")
            .arg(format!("--export={}", export.display()))
            .arg(id.as_str());
        let _ = self.runner.run_checked(&spec)?;
        tracing::info!(container = %id, archive = %export.display(), "container checkpointed");
        Ok(())
    }

    fn list_containers(&self, pod: &PodId) -> Result<Vec<ContainerId>> {
        let spec = self
            .command(self.timeouts.call())
            .args(["ps", "--all", "--quiet", "--pod"])
            .arg(pod.as_str());
        let output = self.runner.run_checked(&spec)?;
        Ok(output
            .stdout_lines()
            .into_iter()
            .map(|line| ContainerId::new(line.trim()))
            .collect())
    }

    fn stop_and_remove_container(&self, id: &ContainerId) -> Result<()> {
        let stop = self.command(self.timeouts.call()).arg("stop").arg(id.as_str());
        self.run_idempotent(&stop)?;
        let rm = self.command(self.timeouts.call()).arg("rm").arg(id.as_str());
        self.run_idempotent(&rm)?;
        tracing::info!(container = %id, "container removed");
        Ok(())
    }

    fn remove_pod(&self, id: &PodId) -> Result<()> {
        let stop = self.command(self.timeouts.call()).arg("stopp").arg(id.as_str());
        self.run_idempotent(&stop)?;
        let rm = self.command(self.timeouts.call()).arg("rmp").arg(id.as_str());
        self.run_idempotent(&rm)?;
        tracing::info!(pod = %id, "pod sandbox removed");
        Ok(())
    }

    fn remove_all_pods(&self) -> Result<()> {
        let spec = self
            .command(self.timeouts.bulk_remove())
            .args(["rmp", "--force", "--all"]);
        self.run_idempotent(&spec)?;
        tracing::info!("all pod sandboxes removed");
        Ok(())
    }

    fn pull_image(&self, reference: &str) -> Result<()> {
        let spec = self.command(self.timeouts.pull()).arg("pull").arg(reference);
        let _ = self.runner.run_checked(&spec)?;
        tracing::info!(image = reference, "image pulled");
        Ok(())
    }

    fn remove_image(&self, reference: &str) -> Result<()> {
        let spec = self.command(self.timeouts.call()).arg("rmi").arg(reference);
        self.run_idempotent(&spec)?;
        tracing::info!(image = reference, "image removed from runtime store");
        Ok(())
    }
}
