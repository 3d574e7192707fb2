//! Harness configuration model.
//!
//! Defaults come from [`crate::constants`]. A JSON or YAML file may replace
//! any subset of fields; the CLI applies its own overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CrestoreError, Result};
use crate::types::{ImageStoreKind, RestoreVariant};

/// Root configuration for a harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// CRI endpoint of the runtime under test.
    pub runtime_endpoint: String,
    /// External binaries the harness drives.
    pub binaries: Binaries,
    /// Pod sandbox request template.
    pub pod_template: PathBuf,
    /// Container request template.
    pub container_template: PathBuf,
    /// Image the checkpointed container runs.
    pub test_image: String,
    /// Store-local reference for the image built from the archive.
    pub checkpoint_image: String,
    /// Cgroup parent used by the image-mediated restore pod.
    pub restore_cgroup_parent: String,
    /// Tool the checkpoint image is imported with.
    pub image_store: ImageStoreKind,
    /// containerd namespace used by the `ctr` store.
    pub containerd_namespace: String,
    /// Per-call deadlines.
    pub timeouts: Timeouts,
    /// Delay before sampling logs, in milliseconds.
    pub log_settle_ms: u64,
    /// Attempts for the pre-scenario reset and image pull.
    pub precondition_attempts: u32,
    /// Variants to run, in order.
    pub variants: Vec<RestoreVariant>,
    /// Keep the run directory after the run.
    pub keep_artifacts: bool,
    /// Additional files removed during cleanup (helper binaries, etc).
    pub helper_files: Vec<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            runtime_endpoint: constants::DEFAULT_RUNTIME_ENDPOINT.into(),
            binaries: Binaries::default(),
            pod_template: PathBuf::from("fixtures/sandbox_config.json"),
            container_template: PathBuf::from("fixtures/container_config.json"),
            test_image: constants::DEFAULT_TEST_IMAGE.into(),
            checkpoint_image: constants::DEFAULT_CHECKPOINT_IMAGE.into(),
            restore_cgroup_parent: constants::DEFAULT_RESTORE_CGROUP_PARENT.into(),
            image_store: ImageStoreKind::default(),
            containerd_namespace: constants::DEFAULT_CONTAINERD_NAMESPACE.into(),
            timeouts: Timeouts::default(),
            log_settle_ms: constants::LOG_SETTLE_MS,
            precondition_attempts: 1,
            variants: RestoreVariant::ALL.to_vec(),
            keep_artifacts: false,
            helper_files: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Loads a configuration file, choosing the format from its extension.
    ///
    /// `.yaml` and `.yml` are parsed as YAML, everything else as JSON.
    /// Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CrestoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content).map_err(|e| CrestoreError::Config {
                message: format!("{}: {e}", path.display()),
            })?
        } else {
            serde_json::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `CrestoreError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.runtime_endpoint.trim().is_empty() {
            return Err(config_error("runtime_endpoint must not be empty"));
        }
        if self.precondition_attempts == 0 {
            return Err(config_error("precondition_attempts must be at least 1"));
        }
        if self.variants.is_empty() {
            return Err(config_error("at least one variant must be selected"));
        }
        if !self.checkpoint_image.contains(':') {
            return Err(config_error("checkpoint_image must be a name:tag reference"));
        }
        if self.image_store == ImageStoreKind::Ctr && self.containerd_namespace.trim().is_empty() {
            return Err(config_error("containerd_namespace must not be empty for the ctr store"));
        }
        Ok(())
    }

    /// Returns the log settle delay.
    #[must_use]
    pub const fn log_settle(&self) -> Duration {
        Duration::from_millis(self.log_settle_ms)
    }
}

/// Paths or names of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Binaries {
    /// Control-plane CLI.
    pub crictl: String,
    /// Capability probe.
    pub probe: String,
    /// Arguments to the capability probe.
    pub probe_args: Vec<String>,
    /// Image builder.
    pub builder: String,
    /// `podman` binary for the podman store.
    pub store: String,
    /// `ctr` binary for the containerd store.
    pub ctr: String,
}

impl Binaries {
    /// Returns the binary backing the given image store.
    #[must_use]
    pub fn store_binary(&self, kind: ImageStoreKind) -> &str {
        match kind {
            ImageStoreKind::Podman => &self.store,
            ImageStoreKind::Ctr => &self.ctr,
        }
    }
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            crictl: constants::DEFAULT_CRICTL_BIN.into(),
            probe: constants::DEFAULT_PROBE_BIN.into(),
            probe_args: constants::DEFAULT_PROBE_ARGS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            builder: constants::DEFAULT_BUILDER_BIN.into(),
            store: constants::DEFAULT_STORE_BIN.into(),
            ctr: constants::DEFAULT_CTR_BIN.into(),
        }
    }
}

/// Per-call-class deadlines, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Bulk pod removal.
    pub bulk_remove_secs: u64,
    /// Ordinary control-plane calls.
    pub call_secs: u64,
    /// Container creation.
    pub create_secs: u64,
    /// Image pull.
    pub pull_secs: u64,
    /// Checkpoint export.
    pub checkpoint_secs: u64,
    /// Image builder and image store calls.
    pub image_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            bulk_remove_secs: constants::BULK_REMOVE_TIMEOUT_SECS,
            call_secs: constants::DEFAULT_CALL_TIMEOUT_SECS,
            create_secs: constants::CREATE_TIMEOUT_SECS,
            pull_secs: constants::PULL_TIMEOUT_SECS,
            checkpoint_secs: constants::CHECKPOINT_TIMEOUT_SECS,
            image_secs: constants::IMAGE_TIMEOUT_SECS,
        }
    }
}

impl Timeouts {
    /// Bulk pod removal deadline.
    #[must_use]
    pub const fn bulk_remove(&self) -> Duration {
        Duration::from_secs(self.bulk_remove_secs)
    }

    /// Ordinary call deadline.
    #[must_use]
    pub const fn call(&self) -> Duration {
        Duration::from_secs(self.call_secs)
    }

    /// Container creation deadline.
    #[must_use]
    pub const fn create(&self) -> Duration {
        Duration::from_secs(self.create_secs)
    }

    /// Image pull deadline.
    #[must_use]
    pub const fn pull(&self) -> Duration {
        Duration::from_secs(self.pull_secs)
    }

    /// Checkpoint export deadline.
    #[must_use]
    pub const fn checkpoint(&self) -> Duration {
        Duration::from_secs(self.checkpoint_secs)
    }

    /// Image builder and store deadline.
    #[must_use]
    pub const fn image(&self) -> Duration {
        Duration::from_secs(self.image_secs)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

fn config_error(message: &str) -> CrestoreError {
    CrestoreError::Config {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HarnessConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.variants, vec![RestoreVariant::Direct, RestoreVariant::Image]);
        assert_eq!(config.timeouts.bulk_remove(), Duration::from_secs(5));
        assert_eq!(config.timeouts.create(), Duration::from_secs(20));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crestore.json");
        std::fs::write(
            &path,
            r#"{ "runtime_endpoint": "unix:///run/containerd/containerd.sock",
                 "timeouts": { "checkpoint_secs": 90 } }"#,
        )
        .expect("write");

        let config = HarnessConfig::load(&path).expect("load");
        assert_eq!(config.runtime_endpoint, "unix:///run/containerd/containerd.sock");
        assert_eq!(config.timeouts.checkpoint_secs, 90);
        assert_eq!(config.timeouts.call_secs, constants::DEFAULT_CALL_TIMEOUT_SECS);
        assert_eq!(config.image_store, ImageStoreKind::Podman);
        assert_eq!(config.binaries.crictl, "crictl");
    }

    #[test]
    fn yaml_config_selects_variant() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crestore.yaml");
        std::fs::write(&path, "variants: [image]\nprecondition_attempts: 3\n").expect("write");

        let config = HarnessConfig::load(&path).expect("load");
        assert_eq!(config.variants, vec![RestoreVariant::Image]);
        assert_eq!(config.precondition_attempts, 3);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = HarnessConfig {
            precondition_attempts: 0,
            ..HarnessConfig::default()
        };
        assert!(matches!(config.validate(), Err(CrestoreError::Config { .. })));
    }

    #[test]
    fn yaml_config_selects_ctr_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crestore.yaml");
        std::fs::write(&path, "image_store: ctr
binaries:
  ctr: /usr/local/bin/ctr
")
            .expect("write");

        let config = HarnessConfig::load(&path).expect("load");
        assert_eq!(config.image_store, ImageStoreKind::Ctr);
        assert_eq!(config.containerd_namespace, "k8s.io");
        assert_eq!(config.binaries.store_binary(config.image_store), "/usr/local/bin/ctr");
        assert_eq!(config.binaries.store, "podman");
    }

    #[test]
    fn ctr_store_needs_a_namespace() {
        let config = HarnessConfig {
            image_store: ImageStoreKind::Ctr,
            containerd_namespace: " ".into(),
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn untagged_checkpoint_image_is_rejected() {
        let config = HarnessConfig {
            checkpoint_image: "localhost/cp".into(),
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
