//! Host capability gate.
//!
//! Checkpoint/restore needs root, the tool binaries, and a host the
//! checkpoint engine accepts. All three are checked before the first
//! resource is created; any failure is reported as
//! [`CrestoreError::Unsupported`] so it is never confused with a scenario
//! failure.

use std::time::Duration;

use crestore_common::config::Binaries;
use crestore_common::error::{CrestoreError, Result};
use crestore_common::types::ImageStoreKind;

use crate::exec::{CommandRunner, CommandSpec};

/// Deadline for the capability probe itself.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Preflight checks run before any scenario.
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    binaries: Binaries,
    require_root: bool,
    require_image_tools: bool,
    image_store: ImageStoreKind,
}

impl CapabilityProbe {
    /// Creates a probe for the given tool set.
    #[must_use]
    pub fn new(binaries: Binaries) -> Self {
        Self {
            binaries,
            require_root: true,
            require_image_tools: true,
            image_store: ImageStoreKind::default(),
        }
    }

    /// Skips the effective-uid check.
    #[must_use]
    pub const fn without_root_check(mut self) -> Self {
        self.require_root = false;
        self
    }

    /// Sets whether the image builder and store binaries are required.
    #[must_use]
    pub const fn require_image_tools(mut self, required: bool) -> Self {
        self.require_image_tools = required;
        self
    }

    /// Selects which store binary counts as an image tool.
    #[must_use]
    pub const fn image_store(mut self, kind: ImageStoreKind) -> Self {
        self.image_store = kind;
        self
    }

    /// Runs every preflight check.
    ///
    /// # Errors
    ///
    /// Returns `CrestoreError::Unsupported` naming the first check that
    /// failed.
    pub fn check(&self, runner: &dyn CommandRunner) -> Result<()> {
        if self.require_root {
            check_root()?;
        }
        for binary in self.required_binaries() {
            locate(binary)?;
        }
        self.run_probe(runner)
    }

    fn required_binaries(&self) -> Vec<&str> {
        let mut bins = vec![self.binaries.crictl.as_str(), self.binaries.probe.as_str()];
        if self.require_image_tools {
            bins.push(self.binaries.builder.as_str());
            bins.push(self.binaries.store_binary(self.image_store));
        }
        bins
    }

    fn run_probe(&self, runner: &dyn CommandRunner) -> Result<()> {
        let spec = CommandSpec::new(&self.binaries.probe, PROBE_TIMEOUT)
            .args(self.binaries.probe_args.iter().cloned());
        tracing::info!(probe = %spec, "probing checkpoint/restore support");

        match runner.run(&spec) {
            Ok(out) if out.success() => {
                tracing::info!("checkpoint/restore supported");
                Ok(())
            }
            Ok(out) => Err(CrestoreError::Unsupported {
                message: format!(
                    "`{spec}` exited with status {}: {}",
                    out.exit_code,
                    out.stderr.trim()
                ),
            }),
            Err(e) => Err(CrestoreError::Unsupported {
                message: format!("`{spec}` could not run: {e}"),
            }),
        }
    }
}

fn locate(binary: &str) -> Result<()> {
    which::which(binary)
        .map(|path| tracing::debug!(binary, path = %path.display(), "found binary"))
        .map_err(|_| CrestoreError::Unsupported {
            message: format!("required binary `{binary}` not found in PATH"),
        })
}

#[cfg(unix)]
fn check_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(CrestoreError::Unsupported {
            message: "checkpoint/restore requires root".into(),
        })
    }
}

#[cfg(not(unix))]
fn check_root() -> Result<()> {
    Err(CrestoreError::Unsupported {
        message: "checkpoint/restore requires a Linux host".into(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::SystemRunner;

    fn binaries(probe: &str, probe_args: &[&str]) -> Binaries {
        Binaries {
            crictl: "sh".into(),
            probe: probe.into(),
            probe_args: probe_args.iter().map(|s| (*s).to_string()).collect(),
            builder: "sh".into(),
            store: "sh".into(),
            ctr: "sh".into(),
        }
    }

    #[test]
    fn passing_probe_is_supported() {
        let probe = CapabilityProbe::new(binaries("true", &[])).without_root_check();
        probe.check(&SystemRunner).expect("supported");
    }

    #[test]
    fn failing_probe_is_environment_error() {
        let probe = CapabilityProbe::new(binaries("sh", &["-c", "echo no criu >&2; exit 1"]))
            .without_root_check();
        let err = probe.check(&SystemRunner).expect_err("unsupported");
        assert!(err.is_environment());
        assert!(err.to_string().contains("no criu"));
    }

    #[test]
    fn missing_binary_is_environment_error() {
        let mut bins = binaries("true", &[]);
        bins.builder = "crestore-no-such-builder".into();
        let probe = CapabilityProbe::new(bins).without_root_check();
        let err = probe.check(&SystemRunner).expect_err("unsupported");
        assert!(err.is_environment());
        assert!(err.to_string().contains("crestore-no-such-builder"));
    }

    #[test]
    fn image_tools_are_optional_for_direct_only_runs() {
        let mut bins = binaries("true", &[]);
        bins.builder = "crestore-no-such-builder".into();
        bins.store = "crestore-no-such-store".into();
        let probe = CapabilityProbe::new(bins)
            .without_root_check()
            .require_image_tools(false);
        probe.check(&SystemRunner).expect("supported");
    }

    #[test]
    fn ctr_store_requires_ctr_not_podman() {
        let mut bins = binaries("true", &[]);
        bins.store = "crestore-no-such-podman".into();
        bins.ctr = "crestore-no-such-ctr".into();

        let err = CapabilityProbe::new(bins.clone())
            .without_root_check()
            .image_store(ImageStoreKind::Ctr)
            .check(&SystemRunner)
            .expect_err("ctr missing");
        assert!(err.to_string().contains("crestore-no-such-ctr"));

        bins.ctr = "sh".into();
        CapabilityProbe::new(bins)
            .without_root_check()
            .image_store(ImageStoreKind::Ctr)
            .check(&SystemRunner)
            .expect("podman not needed");
    }
}
