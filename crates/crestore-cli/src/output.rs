//! Wiring and presentation helpers shared by the subcommands.

use std::sync::Arc;

use crestore_common::config::HarnessConfig;
use crestore_common::types::{ImageStoreKind, RestoreVariant};
use crestore_harness::reporter::Verdict;
use crestore_image::converter::BuildahConverter;
use crestore_image::store::{CtrStore, ImageStore, PodmanStore};
use crestore_runtime::backend::crictl::CrictlClient;
use crestore_runtime::exec::{CommandRunner, SystemRunner};
use crestore_runtime::probe::CapabilityProbe;

/// The production collaborators, all sharing one command runner.
pub struct Toolset {
    /// Runner used by every external tool.
    pub runner: Arc<dyn CommandRunner>,
    /// `crictl` control plane.
    pub plane: CrictlClient,
    /// `buildah` converter.
    pub converter: BuildahConverter,
    /// Store bridge selected by `image_store`.
    pub store: Box<dyn ImageStore>,
}

impl Toolset {
    /// Builds the collaborators named by `config`.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Self {
            plane: CrictlClient::new(
                &config.binaries.crictl,
                &config.runtime_endpoint,
                config.timeouts,
                Arc::clone(&runner),
            ),
            converter: BuildahConverter::new(
                &config.binaries.builder,
                &config.checkpoint_image,
                config.timeouts.image(),
                Arc::clone(&runner),
            ),
            store: store_for(config, Arc::clone(&runner)),
            runner,
        }
    }
}

fn store_for(config: &HarnessConfig, runner: Arc<dyn CommandRunner>) -> Box<dyn ImageStore> {
    let binary = config.binaries.store_binary(config.image_store);
    match config.image_store {
        ImageStoreKind::Podman => Box::new(PodmanStore::new(binary, config.timeouts.image(), runner)),
        ImageStoreKind::Ctr => Box::new(CtrStore::new(
            binary,
            &config.containerd_namespace,
            config.timeouts.image(),
            runner,
        )),
    }
}

/// Builds the capability probe for the selected variants.
#[must_use]
pub fn probe_for(config: &HarnessConfig, skip_root_check: bool) -> CapabilityProbe {
    let probe = CapabilityProbe::new(config.binaries.clone())
        .require_image_tools(config.variants.contains(&RestoreVariant::Image))
        .image_store(config.image_store);
    if skip_root_check {
        probe.without_root_check()
    } else {
        probe
    }
}

/// One-line description of what is about to run.
#[must_use]
pub fn header(config: &HarnessConfig) -> String {
    let variants: Vec<String> = config.variants.iter().map(ToString::to_string).collect();
    format!(
        "crestore v{} against {} [{}] store {}",
        env!("CARGO_PKG_VERSION"),
        config.runtime_endpoint,
        variants.join(", "),
        config.image_store
    )
}

/// Maps a verdict to the process exit status.
#[must_use]
pub fn exit_status(verdict: Verdict) -> u8 {
    u8::try_from(verdict.exit_code()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_distinguishes_unsupported() {
        assert_eq!(exit_status(Verdict::Pass), 0);
        assert_eq!(exit_status(Verdict::Fail), 1);
        assert_eq!(exit_status(Verdict::Unsupported), 2);
    }

    #[test]
    fn header_lists_selected_variants() {
        let config = HarnessConfig {
            variants: vec![RestoreVariant::Image],
            ..HarnessConfig::default()
        };
        let line = header(&config);
        assert!(line.contains("image-mediated"));
        assert!(!line.contains("direct-archive"));
        assert!(line.ends_with("store podman"));
    }

    #[cfg(unix)]
    #[test]
    fn ctr_store_preflight_requires_ctr() {
        let mut config = HarnessConfig {
            image_store: ImageStoreKind::Ctr,
            variants: vec![RestoreVariant::Image],
            ..HarnessConfig::default()
        };
        config.binaries.ctr = "crestore-no-such-ctr".into();
        config.binaries.crictl = "sh".into();
        config.binaries.probe = "true".into();
        config.binaries.probe_args.clear();
        config.binaries.builder = "sh".into();

        let err = probe_for(&config, true)
            .check(&SystemRunner)
            .expect_err("ctr missing");
        assert!(err.to_string().contains("crestore-no-such-ctr"));
    }
}
