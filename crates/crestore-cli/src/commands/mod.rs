//! CLI command definitions and dispatch.

pub mod config;
pub mod probe;
pub mod run;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use crestore_common::config::HarnessConfig;
use crestore_common::constants::BIN_NAME;
use crestore_common::types::{ImageStoreKind, RestoreVariant};

/// crestore: container checkpoint/restore conformance harness.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log output format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "CRESTORE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the checkpoint/restore scenarios and print PASS or FAIL.
    Run(run::RunArgs),
    /// Check whether this host can checkpoint and restore containers.
    Probe(probe::ProbeArgs),
    /// Print the effective configuration as YAML.
    Config(config::ConfigArgs),
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Which restore paths to exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VariantArg {
    /// Restore directly from the checkpoint archive.
    Direct,
    /// Restore from an image built from the archive.
    Image,
    /// Both, direct first.
    All,
}

impl VariantArg {
    fn variants(self) -> Vec<RestoreVariant> {
        match self {
            Self::Direct => vec![RestoreVariant::Direct],
            Self::Image => vec![RestoreVariant::Image],
            Self::All => RestoreVariant::ALL.to_vec(),
        }
    }
}

/// Tool that imports the checkpoint image into the runtime's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    /// `podman`, for CRI-O.
    Podman,
    /// `ctr`, for containerd.
    Ctr,
}

impl From<StoreArg> for ImageStoreKind {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Podman => Self::Podman,
            StoreArg::Ctr => Self::Ctr,
        }
    }
}

/// Configuration sources shared by every subcommand.
///
/// Precedence, lowest first: built-in defaults, `--config` file, flags and
/// their environment variables.
#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    /// JSON or YAML configuration file.
    #[arg(long, env = "CRESTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// CRI endpoint of the runtime under test.
    #[arg(long, env = "CRESTORE_RUNTIME_ENDPOINT")]
    pub runtime_endpoint: Option<String>,

    /// Pod sandbox request template.
    #[arg(long, env = "CRESTORE_POD_TEMPLATE")]
    pub pod_template: Option<PathBuf>,

    /// Container request template.
    #[arg(long, env = "CRESTORE_CONTAINER_TEMPLATE")]
    pub container_template: Option<PathBuf>,

    /// Image the checkpointed container runs.
    #[arg(long, env = "CRESTORE_TEST_IMAGE")]
    pub test_image: Option<String>,

    /// Reference the checkpoint image is committed under.
    #[arg(long, env = "CRESTORE_CHECKPOINT_IMAGE")]
    pub checkpoint_image: Option<String>,

    /// Cgroup parent of the image-mediated restore pod.
    #[arg(long)]
    pub restore_cgroup_parent: Option<String>,

    /// Restore paths to exercise.
    #[arg(long, value_enum)]
    pub variant: Option<VariantArg>,

    /// Image store the checkpoint image is imported into.
    #[arg(long, value_enum, env = "CRESTORE_IMAGE_STORE")]
    pub image_store: Option<StoreArg>,

    /// Keep the run directory after the run.
    #[arg(long)]
    pub keep_artifacts: bool,

    /// Attempts for the pre-scenario reset and image pull.
    #[arg(long)]
    pub precondition_attempts: Option<u32>,

    /// Delay before sampling container logs, in milliseconds.
    #[arg(long)]
    pub log_settle_ms: Option<u64>,

    /// Checkpoint export deadline, in seconds.
    #[arg(long)]
    pub checkpoint_timeout: Option<u64>,

    /// Path or name of the control-plane CLI.
    #[arg(long, env = "CRESTORE_CRICTL")]
    pub crictl: Option<String>,
}

impl ConfigOverrides {
    /// Builds the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded or the
    /// result is invalid.
    pub fn resolve(&self) -> anyhow::Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => HarnessConfig::default(),
        };
        self.apply(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(v) = &self.runtime_endpoint {
            config.runtime_endpoint.clone_from(v);
        }
        if let Some(v) = &self.pod_template {
            config.pod_template.clone_from(v);
        }
        if let Some(v) = &self.container_template {
            config.container_template.clone_from(v);
        }
        if let Some(v) = &self.test_image {
            config.test_image.clone_from(v);
        }
        if let Some(v) = &self.checkpoint_image {
            config.checkpoint_image.clone_from(v);
        }
        if let Some(v) = &self.restore_cgroup_parent {
            config.restore_cgroup_parent.clone_from(v);
        }
        if let Some(v) = self.variant {
            config.variants = v.variants();
        }
        if let Some(v) = self.image_store {
            config.image_store = v.into();
        }
        if self.keep_artifacts {
            config.keep_artifacts = true;
        }
        if let Some(v) = self.precondition_attempts {
            config.precondition_attempts = v;
        }
        if let Some(v) = self.log_settle_ms {
            config.log_settle_ms = v;
        }
        if let Some(v) = self.checkpoint_timeout {
            config.timeouts.checkpoint_secs = v;
        }
        if let Some(v) = &self.crictl {
            config.binaries.crictl.clone_from(v);
        }
    }
}

/// Dispatches the parsed CLI command and returns the process exit status.
///
/// # Errors
///
/// Returns an error if the command cannot start.
pub fn execute(cli: Cli) -> anyhow::Result<u8> {
    match cli.command {
        Command::Run(args) => run::execute(&args),
        Command::Probe(args) => probe::execute(&args),
        Command::Config(args) => config::execute(&args),
    }
}
