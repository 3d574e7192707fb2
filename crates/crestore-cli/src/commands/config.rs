//! `crestore config`: print the effective configuration.

use std::io::Write;

use clap::Args;

use super::ConfigOverrides;

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration sources.
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

/// Executes the `config` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or cannot be rendered.
pub fn execute(args: &ConfigArgs) -> anyhow::Result<u8> {
    let config = args.overrides.resolve()?;
    let rendered = serde_yaml::to_string(&config)?;
    write!(std::io::stdout().lock(), "{rendered}")?;
    Ok(0)
}
