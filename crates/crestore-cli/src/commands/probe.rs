//! `crestore probe`: check host support without creating anything.

use std::io::Write;

use clap::Args;
use crestore_harness::reporter::Verdict;
use crestore_runtime::exec::SystemRunner;

use super::ConfigOverrides;
use crate::output;

/// Arguments for the `probe` command.
#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Configuration sources.
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Skip the effective-uid check.
    #[arg(long)]
    pub skip_root_check: bool,
}

/// Executes the `probe` command.
///
/// Prints `supported` or `unsupported: <reason>` on stdout.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn execute(args: &ProbeArgs) -> anyhow::Result<u8> {
    let config = args.overrides.resolve()?;
    let probe = output::probe_for(&config, args.skip_root_check);
    let mut stdout = std::io::stdout().lock();
    match probe.check(&SystemRunner) {
        Ok(()) => {
            writeln!(stdout, "supported")?;
            Ok(output::exit_status(Verdict::Pass))
        }
        Err(e) => {
            writeln!(stdout, "unsupported: {e}")?;
            Ok(output::exit_status(Verdict::Unsupported))
        }
    }
}
