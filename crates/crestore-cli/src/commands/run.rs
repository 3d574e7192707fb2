//! `crestore run`: run the checkpoint/restore scenarios.

use std::io::Write;
use std::sync::Arc;

use clap::Args;
use crestore_harness::reporter::Verdict;
use crestore_harness::run::{Harness, ProbeGate};
use crestore_harness::sequencer::Collaborators;
use crestore_harness::signal;

use super::ConfigOverrides;
use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration sources.
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Skip the effective-uid check (the probe still runs).
    #[arg(long)]
    pub skip_root_check: bool,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the signal handler
/// cannot be installed. Scenario failures are reported through the verdict.
pub fn execute(args: &RunArgs) -> anyhow::Result<u8> {
    let config = args.overrides.resolve()?;
    let abort = signal::install_handler()?;
    let tools = output::Toolset::from_config(&config);

    let parts = Collaborators {
        plane: &tools.plane,
        converter: &tools.converter,
        store: tools.store.as_ref(),
    };
    let gate = ProbeGate::new(
        output::probe_for(&config, args.skip_root_check),
        Arc::clone(&tools.runner),
    );

    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{}", output::header(&config));
    let verdict: Verdict = Harness::new(&config, parts, abort).run(
        &gate,
        &mut stderr,
        &mut std::io::stdout().lock(),
    );
    Ok(output::exit_status(verdict))
}
