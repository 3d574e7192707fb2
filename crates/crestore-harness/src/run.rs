//! One harness invocation: capability gate, then each selected scenario in
//! order, then a single verdict.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crestore_common::config::HarnessConfig;
use crestore_common::error::Result;
use crestore_runtime::exec::CommandRunner;
use crestore_runtime::probe::CapabilityProbe;

use crate::context::RunContext;
use crate::reporter::{self, OutcomeReporter, Verdict};
use crate::sequencer::{Collaborators, Sequencer};
use crate::signal::AbortFlag;

/// Decides whether the host can run checkpoint/restore scenarios at all.
pub trait Preflight {
    /// Returns `Ok` if the scenarios may start.
    ///
    /// # Errors
    ///
    /// Returns `CrestoreError::Unsupported` when the host lacks a required
    /// capability. Any other error also stops the run.
    fn check(&self) -> Result<()>;
}

impl<F> Preflight for F
where
    F: Fn() -> Result<()>,
{
    fn check(&self) -> Result<()> {
        self()
    }
}

/// Preflight backed by [`CapabilityProbe`].
pub struct ProbeGate {
    probe: CapabilityProbe,
    runner: Arc<dyn CommandRunner>,
}

impl ProbeGate {
    /// Creates a gate that runs `probe` through `runner`.
    #[must_use]
    pub fn new(probe: CapabilityProbe, runner: Arc<dyn CommandRunner>) -> Self {
        Self { probe, runner }
    }
}

impl Preflight for ProbeGate {
    fn check(&self) -> Result<()> {
        self.probe.check(self.runner.as_ref())
    }
}

/// Runs the selected scenarios and reports one verdict.
pub struct Harness<'a> {
    config: &'a HarnessConfig,
    parts: Collaborators<'a>,
    abort: AbortFlag,
    run_parent: Option<PathBuf>,
}

impl<'a> Harness<'a> {
    /// Creates a harness over the given collaborators.
    #[must_use]
    pub fn new(config: &'a HarnessConfig, parts: Collaborators<'a>, abort: AbortFlag) -> Self {
        Self {
            config,
            parts,
            abort,
            run_parent: None,
        }
    }

    /// Places the run directory under `parent` instead of the system temp
    /// location.
    #[must_use]
    pub fn with_run_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.run_parent = Some(parent.into());
        self
    }

    /// Runs preflight and every selected scenario.
    ///
    /// The step summary goes to `summary`; exactly one `PASS`/`FAIL` line
    /// goes to `verdict`. Nothing is created if preflight fails.
    pub fn run(
        &self,
        preflight: &dyn Preflight,
        summary: &mut dyn Write,
        verdict: &mut dyn Write,
    ) -> Verdict {
        if let Err(e) = preflight.check() {
            if e.is_environment() {
                return reporter::report_unsupported(&e.to_string(), verdict);
            }
            tracing::error!(error = %e, "preflight failed");
            return write_fail(verdict);
        }

        let context = match &self.run_parent {
            Some(parent) => RunContext::create_in(parent, self.config.keep_artifacts),
            None => RunContext::create(self.config.keep_artifacts),
        };
        let mut context = match context {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(error = %e, "cannot create run directory");
                return write_fail(verdict);
            }
        };
        for helper in &self.config.helper_files {
            context.register_helper(helper.clone());
        }

        let span = tracing::info_span!("run", run_id = %context.run_id());
        let _guard = span.enter();
        let mut reporter = OutcomeReporter::new(context);

        match Sequencer::new(self.config, self.parts, self.abort.clone()) {
            Ok(sequencer) => {
                for &variant in &self.config.variants {
                    match reporter.context().scenario_dir(variant) {
                        Ok(dir) => reporter.record(sequencer.run(variant, &dir)),
                        Err(e) => {
                            reporter.mark_incomplete(format!("{variant}: {e}"));
                            break;
                        }
                    }
                }
            }
            Err(e) => reporter.mark_incomplete(e.to_string()),
        }

        reporter.finish(summary, verdict)
    }
}

fn write_fail(verdict: &mut dyn Write) -> Verdict {
    if let Err(e) = writeln!(verdict, "{}", Verdict::Fail) {
        tracing::warn!(error = %e, "failed to write verdict");
    }
    Verdict::Fail
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crestore_common::error::CrestoreError;
    use crestore_common::types::RestoreVariant;
    use crestore_image::memory::MemoryImageBridge;
    use crestore_runtime::backend::memory::MemoryRuntime;

    use super::*;

    fn templates(dir: &std::path::Path) -> HarnessConfig {
        let pod = dir.join("pod.json");
        std::fs::write(&pod, r#"{ "log_directory": "", "linux": { "cgroup_parent": "" } }"#)
            .expect("pod");
        let ctr = dir.join("ctr.json");
        std::fs::write(&ctr, r#"{ "metadata": { "name": "counter" }, "image": { "image": "" } }"#)
            .expect("ctr");
        HarnessConfig {
            pod_template: pod,
            container_template: ctr,
            log_settle_ms: 0,
            ..HarnessConfig::default()
        }
    }

    fn ok() -> Result<()> {
        Ok(())
    }

    #[test]
    fn unsupported_environment_creates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = templates(dir.path());
        let runtime = Arc::new(MemoryRuntime::new());
        let bridge = MemoryImageBridge::new(Arc::clone(&runtime), config.checkpoint_image.clone());
        let parts = Collaborators {
            plane: runtime.as_ref(),
            converter: &bridge,
            store: &bridge,
        };
        let runs = dir.path().join("runs");
        std::fs::create_dir(&runs).expect("runs");

        let unsupported = || -> Result<()> {
            Err(CrestoreError::Unsupported {
                message: "criu check failed".into(),
            })
        };
        let mut out = Vec::new();
        let verdict = Harness::new(&config, parts, AbortFlag::new())
            .with_run_parent(&runs)
            .run(&unsupported, &mut std::io::sink(), &mut out);

        assert_eq!(verdict, Verdict::Unsupported);
        assert_eq!(out, b"FAIL\n");
        assert!(runtime.calls().is_empty());
        assert_eq!(std::fs::read_dir(&runs).expect("read").count(), 0);
    }

    #[test]
    fn both_variants_pass_and_run_directory_is_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = templates(dir.path());
        let runtime = Arc::new(MemoryRuntime::new());
        let bridge = MemoryImageBridge::new(Arc::clone(&runtime), config.checkpoint_image.clone());
        let parts = Collaborators {
            plane: runtime.as_ref(),
            converter: &bridge,
            store: &bridge,
        };
        let runs = dir.path().join("runs");
        std::fs::create_dir(&runs).expect("runs");

        let mut summary = Vec::new();
        let mut out = Vec::new();
        let verdict = Harness::new(&config, parts, AbortFlag::new())
            .with_run_parent(&runs)
            .run(&ok, &mut summary, &mut out);

        assert_eq!(verdict, Verdict::Pass, "{}", String::from_utf8_lossy(&summary));
        assert_eq!(out, b"PASS\n");
        assert_eq!(std::fs::read_dir(&runs).expect("read").count(), 0);
    }

    #[test]
    fn missing_template_fails_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HarnessConfig {
            pod_template: dir.path().join("absent.json"),
            variants: vec![RestoreVariant::Direct],
            ..templates(dir.path())
        };
        let runtime = MemoryRuntime::new();
        let bridge = MemoryImageBridge::new(Arc::new(MemoryRuntime::new()), "x:latest");
        let parts = Collaborators {
            plane: &runtime,
            converter: &bridge,
            store: &bridge,
        };

        let mut out = Vec::new();
        let verdict = Harness::new(&config, parts, AbortFlag::new())
            .with_run_parent(dir.path())
            .run(&ok, &mut std::io::sink(), &mut out);
        assert_eq!(verdict, Verdict::Fail);
        assert_eq!(out, b"FAIL\n");
    }
}
