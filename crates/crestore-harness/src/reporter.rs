//! Run verdict and final cleanup.

use std::fmt;
use std::io::Write;

use crate::context::RunContext;
use crate::sequencer::ScenarioOutcome;

/// Final answer of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every selected scenario passed.
    Pass,
    /// A scenario failed or was interrupted.
    Fail,
    /// The environment cannot checkpoint; no scenario ran.
    Unsupported,
}

impl Verdict {
    /// Process exit status for this verdict.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
            Self::Unsupported => 2,
        }
    }

    /// The single token printed on stdout.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail | Self::Unsupported => "FAIL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Collects scenario outcomes and turns them into one verdict.
///
/// The reporter owns the [`RunContext`]; finishing it releases the run
/// directory whatever the verdict.
#[derive(Debug)]
pub struct OutcomeReporter {
    context: RunContext,
    outcomes: Vec<ScenarioOutcome>,
    incomplete: Option<String>,
}

impl OutcomeReporter {
    /// Creates a reporter for the given run.
    #[must_use]
    pub fn new(context: RunContext) -> Self {
        Self {
            context,
            outcomes: Vec::new(),
            incomplete: None,
        }
    }

    /// Returns the run context.
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.context
    }

    /// Records one finished scenario.
    pub fn record(&mut self, outcome: ScenarioOutcome) {
        if outcome.passed() {
            tracing::info!(variant = %outcome.variant, "scenario passed");
        } else {
            tracing::error!(
                variant = %outcome.variant,
                phase = %outcome.final_phase,
                failure = ?outcome.failure.as_ref().map(ToString::to_string),
                "scenario failed"
            );
        }
        self.outcomes.push(outcome);
    }

    /// Records that a selected scenario could not be run at all.
    pub fn mark_incomplete(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(%reason, "run incomplete");
        self.incomplete = Some(reason);
    }

    /// Writes the step summary and the verdict token, then releases the run.
    ///
    /// The success flag is set only when every selected scenario ran and
    /// passed. Cleanup problems are logged; they never change the verdict.
    pub fn finish(mut self, summary: &mut dyn Write, verdict: &mut dyn Write) -> Verdict {
        if self.incomplete.is_none()
            && !self.outcomes.is_empty()
            && self.outcomes.iter().all(ScenarioOutcome::passed)
        {
            self.context.mark_success();
        }
        if let Err(e) = self.write_summary(summary) {
            tracing::warn!(error = %e, "failed to write summary");
        }

        let result = if self.context.succeeded() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        for problem in self.context.release() {
            tracing::warn!(%problem, "run cleanup problem");
        }
        if let Err(e) = writeln!(verdict, "{result}") {
            tracing::warn!(error = %e, "failed to write verdict");
        }
        tracing::info!(run_id = %self.context.run_id(), verdict = %result, "run finished");
        result
    }

    fn write_summary(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "run {} started {}",
            self.context.run_id(),
            self.context.started_at().format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        for outcome in &self.outcomes {
            let status = if outcome.passed() { "passed" } else { "FAILED" };
            writeln!(out, "\n{} scenario {status}", outcome.variant)?;
            for step in &outcome.steps {
                writeln!(out, "  {step}")?;
            }
            for check in &outcome.checks {
                writeln!(out, "  {check}")?;
            }
            for problem in &outcome.cleanup_problems {
                writeln!(out, "  cleanup: {problem}")?;
            }
        }
        if let Some(reason) = &self.incomplete {
            writeln!(out, "\nrun incomplete: {reason}")?;
        }
        Ok(())
    }
}

/// Writes the verdict for a run that never started.
pub fn report_unsupported(reason: &str, verdict: &mut dyn Write) -> Verdict {
    tracing::error!(%reason, "environment cannot run checkpoint/restore scenarios");
    if let Err(e) = writeln!(verdict, "{}", Verdict::Unsupported) {
        tracing::warn!(error = %e, "failed to write verdict");
    }
    Verdict::Unsupported
}

#[cfg(test)]
mod tests {
    use crestore_common::types::RestoreVariant;

    use super::*;
    use crate::checker::{Check, CheckResult, Observation};
    use crate::sequencer::{Failure, Phase};

    fn outcome(variant: RestoreVariant, passed: bool) -> ScenarioOutcome {
        let observation = Observation::LineCount {
            baseline: 1,
            observed: if passed { 2 } else { 1 },
        };
        ScenarioOutcome {
            variant,
            final_phase: if passed { Phase::Done } else { Phase::Failed },
            steps: Vec::new(),
            checks: vec![CheckResult {
                check: Check::LogMonotonicity,
                observation,
            }],
            failure: (!passed).then(|| Failure::Invariants {
                checks: vec![Check::LogMonotonicity.to_string()],
            }),
            cleanup_problems: Vec::new(),
        }
    }

    fn finish(reporter: OutcomeReporter) -> (Verdict, String, String) {
        let mut summary = Vec::new();
        let mut token = Vec::new();
        let verdict = reporter.finish(&mut summary, &mut token);
        (
            verdict,
            String::from_utf8(summary).expect("utf8"),
            String::from_utf8(token).expect("utf8"),
        )
    }

    #[test]
    fn all_passing_scenarios_pass_and_remove_run_dir() {
        let parent = tempfile::tempdir().expect("tempdir");
        let ctx = RunContext::create_in(parent.path(), false).expect("ctx");
        let dir = ctx.path().to_path_buf();
        let mut reporter = OutcomeReporter::new(ctx);
        reporter.record(outcome(RestoreVariant::Direct, true));
        reporter.record(outcome(RestoreVariant::Image, true));

        let (verdict, summary, token) = finish(reporter);
        assert_eq!(verdict, Verdict::Pass);
        assert_eq!(token, "PASS\n");
        assert!(summary.contains("direct-archive scenario passed"));
        assert!(!dir.exists());
    }

    #[test]
    fn one_failure_fails_the_run_and_still_cleans_up() {
        let parent = tempfile::tempdir().expect("tempdir");
        let ctx = RunContext::create_in(parent.path(), false).expect("ctx");
        let dir = ctx.path().to_path_buf();
        let mut reporter = OutcomeReporter::new(ctx);
        reporter.record(outcome(RestoreVariant::Direct, true));
        reporter.record(outcome(RestoreVariant::Image, false));

        let (verdict, summary, token) = finish(reporter);
        assert_eq!(verdict, Verdict::Fail);
        assert_eq!(verdict.exit_code(), 1);
        assert_eq!(token, "FAIL\n");
        assert!(summary.contains("image-mediated scenario FAILED"));
        assert!(!dir.exists());
    }

    #[test]
    fn no_scenarios_is_not_a_pass() {
        let parent = tempfile::tempdir().expect("tempdir");
        let ctx = RunContext::create_in(parent.path(), false).expect("ctx");
        let (verdict, _, _) = finish(OutcomeReporter::new(ctx));
        assert_eq!(verdict, Verdict::Fail);
    }

    #[test]
    fn incomplete_run_fails_even_if_recorded_scenarios_passed() {
        let parent = tempfile::tempdir().expect("tempdir");
        let ctx = RunContext::create_in(parent.path(), false).expect("ctx");
        let mut reporter = OutcomeReporter::new(ctx);
        reporter.record(outcome(RestoreVariant::Direct, true));
        reporter.mark_incomplete("could not create scenario directory");

        let (verdict, summary, _) = finish(reporter);
        assert_eq!(verdict, Verdict::Fail);
        assert!(summary.contains("run incomplete"));
    }

    #[test]
    fn unsupported_prints_fail_with_distinct_status() {
        let mut token = Vec::new();
        let verdict = report_unsupported("criu check failed", &mut token);
        assert_eq!(token, b"FAIL\n");
        assert_eq!(verdict.exit_code(), 2);
    }
}
