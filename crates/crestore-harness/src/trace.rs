//! Step-by-step record of a scenario.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::sequencer::Phase;

/// One attempted transition of the scenario state machine.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// State the step started from.
    pub from: Phase,
    /// State reached; `Failed` if the step failed.
    pub to: Phase,
    /// Wall-clock start of the step.
    pub started_at: DateTime<Utc>,
    /// How long the step took.
    pub elapsed: Duration,
    /// Failure message, if any.
    pub error: Option<String>,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>18} -> {:<18} {:>7.2}s",
            self.started_at.format("%H:%M:%S"),
            self.from.to_string(),
            self.to.to_string(),
            self.elapsed.as_secs_f64()
        )?;
        if let Some(error) = &self.error {
            write!(f, "  {error}")?;
        }
        Ok(())
    }
}

/// Collects step records while a scenario runs.
#[derive(Debug, Default)]
pub struct Trace {
    steps: Vec<StepRecord>,
}

/// A step in progress; finished by [`Trace::finish`].
#[derive(Debug)]
pub struct OpenStep {
    from: Phase,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl Trace {
    /// Creates an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a step.
    #[must_use]
    pub fn begin(&self, from: Phase) -> OpenStep {
        OpenStep {
            from,
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    /// Records the end of a step.
    pub fn finish(&mut self, step: OpenStep, to: Phase, error: Option<String>) {
        self.steps.push(StepRecord {
            from: step.from,
            to,
            started_at: step.started_at,
            elapsed: step.start.elapsed(),
            error,
        });
    }

    /// Returns the recorded steps.
    #[must_use]
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Consumes the trace, returning its steps.
    #[must_use]
    pub fn into_steps(self) -> Vec<StepRecord> {
        self.steps
    }
}
