//! Cooperative abort on SIGINT/SIGTERM.
//!
//! The handler only raises a flag. The sequencer polls it between steps and
//! fails the scenario, so teardown and the run-directory cleanup still run
//! before the process exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crestore_common::error::{CrestoreError, Result};

/// Shared flag raised when the run should stop.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether the flag has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `CrestoreError::Interrupted` once the flag is raised.
    ///
    /// # Errors
    ///
    /// Returns an error if the flag is raised.
    pub fn check(&self) -> Result<()> {
        if self.is_raised() {
            Err(CrestoreError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Installs a process-wide handler that raises the returned flag.
///
/// # Errors
///
/// Returns an error if a handler is already installed.
pub fn install_handler() -> Result<AbortFlag> {
    let flag = AbortFlag::new();
    let raised = flag.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("termination requested, finishing current step before cleanup");
        raised.raise();
    })
    .map_err(|e| CrestoreError::Config {
        message: format!("failed to install signal handler: {e}"),
    })?;
    Ok(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_flag_is_seen_by_clones() {
        let flag = AbortFlag::new();
        let clone = flag.clone();
        assert!(clone.check().is_ok());
        flag.raise();
        assert!(clone.is_raised());
        assert!(matches!(clone.check(), Err(CrestoreError::Interrupted)));
    }
}
