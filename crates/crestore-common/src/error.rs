//! Unified error types for the crestore workspace.
//!
//! Every crate reports failures through [`CrestoreError`]. The harness maps
//! the variants onto its outcome taxonomy: [`CrestoreError::Unsupported`] is an
//! environment failure, [`CrestoreError::Interrupted`] is an external abort, and
//! everything else raised inside a scenario is a step failure.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CrestoreError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The host cannot run checkpoint/restore.
    #[error("environment unsupported: {message}")]
    Unsupported {
        /// Why the environment was rejected.
        message: String,
    },

    /// An external command exited with a non-zero status.
    #[error("`{command}` exited with status {code}: {stderr}")]
    CommandFailed {
        /// Rendered command line.
        command: String,
        /// Exit code, or -1 if killed by a signal.
        code: i32,
        /// Trimmed standard error of the command.
        stderr: String,
    },

    /// An external command did not finish within its deadline.
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        /// Rendered command line.
        command: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// A request payload template could not be patched.
    #[error("payload error in {path}: {message}")]
    Payload {
        /// Template or output file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A checkpoint archive changed after it was written.
    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Archive path.
        path: PathBuf,
        /// Digest recorded after checkpoint.
        expected: String,
        /// Digest observed now.
        actual: String,
    },

    /// The run was aborted by a termination signal.
    #[error("interrupted by signal")]
    Interrupted,

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CrestoreError {
    /// Returns true if the error means the host cannot run the scenarios at all.
    #[must_use]
    pub const fn is_environment(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CrestoreError>;
