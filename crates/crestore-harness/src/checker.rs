//! Post-restore invariants.
//!
//! Each check turns a control-plane observation into a pass/fail result.
//! Checks never short-circuit: a failing or erroring check is recorded and
//! the remaining checks still run.

use std::fmt;
use std::path::Path;

use crestore_common::constants::{CREATED_FILE, DELETED_FILE};
use crestore_common::error::Result;
use crestore_common::types::ContainerId;
use crestore_runtime::backend::ControlPlane;

/// The invariants evaluated after restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    /// More log lines after restore than right after the original start.
    LogMonotonicity,
    /// The file created before checkpoint exists after restore.
    CreatedFilePresent,
    /// The file deleted before checkpoint is still absent after restore.
    DeletedFileAbsent,
}

impl Check {
    /// All checks in evaluation order.
    pub const ALL: [Self; 3] = [
        Self::LogMonotonicity,
        Self::CreatedFilePresent,
        Self::DeletedFileAbsent,
    ];
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogMonotonicity => write!(f, "log-monotonicity"),
            Self::CreatedFilePresent => write!(f, "created-file-present"),
            Self::DeletedFileAbsent => write!(f, "deleted-file-absent"),
        }
    }
}

/// A measurement and the relation it is expected to satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Log line count compared against an earlier count.
    LineCount {
        /// Count taken right after the original container started.
        baseline: usize,
        /// Count taken after restore.
        observed: usize,
    },
    /// Presence of a file inside the container.
    File {
        /// Path inside the container.
        path: String,
        /// Whether the file should exist.
        expected: bool,
        /// Whether the file exists.
        observed: bool,
    },
    /// The observation itself could not be made.
    Unobservable {
        /// Why the control plane could not answer.
        reason: String,
    },
}

impl Observation {
    /// Returns whether the observation satisfies its expectation.
    #[must_use]
    pub const fn holds(&self) -> bool {
        match self {
            Self::LineCount { baseline, observed } => *observed > *baseline,
            Self::File {
                expected, observed, ..
            } => *expected == *observed,
            Self::Unobservable { .. } => false,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LineCount { baseline, observed } => {
                write!(f, "{observed} log lines after restore, {baseline} after start")
            }
            Self::File {
                path,
                expected,
                observed,
            } => write!(
                f,
                "{path}: expected {}, found {}",
                presence(*expected),
                presence(*observed)
            ),
            Self::Unobservable { reason } => write!(f, "not observable: {reason}"),
        }
    }
}

const fn presence(present: bool) -> &'static str {
    if present { "present" } else { "absent" }
}

/// Outcome of one invariant check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Which invariant.
    pub check: Check,
    /// What was measured.
    pub observation: Observation,
}

impl CheckResult {
    /// Returns whether the invariant held.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.observation.holds()
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed() { "ok" } else { "FAILED" };
        write!(f, "{status:>6} {}: {}", self.check, self.observation)
    }
}

/// Evaluates the post-restore invariants through the control plane.
pub struct InvariantChecker<'a> {
    plane: &'a dyn ControlPlane,
}

impl<'a> InvariantChecker<'a> {
    /// Creates a checker bound to a control plane.
    #[must_use]
    pub const fn new(plane: &'a dyn ControlPlane) -> Self {
        Self { plane }
    }

    /// Runs every check against the restored container.
    #[must_use]
    pub fn verify(&self, restored: &ContainerId, baseline_lines: usize) -> Vec<CheckResult> {
        Check::ALL
            .iter()
            .map(|&check| {
                let observation = match check {
                    Check::LogMonotonicity => self.line_count(restored, baseline_lines),
                    Check::CreatedFilePresent => self.file(restored, CREATED_FILE, true),
                    Check::DeletedFileAbsent => self.file(restored, DELETED_FILE, false),
                };
                let result = CheckResult { check, observation };
                if result.passed() {
                    tracing::info!(container = %restored, %check, "invariant holds");
                } else {
                    tracing::error!(container = %restored, %check, observation = %result.observation, "invariant violated");
                }
                result
            })
            .collect()
    }

    fn line_count(&self, id: &ContainerId, baseline: usize) -> Observation {
        match self.plane.logs(id) {
            Ok(lines) => Observation::LineCount {
                baseline,
                observed: lines.len(),
            },
            Err(e) => Observation::Unobservable {
                reason: e.to_string(),
            },
        }
    }

    fn file(&self, id: &ContainerId, path: &str, expected: bool) -> Observation {
        match self.file_exists(id, path) {
            Ok(observed) => Observation::File {
                path: path.to_string(),
                expected,
                observed,
            },
            Err(e) => Observation::Unobservable {
                reason: e.to_string(),
            },
        }
    }

    /// Lists the parent directory so a missing file is an answer, not an
    /// exec failure.
    fn file_exists(&self, id: &ContainerId, path: &str) -> Result<bool> {
        let file = Path::new(path);
        let dir = file
            .parent()
            .map_or_else(|| "/".to_string(), |p| p.to_string_lossy().into_owned());
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cmd = vec!["ls".to_string(), "-1a".to_string(), dir];
        let listing = self.plane.exec(id, &cmd)?;
        Ok(listing.stdout_lines().iter().any(|entry| entry.trim() == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crestore_common::types::PodId;
    use crestore_runtime::backend::ContainerRequest;
    use crestore_runtime::backend::memory::MemoryRuntime;

    fn started(rt: &MemoryRuntime, dir: &Path) -> ContainerId {
        let pod_spec = dir.join("pod.json");
        std::fs::write(&pod_spec, "{}").expect("pod");
        let ctr_spec = dir.join("ctr.json");
        std::fs::write(&ctr_spec, r#"{ "image": { "image": "counter" } }"#).expect("ctr");
        rt.pull_image("counter").expect("pull");
        let pod: PodId = rt.create_pod(&pod_spec).expect("pod");
        let id = rt
            .create_container(ContainerRequest {
                pod: &pod,
                container_spec: &ctr_spec,
                pod_spec: &pod_spec,
            })
            .expect("create");
        rt.start_container(&id).expect("start");
        id
    }

    #[test]
    fn unmutated_container_fails_file_checks_but_all_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rt = MemoryRuntime::new();
        let id = started(&rt, dir.path());

        let results = InvariantChecker::new(&rt).verify(&id, 0);
        assert_eq!(results.len(), 3);
        assert!(results[0].passed());
        assert!(!results[1].passed());
        assert!(!results[2].passed());
    }

    #[test]
    fn mutated_container_passes_file_checks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rt = MemoryRuntime::new();
        let id = started(&rt, dir.path());
        let _ = rt.exec(&id, &["touch".into(), CREATED_FILE.into()]).expect("touch");
        let _ = rt.exec(&id, &["rm".into(), DELETED_FILE.into()]).expect("rm");

        let results = InvariantChecker::new(&rt).verify(&id, 0);
        assert!(results.iter().all(CheckResult::passed), "{results:?}");
    }

    #[test]
    fn equal_line_count_is_not_monotonic() {
        let obs = Observation::LineCount {
            baseline: 5,
            observed: 5,
        };
        assert!(!obs.holds());
    }

    #[test]
    fn failing_logs_is_recorded_not_raised() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rt = MemoryRuntime::new();
        let id = started(&rt, dir.path());
        rt.fail_on("logs");

        let results = InvariantChecker::new(&rt).verify(&id, 0);
        assert!(matches!(
            results[0].observation,
            Observation::Unobservable { .. }
        ));
        assert_eq!(results.len(), 3);
    }
}
