//! Scenario state machine.
//!
//! A scenario walks `Init → PodCreated → ContainerRunning → Mutated →
//! Checkpointed → PodTornDown → RestorePodCreated → Restored → Verified →
//! Done`. Each edge is one small, fixed group of control-plane calls. The
//! first failing edge moves the machine to the absorbing `Failed` state; in
//! every case teardown runs before the outcome is returned.
//!
//! The two restore variants share every edge except the restore-side ones:
//! the direct variant restores from the archive path into a pod built from
//! the original request, the image variant converts and imports the archive
//! first and restores into a pod with a different cgroup parent.

use std::fmt;
use std::path::{Path, PathBuf};

use crestore_common::config::HarnessConfig;
use crestore_common::constants::{
    ARCHIVE_FILE_NAME, CREATED_FILE, DELETED_FILE, IMAGE_EXPORT_FILE_NAME,
};
use crestore_common::error::{CrestoreError, Result};
use crestore_common::types::{
    CheckpointArchive, CheckpointImage, ImageRef, PodState, RestoreVariant,
};
use crestore_image::converter::ArtifactConverter;
use crestore_image::hash;
use crestore_image::store::ImageStore;
use crestore_runtime::backend::{ContainerRequest, ControlPlane};
use crestore_runtime::container::{Container, PodSandbox};
use crestore_runtime::payload::{
    CONTAINER_IMAGE, POD_CGROUP_PARENT, POD_LOG_DIRECTORY, PayloadTemplate,
};
use thiserror::Error;

use crate::checker::{CheckResult, InvariantChecker};
use crate::signal::AbortFlag;
use crate::trace::{StepRecord, Trace};

/// Container name stamped on checkpoint images when the template has none.
const DEFAULT_CONTAINER_NAME: &str = "counter";

/// States of the scenario state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing created yet.
    Init,
    /// Original pod exists.
    PodCreated,
    /// Original container started and its log baseline taken.
    ContainerRunning,
    /// Filesystem mutations applied.
    Mutated,
    /// Checkpoint archive exported.
    Checkpointed,
    /// Original pod destroyed.
    PodTornDown,
    /// Fresh pod for the restore exists.
    RestorePodCreated,
    /// Restored container running.
    Restored,
    /// All invariants held.
    Verified,
    /// Scenario complete.
    Done,
    /// A step failed. Absorbing.
    Failed,
}

impl Phase {
    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::PodCreated => "pod-created",
            Self::ContainerRunning => "container-running",
            Self::Mutated => "mutated",
            Self::Checkpointed => "checkpointed",
            Self::PodTornDown => "pod-torn-down",
            Self::RestorePodCreated => "restore-pod-created",
            Self::Restored => "restored",
            Self::Verified => "verified",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a scenario ended in `Failed`.
#[derive(Debug, Error)]
pub enum Failure {
    /// A control-plane, converter, or store call failed or timed out.
    #[error("step from {phase} failed: {source}")]
    Step {
        /// State the failing step started from.
        phase: Phase,
        /// Underlying error.
        #[source]
        source: CrestoreError,
    },

    /// One or more post-restore invariants did not hold.
    #[error("invariants violated: {}", .checks.join(", "))]
    Invariants {
        /// Names of the failing checks.
        checks: Vec<String>,
    },

    /// A termination signal arrived.
    #[error("interrupted before step from {phase}")]
    Interrupted {
        /// State the machine was in.
        phase: Phase,
    },
}

impl Failure {
    fn from_error(phase: Phase, error: CrestoreError) -> Self {
        match error {
            CrestoreError::Interrupted => Self::Interrupted { phase },
            source => Self::Step { phase, source },
        }
    }
}

/// Everything a finished scenario reports.
#[derive(Debug)]
pub struct ScenarioOutcome {
    /// Which restore path ran.
    pub variant: RestoreVariant,
    /// Terminal state reached.
    pub final_phase: Phase,
    /// Every attempted transition.
    pub steps: Vec<StepRecord>,
    /// Invariant results, empty if the scenario never reached `Restored`.
    pub checks: Vec<CheckResult>,
    /// Proximate failure, if any.
    pub failure: Option<Failure>,
    /// Teardown problems; logged, never part of the verdict.
    pub cleanup_problems: Vec<String>,
}

impl ScenarioOutcome {
    /// Returns true only if every step and every check succeeded.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.final_phase == Phase::Done
            && self.failure.is_none()
            && !self.checks.is_empty()
            && self.checks.iter().all(CheckResult::passed)
    }
}

/// External systems a scenario drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Runtime control plane.
    pub plane: &'a dyn ControlPlane,
    /// Archive to image converter.
    pub converter: &'a dyn ArtifactConverter,
    /// Runtime image store bridge.
    pub store: &'a dyn ImageStore,
}

/// Mutable state of one scenario.
struct Scenario {
    variant: RestoreVariant,
    dir: PathBuf,
    pod: Option<PodSandbox>,
    container: Option<Container>,
    archive: Option<CheckpointArchive>,
    image: Option<CheckpointImage>,
    restore_pod: Option<PodSandbox>,
    restored: Option<Container>,
    baseline_lines: usize,
    checks: Vec<CheckResult>,
}

impl Scenario {
    const fn new(variant: RestoreVariant, dir: PathBuf) -> Self {
        Self {
            variant,
            dir,
            pod: None,
            container: None,
            archive: None,
            image: None,
            restore_pod: None,
            restored: None,
            baseline_lines: 0,
            checks: Vec::new(),
        }
    }

    fn log_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }
}

/// Returns the value a step depends on, or an error naming what is missing.
fn required<'s, T>(slot: &'s mut Option<T>, what: &'static str) -> Result<&'s mut T> {
    slot.as_mut().ok_or_else(|| CrestoreError::NotFound {
        kind: what,
        id: "current scenario".into(),
    })
}

/// Drives one scenario at a time through the state machine.
pub struct Sequencer<'a> {
    config: &'a HarnessConfig,
    parts: Collaborators<'a>,
    abort: AbortFlag,
    pod_template: PayloadTemplate,
    container_template: PayloadTemplate,
}

impl<'a> Sequencer<'a> {
    /// Loads the request templates and binds the collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if either template cannot be loaded.
    pub fn new(config: &'a HarnessConfig, parts: Collaborators<'a>, abort: AbortFlag) -> Result<Self> {
        Ok(Self {
            config,
            parts,
            abort,
            pod_template: PayloadTemplate::load(&config.pod_template)?,
            container_template: PayloadTemplate::load(&config.container_template)?,
        })
    }

    /// Runs one scenario to `Done` or `Failed`, then tears it down.
    pub fn run(&self, variant: RestoreVariant, dir: &Path) -> ScenarioOutcome {
        let span = tracing::info_span!("scenario", %variant);
        let _guard = span.enter();
        tracing::info!(dir = %dir.display(), "scenario starting");

        let mut scenario = Scenario::new(variant, dir.to_path_buf());
        let mut trace = Trace::new();
        let mut phase = Phase::Init;
        let mut failure = None;

        while !phase.is_terminal() {
            let step = trace.begin(phase);
            let result = self
                .abort
                .check()
                .map_err(|e| Failure::from_error(phase, e))
                .and_then(|()| self.advance(phase, &mut scenario));
            match result {
                Ok(next) => {
                    tracing::info!(from = %phase, to = %next, "step complete");
                    trace.finish(step, next, None);
                    phase = next;
                }
                Err(f) => {
                    tracing::error!(from = %phase, error = %f, "step failed");
                    trace.finish(step, Phase::Failed, Some(f.to_string()));
                    failure = Some(f);
                    phase = Phase::Failed;
                }
            }
        }

        let cleanup_problems = self.teardown(&mut scenario);
        tracing::info!(final_phase = %phase, "scenario finished");

        ScenarioOutcome {
            variant,
            final_phase: phase,
            steps: trace.into_steps(),
            checks: scenario.checks,
            failure,
            cleanup_problems,
        }
    }

    fn advance(&self, phase: Phase, s: &mut Scenario) -> std::result::Result<Phase, Failure> {
        let fail = |e| Failure::from_error(phase, e);
        match phase {
            Phase::Init => self.create_original_pod(s).map(|()| Phase::PodCreated).map_err(fail),
            Phase::PodCreated => self
                .start_original_container(s)
                .map(|()| Phase::ContainerRunning)
                .map_err(fail),
            Phase::ContainerRunning => self.mutate(s).map(|()| Phase::Mutated).map_err(fail),
            Phase::Mutated => self.checkpoint(s).map(|()| Phase::Checkpointed).map_err(fail),
            Phase::Checkpointed => self
                .tear_down_original(s)
                .map(|()| Phase::PodTornDown)
                .map_err(fail),
            Phase::PodTornDown => self
                .create_restore_pod(s)
                .map(|()| Phase::RestorePodCreated)
                .map_err(fail),
            Phase::RestorePodCreated => self.restore(s).map(|()| Phase::Restored).map_err(fail),
            Phase::Restored => self.verify(s).map(|()| Phase::Verified),
            Phase::Verified => self.finish(s).map(|()| Phase::Done).map_err(fail),
            Phase::Done | Phase::Failed => Ok(phase),
        }
    }

    // ── edges ────────────────────────────────────────────────────────

    fn create_original_pod(&self, s: &mut Scenario) -> Result<()> {
        self.with_attempts("reset runtime state", || self.reset(s.variant))?;
        self.with_attempts("pull test image", || {
            self.parts.plane.pull_image(&self.config.test_image)
        })?;

        let spec_path = self
            .pod_template
            .with_field(POD_LOG_DIRECTORY, s.log_dir().to_string_lossy().as_ref())?
            .write_to(&s.dir, "pod.json")?;
        let id = self.parts.plane.create_pod(&spec_path)?;
        let cgroup = self
            .pod_template
            .field_str(POD_CGROUP_PARENT)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        s.pod = Some(PodSandbox::running(id, spec_path, cgroup));
        Ok(())
    }

    fn start_original_container(&self, s: &mut Scenario) -> Result<()> {
        let image = ImageRef::named(&self.config.test_image);
        let container_spec = self
            .container_template
            .with_field(CONTAINER_IMAGE, image.to_payload_value())?
            .write_to(&s.dir, "container.json")?;
        let pod = required(&mut s.pod, "pod sandbox")?;
        let id = self.parts.plane.create_container(ContainerRequest {
            pod: &pod.id,
            container_spec: &container_spec,
            pod_spec: &pod.spec_path,
        })?;
        let mut container = Container::created(id, pod.id.clone(), image);
        self.parts.plane.start_container(&container.id)?;
        container.mark_started()?;

        std::thread::sleep(self.config.log_settle());
        s.baseline_lines = self.parts.plane.logs(&container.id)?.len();
        tracing::info!(container = %container.id, lines = s.baseline_lines, "log baseline taken");
        s.container = Some(container);
        Ok(())
    }

    fn mutate(&self, s: &mut Scenario) -> Result<()> {
        let container = required(&mut s.container, "container")?;
        let plane = self.parts.plane;
        let _ = plane.exec(&container.id, &["touch".into(), CREATED_FILE.into()])?;
        let _ = plane.exec(&container.id, &["rm".into(), DELETED_FILE.into()])?;
        tracing::info!(created = CREATED_FILE, deleted = DELETED_FILE, "container filesystem mutated");
        Ok(())
    }

    fn checkpoint(&self, s: &mut Scenario) -> Result<()> {
        let export = s.dir.join(ARCHIVE_FILE_NAME);
        let container = required(&mut s.container, "container")?;
        if !container.state.can_checkpoint() {
            return Err(CrestoreError::Config {
                message: format!(
                    "container {} is {} and cannot be checkpointed",
                    container.id, container.state
                ),
            });
        }
        self.parts
            .plane
            .checkpoint(&container.id, &export, self.config.timeouts.checkpoint())?;
        container.mark_checkpointed()?;

        let digest = hash::hash_file(&export)?;
        tracing::info!(archive = %export.display(), %digest, "checkpoint archive recorded");
        s.archive = Some(CheckpointArchive {
            path: export,
            source: container.id.clone(),
            digest,
        });
        Ok(())
    }

    fn tear_down_original(&self, s: &mut Scenario) -> Result<()> {
        let pod = required(&mut s.pod, "pod sandbox")?;
        self.parts.plane.remove_pod(&pod.id)?;
        pod.tear_down();

        let leftover = self.parts.plane.list_containers(&pod.id)?;
        if !leftover.is_empty() {
            return Err(CrestoreError::Config {
                message: format!(
                    "{} container(s) still reachable under removed pod {}",
                    leftover.len(),
                    pod.id
                ),
            });
        }

        let archive = required(&mut s.archive, "checkpoint archive")?;
        if !archive.path.is_file() {
            return Err(CrestoreError::NotFound {
                kind: "checkpoint archive",
                id: archive.path.display().to_string(),
            });
        }
        Ok(())
    }

    fn create_restore_pod(&self, s: &mut Scenario) -> Result<()> {
        let archive = required(&mut s.archive, "checkpoint archive")?.clone();
        hash::validate_hash(&archive.path, &archive.digest)?;

        let (spec_path, cgroup) = match s.variant {
            RestoreVariant::Direct => {
                let original = required(&mut s.pod, "pod sandbox")?;
                (original.spec_path.clone(), original.cgroup_parent.clone())
            }
            RestoreVariant::Image => {
                let export = s.dir.join(IMAGE_EXPORT_FILE_NAME);
                let image =
                    self.parts
                        .converter
                        .convert(&archive.path, &self.container_name(), &export)?;
                self.parts.store.import(&image.export_path, &image.reference)?;
                s.image = Some(image);

                let cgroup = self.config.restore_cgroup_parent.clone();
                let spec_path = self
                    .pod_template
                    .with_field(POD_LOG_DIRECTORY, s.log_dir().to_string_lossy().as_ref())?
                    .with_field(POD_CGROUP_PARENT, cgroup.as_str())?
                    .write_to(&s.dir, "restore-pod.json")?;
                (spec_path, Some(cgroup))
            }
        };

        let id = self.parts.plane.create_pod(&spec_path)?;
        tracing::info!(pod = %id, cgroup_parent = ?cgroup, "restore pod created");
        s.restore_pod = Some(PodSandbox::running(id, spec_path, cgroup));
        Ok(())
    }

    fn restore(&self, s: &mut Scenario) -> Result<()> {
        let image = match s.variant {
            RestoreVariant::Direct => {
                ImageRef::Archive(required(&mut s.archive, "checkpoint archive")?.path.clone())
            }
            RestoreVariant::Image => {
                ImageRef::named(&required(&mut s.image, "checkpoint image")?.reference)
            }
        };
        let container_spec = self
            .container_template
            .with_field(CONTAINER_IMAGE, image.to_payload_value())?
            .write_to(&s.dir, "restore-container.json")?;

        let original = required(&mut s.pod, "pod sandbox")?;
        let pod = required(&mut s.restore_pod, "restore pod sandbox")?;
        pod.accepts_restore_from(original)?;
        let id = self.parts.plane.create_container(ContainerRequest {
            pod: &pod.id,
            container_spec: &container_spec,
            pod_spec: &pod.spec_path,
        })?;
        let mut restored = Container::created(id, pod.id.clone(), image);
        self.parts.plane.start_container(&restored.id)?;
        restored.mark_started()?;
        tracing::info!(container = %restored.id, image = %restored.image, "container restored");
        s.restored = Some(restored);
        Ok(())
    }

    fn verify(&self, s: &mut Scenario) -> std::result::Result<(), Failure> {
        let restored = required(&mut s.restored, "restored container")
            .map_err(|e| Failure::from_error(Phase::Restored, e))?
            .id
            .clone();

        std::thread::sleep(self.config.log_settle());
        s.checks = InvariantChecker::new(self.parts.plane).verify(&restored, s.baseline_lines);

        let failed: Vec<String> = s
            .checks
            .iter()
            .filter(|c| !c.passed())
            .map(|c| c.check.to_string())
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Failure::Invariants { checks: failed })
        }
    }

    fn finish(&self, s: &mut Scenario) -> Result<()> {
        let restored = required(&mut s.restored, "restored container")?;
        self.parts.plane.stop_and_remove_container(&restored.id)?;
        restored.mark_stopped();
        Ok(())
    }

    // ── reset and teardown ───────────────────────────────────────────

    /// Clears state a previous run may have left behind.
    fn reset(&self, variant: RestoreVariant) -> Result<()> {
        self.parts.plane.remove_all_pods()?;
        if variant == RestoreVariant::Image {
            self.parts.store.remove(&self.config.checkpoint_image)?;
            self.parts.plane.remove_image(&self.config.checkpoint_image)?;
        }
        Ok(())
    }

    /// Releases every runtime resource the scenario may have created.
    ///
    /// Failures are logged and collected, never raised.
    fn teardown(&self, s: &mut Scenario) -> Vec<String> {
        let plane = self.parts.plane;
        let mut problems = Vec::new();
        let mut note = |what: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!(what, error = %e, "cleanup step failed");
                problems.push(format!("{what}: {e}"));
            }
        };

        for pod in [s.restore_pod.as_mut(), s.pod.as_mut()].into_iter().flatten() {
            if pod.state == PodState::Running {
                note("remove pod", plane.remove_pod(&pod.id));
                pod.tear_down();
            }
        }
        note("remove all pods", plane.remove_all_pods());
        if s.variant == RestoreVariant::Image {
            let reference = &self.config.checkpoint_image;
            note("remove image from store", self.parts.store.remove(reference));
            note("remove image from runtime", plane.remove_image(reference));
        }
        problems
    }

    /// Retries a precondition up to the configured number of attempts.
    fn with_attempts<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let attempts = self.config.precondition_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts || matches!(e, CrestoreError::Interrupted) => {
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(what, attempt, attempts, error = %e, "precondition failed, retrying");
                    attempt += 1;
                    self.abort.check()?;
                }
            }
        }
    }

    fn container_name(&self) -> String {
        self.container_template
            .field_str("metadata.name")
            .unwrap_or(DEFAULT_CONTAINER_NAME)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crestore_image::memory::MemoryImageBridge;
    use crestore_runtime::backend::memory::{Fault, MemoryRuntime};

    use super::*;
    use crate::checker::Check;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        config: HarnessConfig,
        runtime: Arc<MemoryRuntime>,
        bridge: MemoryImageBridge,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let root = dir.path().to_path_buf();
            let pod_template = root.join("sandbox.yaml");
            std::fs::write(
                &pod_template,
                "metadata:\n  name: counter-sandbox\nlog_directory: /tmp\nlinux:\n  cgroup_parent: \"\"\n",
            )
            .expect("pod template");
            let container_template = root.join("container.json");
            std::fs::write(
                &container_template,
                r#"{ "metadata": { "name": "counter" }, "image": { "image": "" } }"#,
            )
            .expect("container template");

            let config = HarnessConfig {
                pod_template,
                container_template,
                log_settle_ms: 0,
                ..HarnessConfig::default()
            };
            let runtime = Arc::new(MemoryRuntime::new());
            let bridge = MemoryImageBridge::new(Arc::clone(&runtime), config.checkpoint_image.clone());
            Self {
                _dir: dir,
                root,
                config,
                runtime,
                bridge,
            }
        }

        fn run(&self, variant: RestoreVariant) -> ScenarioOutcome {
            self.run_with(variant, AbortFlag::new())
        }

        fn run_with(&self, variant: RestoreVariant, abort: AbortFlag) -> ScenarioOutcome {
            let parts = Collaborators {
                plane: self.runtime.as_ref(),
                converter: &self.bridge,
                store: &self.bridge,
            };
            let dir = self.root.join(variant.to_string());
            std::fs::create_dir_all(dir.join("logs")).expect("scenario dir");
            Sequencer::new(&self.config, parts, abort)
                .expect("sequencer")
                .run(variant, &dir)
        }
    }

    #[test]
    fn direct_variant_reaches_done() {
        let fx = Fixture::new();
        let outcome = fx.run(RestoreVariant::Direct);
        assert!(outcome.passed(), "{:?}", outcome.failure);
        assert_eq!(outcome.final_phase, Phase::Done);
        assert_eq!(outcome.steps.len(), 9);
        assert_eq!(outcome.checks.len(), Check::ALL.len());
        assert_eq!(fx.runtime.pod_count(), 0);
        assert!(outcome.cleanup_problems.is_empty());
    }

    #[test]
    fn image_variant_restores_into_different_cgroup() {
        let fx = Fixture::new();
        let outcome = fx.run(RestoreVariant::Image);
        assert!(outcome.passed(), "{:?}", outcome.failure);

        let restore_pod = fx.root.join("image-mediated").join("restore-pod.json");
        let spec = PayloadTemplate::load(&restore_pod).expect("restore pod spec");
        assert_eq!(spec.field_str(POD_CGROUP_PARENT), Some("different_cgroup_789"));
        assert_eq!(
            fx.runtime.pod_cgroup_parents(),
            [None, Some("different_cgroup_789".to_string())]
        );
        let calls = fx.bridge.calls();
        assert!(calls.contains(&"convert".to_string()));
        assert!(calls.contains(&"import".to_string()));
        assert!(!fx.runtime.has_image(&fx.config.checkpoint_image));
    }

    #[test]
    fn direct_variant_reuses_original_pod_request() {
        let fx = Fixture::new();
        let outcome = fx.run(RestoreVariant::Direct);
        assert!(outcome.passed());
        assert!(!fx.root.join("direct-archive").join("restore-pod.json").exists());
        assert!(fx.bridge.calls().is_empty());
    }

    #[test]
    fn checkpoint_failure_stops_before_teardown_edge_and_still_cleans_up() {
        let fx = Fixture::new();
        fx.runtime.fail_on("checkpoint");
        let outcome = fx.run(RestoreVariant::Direct);

        assert!(!outcome.passed());
        assert_eq!(outcome.final_phase, Phase::Failed);
        let last = outcome.steps.last().expect("steps");
        assert_eq!(last.from, Phase::Mutated);
        assert!(matches!(
            outcome.failure,
            Some(Failure::Step {
                phase: Phase::Mutated,
                ..
            })
        ));
        assert!(outcome.checks.is_empty());
        assert_eq!(fx.runtime.pod_count(), 0);
        assert_eq!(fx.runtime.calls().last().map(String::as_str), Some("remove_all_pods"));
    }

    #[test]
    fn unconfirmed_pod_removal_fails_teardown_edge() {
        let fx = Fixture::new();
        fx.runtime.fail_on("list_containers");
        let outcome = fx.run(RestoreVariant::Direct);
        assert!(matches!(
            outcome.failure,
            Some(Failure::Step {
                phase: Phase::Checkpointed,
                ..
            })
        ));
    }

    #[test]
    fn restore_that_loses_state_fails_every_invariant() {
        let fx = Fixture::new();
        fx.runtime.inject(Fault::FreshFilesystem);
        fx.runtime.inject(Fault::ReplayLogs);
        let outcome = fx.run(RestoreVariant::Direct);

        assert_eq!(outcome.final_phase, Phase::Failed);
        assert_eq!(outcome.steps.last().map(|s| s.from), Some(Phase::Restored));
        assert_eq!(outcome.checks.len(), Check::ALL.len());
        assert!(outcome.checks.iter().all(|c| !c.passed()));
        match outcome.failure {
            Some(Failure::Invariants { checks }) => assert_eq!(checks.len(), Check::ALL.len()),
            other => panic!("expected invariant failure, got {other:?}"),
        }
        assert_eq!(fx.runtime.pod_count(), 0);
    }

    #[test]
    fn replayed_log_alone_fails_only_log_check() {
        let fx = Fixture::new();
        fx.runtime.inject(Fault::ReplayLogs);
        let outcome = fx.run(RestoreVariant::Image);

        let failed: Vec<Check> = outcome
            .checks
            .iter()
            .filter(|c| !c.passed())
            .map(|c| c.check)
            .collect();
        assert_eq!(failed, [Check::LogMonotonicity]);
        assert!(matches!(outcome.failure, Some(Failure::Invariants { .. })));
    }

    #[test]
    fn containers_left_under_removed_pod_fail_teardown_edge() {
        let fx = Fixture::new();
        fx.runtime.inject(Fault::OrphanContainers);
        let outcome = fx.run(RestoreVariant::Direct);

        match &outcome.failure {
            Some(Failure::Step {
                phase: Phase::Checkpointed,
                source,
            }) => assert!(source.to_string().contains("still reachable under removed pod")),
            other => panic!("expected teardown failure, got {other:?}"),
        }
        assert!(outcome.checks.is_empty());
        assert_eq!(fx.runtime.pod_cgroup_parents().len(), 1);
        assert_eq!(fx.runtime.pod_count(), 0);
    }

    #[test]
    fn archive_lost_with_its_pod_fails_teardown_edge() {
        let fx = Fixture::new();
        fx.runtime.inject(Fault::DiscardArchives);
        let outcome = fx.run(RestoreVariant::Direct);

        match &outcome.failure {
            Some(Failure::Step {
                phase: Phase::Checkpointed,
                source: CrestoreError::NotFound { kind, .. },
            }) => assert_eq!(*kind, "checkpoint archive"),
            other => panic!("expected missing archive, got {other:?}"),
        }
        assert_eq!(fx.runtime.pod_cgroup_parents().len(), 1);
    }

    #[test]
    fn recycled_pod_id_is_refused_before_restore() {
        let fx = Fixture::new();
        fx.runtime.inject(Fault::RecyclePodIds);
        let outcome = fx.run(RestoreVariant::Direct);

        match &outcome.failure {
            Some(Failure::Step {
                phase: Phase::RestorePodCreated,
                source,
            }) => assert!(source.to_string().contains("checkpoint was taken in")),
            other => panic!("expected refused restore pod, got {other:?}"),
        }
        let creates = fx
            .runtime
            .calls()
            .iter()
            .filter(|c| c.as_str() == "create_container")
            .count();
        assert_eq!(creates, 1);
        assert_eq!(fx.runtime.pod_count(), 0);
    }

    #[test]
    fn conversion_failure_fails_image_variant() {
        let fx = Fixture::new();
        fx.bridge.fail_on("convert");
        let outcome = fx.run(RestoreVariant::Image);
        assert!(matches!(
            outcome.failure,
            Some(Failure::Step {
                phase: Phase::PodTornDown,
                ..
            })
        ));
        assert_eq!(fx.runtime.pod_count(), 0);
    }

    #[test]
    fn raised_abort_fails_without_runtime_calls_beyond_cleanup() {
        let fx = Fixture::new();
        let abort = AbortFlag::new();
        abort.raise();
        let outcome = fx.run_with(RestoreVariant::Direct, abort);

        assert!(matches!(
            outcome.failure,
            Some(Failure::Interrupted { phase: Phase::Init })
        ));
        assert_eq!(fx.runtime.calls(), ["remove_all_pods"]);
    }

    #[test]
    fn cleanup_problems_are_collected_not_raised() {
        let fx = Fixture::new();
        fx.runtime.fail_on("remove_all_pods");
        let outcome = fx.run(RestoreVariant::Direct);

        assert!(matches!(
            outcome.failure,
            Some(Failure::Step {
                phase: Phase::Init,
                ..
            })
        ));
        assert_eq!(outcome.cleanup_problems.len(), 1);
        assert!(outcome.cleanup_problems[0].starts_with("remove all pods"));
    }

    #[test]
    fn precondition_failure_is_retried_when_configured() {
        let mut fx = Fixture::new();
        fx.config.precondition_attempts = 3;
        fx.runtime.fail_on("pull_image");
        let outcome = fx.run(RestoreVariant::Direct);

        let pulls = fx
            .runtime
            .calls()
            .iter()
            .filter(|c| c.as_str() == "pull_image")
            .count();
        assert_eq!(pulls, 3);
        assert_eq!(outcome.final_phase, Phase::Failed);
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Done.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Verified.is_terminal());
    }
}
