//! In-memory control plane used by tests.
//!
//! Simulates just enough runtime behaviour to exercise full scenarios:
//! containers have a file set and a log counter that advances while they
//! run, checkpoints snapshot both into a real file on disk, and containers
//! created from a known archive path or registered image resume from the
//! snapshot. A [`Fault`] makes the fake misbehave the way a broken runtime
//! would.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crestore_common::error::{CrestoreError, Result};
use crestore_common::types::{ContainerId, PodId};

use super::{ContainerRequest, ControlPlane};
use crate::exec::ExecOutput;
use crate::payload::{CONTAINER_IMAGE, POD_CGROUP_PARENT, PayloadTemplate};

/// Files present in a fresh container's home directory.
const INITIAL_FILES: &[&str] = &["/home/counter/.bash_logout", "/home/counter/.bashrc"];

/// Misbehaviour the fake can be told to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Restored containers start from the image's initial files.
    FreshFilesystem,
    /// Restored containers replay their log from the first line.
    ReplayLogs,
    /// `remove_pod` leaves the pod's containers listed under it.
    OrphanContainers,
    /// `remove_pod` deletes checkpoint archives taken in that pod.
    DiscardArchives,
    /// `create_pod` hands out the id of the last removed pod again.
    RecyclePodIds,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    files: BTreeSet<String>,
    log_lines: usize,
}

#[derive(Debug, Clone)]
struct ContainerRecord {
    pod: PodId,
    snapshot: Snapshot,
    running: bool,
    restored: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    pods: HashMap<PodId, Option<String>>,
    containers: HashMap<ContainerId, ContainerRecord>,
    checkpoints: HashMap<PathBuf, (PodId, Snapshot)>,
    images: HashMap<String, PathBuf>,
    pulled: HashSet<String>,
    failing: HashSet<&'static str>,
    faults: HashSet<Fault>,
    created_cgroups: Vec<Option<String>>,
    last_removed_pod: Option<PodId>,
    calls: Vec<String>,
}

/// A fake runtime holding all state in memory.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    state: Mutex<State>,
}

impl MemoryRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of `operation` fail.
    ///
    /// Operation names match the [`ControlPlane`] method names.
    pub fn fail_on(&self, operation: &'static str) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.failing.insert(operation);
        }
    }

    /// Turns on a misbehaviour for every later call.
    pub fn inject(&self, fault: Fault) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.faults.insert(fault);
        }
    }

    /// Makes `reference` resolve to the checkpoint written at `archive`.
    pub fn register_image(&self, reference: &str, archive: &Path) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.images.insert(reference.to_string(), archive.to_path_buf());
        }
    }

    /// Forgets an image registered with [`MemoryRuntime::register_image`].
    pub fn unregister_image(&self, reference: &str) {
        if let Ok(mut state) = self.state.lock() {
            let _ = state.images.remove(reference);
        }
    }

    /// Returns whether `reference` is currently resolvable.
    #[must_use]
    pub fn has_image(&self, reference: &str) -> bool {
        self.state
            .lock()
            .is_ok_and(|s| s.images.contains_key(reference) || s.pulled.contains(reference))
    }

    /// Returns the number of live pods.
    #[must_use]
    pub fn pod_count(&self) -> usize {
        self.state.lock().map_or(0, |s| s.pods.len())
    }

    /// Returns the cgroup parent of every pod created so far, in creation
    /// order, including pods that have since been removed.
    #[must_use]
    pub fn pod_cgroup_parents(&self) -> Vec<Option<String>> {
        self.state
            .lock()
            .map(|s| s.created_cgroups.clone())
            .unwrap_or_default()
    }

    /// Returns the operation names called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state.lock().map_err(|_| CrestoreError::Config {
            message: "memory runtime lock poisoned".into(),
        })?;
        state.calls.push(operation.to_string());
        if state.failing.contains(operation) {
            return Err(CrestoreError::CommandFailed {
                command: format!("memory {operation}"),
                code: 1,
                stderr: "injected failure".into(),
            });
        }
        Ok(state)
    }
}

impl State {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }

    fn container(&mut self, id: &ContainerId) -> Result<&mut ContainerRecord> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| CrestoreError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }

    fn running(&mut self, id: &ContainerId) -> Result<&mut ContainerRecord> {
        let record = self.container(id)?;
        if record.running {
            Ok(record)
        } else {
            Err(CrestoreError::Config {
                message: format!("container {id} is not running"),
            })
        }
    }

    fn resolve(&self, image: &str) -> Result<(Snapshot, bool)> {
        let archive = self.images.get(image).map_or_else(|| PathBuf::from(image), Clone::clone);
        if let Some((_, snapshot)) = self.checkpoints.get(&archive) {
            if !archive.exists() {
                return Err(CrestoreError::NotFound {
                    kind: "checkpoint archive",
                    id: archive.display().to_string(),
                });
            }
            let mut snapshot = snapshot.clone();
            if self.faults.contains(&Fault::FreshFilesystem) {
                snapshot.files = initial_files();
            }
            if self.faults.contains(&Fault::ReplayLogs) {
                snapshot.log_lines = 0;
            }
            return Ok((snapshot, true));
        }
        if self.pulled.contains(image) {
            return Ok((
                Snapshot {
                    files: initial_files(),
                    log_lines: 0,
                },
                false,
            ));
        }
        Err(CrestoreError::NotFound {
            kind: "image",
            id: image.to_string(),
        })
    }
}

fn initial_files() -> BTreeSet<String> {
    INITIAL_FILES.iter().map(|f| (*f).to_string()).collect()
}

impl ControlPlane for MemoryRuntime {
    fn create_pod(&self, pod_spec: &Path) -> Result<PodId> {
        let template = PayloadTemplate::load(pod_spec)?;
        let cgroup = template
            .field_str(POD_CGROUP_PARENT)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let mut state = self.enter("create_pod")?;
        let recycled = if state.faults.contains(&Fault::RecyclePodIds) {
            state.last_removed_pod.take()
        } else {
            None
        };
        let id = recycled.unwrap_or_else(|| PodId::new(state.next("pod")));
        state.created_cgroups.push(cgroup.clone());
        let _ = state.pods.insert(id.clone(), cgroup);
        Ok(id)
    }

    fn create_container(&self, request: ContainerRequest<'_>) -> Result<ContainerId> {
        let template = PayloadTemplate::load(request.container_spec)?;
        let image = template
            .field_str(CONTAINER_IMAGE)
            .unwrap_or_default()
            .to_string();
        let mut state = self.enter("create_container")?;
        if !state.pods.contains_key(request.pod) {
            return Err(CrestoreError::NotFound {
                kind: "pod",
                id: request.pod.to_string(),
            });
        }
        let (snapshot, restored) = state.resolve(&image)?;
        let id = ContainerId::new(state.next("ctr"));
        let _ = state.containers.insert(
            id.clone(),
            ContainerRecord {
                pod: request.pod.clone(),
                snapshot,
                running: false,
                restored,
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.enter("start_container")?;
        let record = state.container(id)?;
        record.running = true;
        tracing::debug!(container = %id, restored = record.restored, "memory container running");
        Ok(())
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<ExecOutput> {
        let mut state = self.enter("exec")?;
        let record = state.running(id)?;
        let files = &mut record.snapshot.files;
        let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
        let failed = |stderr: String| CrestoreError::CommandFailed {
            command: cmd.join(" "),
            code: 1,
            stderr,
        };
        match args.as_slice() {
            ["touch", path] => {
                let _ = files.insert((*path).to_string());
                Ok(ExecOutput::default())
            }
            ["rm", path] => {
                if files.remove(*path) {
                    Ok(ExecOutput::default())
                } else {
                    Err(failed(format!("rm: cannot remove '{path}'")))
                }
            }
            ["ls", "-1a", dir] => {
                let prefix = format!("{}/", dir.trim_end_matches('/'));
                let mut listing = String::from(".\n..\n");
                for name in files.iter().filter_map(|f| f.strip_prefix(&prefix)) {
                    if !name.contains('/') {
                        listing.push_str(name);
                        listing.push('\n');
                    }
                }
                Ok(ExecOutput {
                    stdout: listing,
                    ..ExecOutput::default()
                })
            }
            _ => Err(failed(format!("unsupported command: {}", cmd.join(" ")))),
        }
    }

    fn logs(&self, id: &ContainerId) -> Result<Vec<String>> {
        let mut state = self.enter("logs")?;
        let record = state.container(id)?;
        if record.running {
            record.snapshot.log_lines += 1;
        }
        Ok((0..record.snapshot.log_lines).map(|n| n.to_string()).collect())
    }

    fn checkpoint(&self, id: &ContainerId, export: &Path, _timeout: Duration) -> Result<()> {
        let mut state = self.enter("checkpoint")?;
        let record = state.running(id)?;
        let snapshot = record.snapshot.clone();
        let body = format!(
            "memory-checkpoint {id}\n{}\n",
            snapshot.files.iter().cloned().collect::<Vec<_>>().join("\n")
        );
        std::fs::write(export, body).map_err(|e| CrestoreError::Io {
            path: export.to_path_buf(),
            source: e,
        })?;
        let pod = record.pod.clone();
        let _ = state.checkpoints.insert(export.to_path_buf(), (pod, snapshot));
        Ok(())
    }

    fn list_containers(&self, pod: &PodId) -> Result<Vec<ContainerId>> {
        let state = self.enter("list_containers")?;
        let mut ids: Vec<ContainerId> = state
            .containers
            .iter()
            .filter(|(_, r)| r.pod == *pod)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    fn stop_and_remove_container(&self, id: &ContainerId) -> Result<()> {
        let mut state = self.enter("stop_and_remove_container")?;
        let _ = state.containers.remove(id);
        Ok(())
    }

    fn remove_pod(&self, id: &PodId) -> Result<()> {
        let mut state = self.enter("remove_pod")?;
        if state.pods.remove(id).is_some() {
            state.last_removed_pod = Some(id.clone());
        }
        if !state.faults.contains(&Fault::OrphanContainers) {
            state.containers.retain(|_, r| r.pod != *id);
        }
        if state.faults.contains(&Fault::DiscardArchives) {
            for (path, (pod, _)) in &state.checkpoints {
                if pod == id {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
        Ok(())
    }

    fn remove_all_pods(&self) -> Result<()> {
        let mut state = self.enter("remove_all_pods")?;
        state.pods.clear();
        state.containers.clear();
        Ok(())
    }

    fn pull_image(&self, reference: &str) -> Result<()> {
        let mut state = self.enter("pull_image")?;
        let _ = state.pulled.insert(reference.to_string());
        Ok(())
    }

    fn remove_image(&self, reference: &str) -> Result<()> {
        let mut state = self.enter("remove_image")?;
        let _ = state.images.remove(reference);
        let _ = state.pulled.remove(reference);
        Ok(())
    }
}
