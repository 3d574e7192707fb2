//! Domain primitive types used across the crestore workspace.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifier of a pod sandbox as returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodId(String);

impl PodId {
    /// Creates a pod ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a container as returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference a container is created from.
///
/// Either a pullable or store-local image name, or the filesystem path of a
/// checkpoint archive the runtime restores from directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageRef {
    /// `name:tag` reference resolved through an image store.
    Named(String),
    /// Path to a checkpoint archive on the host.
    Archive(PathBuf),
}

impl ImageRef {
    /// Creates a named image reference.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Returns the string written into a container request payload.
    #[must_use]
    pub fn to_payload_value(&self) -> String {
        match self {
            Self::Named(name) => name.clone(),
            Self::Archive(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Archive(path) => write!(f, "archive:{}", path.display()),
        }
    }
}

/// A checkpoint archive written by the runtime.
///
/// The harness never looks inside the archive. It only tracks where the file
/// lives and the digest recorded right after it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointArchive {
    /// Location of the archive on the host.
    pub path: PathBuf,
    /// Container the archive was taken from.
    pub source: ContainerId,
    /// Hex SHA-256 digest recorded right after export.
    pub digest: String,
}

impl CheckpointArchive {
    /// Returns the archive location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An image built from a checkpoint archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointImage {
    /// Store-local `name:tag` reference.
    pub reference: String,
    /// Disk-resident export used to move the image into the runtime store.
    pub export_path: PathBuf,
}

/// Lifecycle state of a pod sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodState {
    /// Created and ready.
    Running,
    /// Stopped and removed.
    TornDown,
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::TornDown => write!(f, "torn-down"),
        }
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Created but not yet started.
    Created,
    /// Process is running.
    Started,
    /// Process has been stopped.
    Stopped,
    /// A checkpoint archive has been exported.
    Checkpointed,
}

impl ContainerState {
    /// Returns true if a checkpoint may be taken from this state.
    #[must_use]
    pub const fn can_checkpoint(self) -> bool {
        matches!(self, Self::Started)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Checkpointed => write!(f, "checkpointed"),
        }
    }
}

/// Path taken between checkpoint and restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreVariant {
    /// Restore straight from the checkpoint archive.
    Direct,
    /// Convert the archive to an image, import it, restore from the image.
    Image,
}

impl RestoreVariant {
    /// Both variants in the order they are run.
    pub const ALL: [Self; 2] = [Self::Direct, Self::Image];
}

impl fmt::Display for RestoreVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct-archive"),
            Self::Image => write!(f, "image-mediated"),
        }
    }
}

/// Tool that owns the runtime's image store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStoreKind {
    /// `podman`, sharing containers/storage with CRI-O.
    #[default]
    Podman,
    /// containerd's `ctr`, in the CRI plugin's namespace.
    Ctr,
}

impl fmt::Display for ImageStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Podman => write!(f, "podman"),
            Self::Ctr => write!(f, "ctr"),
        }
    }
}
