//! System-wide constants and default values.

/// Application name used in CLI output and temp directory prefixes.
pub const APP_NAME: &str = "crestore";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "crestore";

/// Default CRI endpoint of the runtime under test.
pub const DEFAULT_RUNTIME_ENDPOINT: &str = "unix:///var/run/crio/crio.sock";

/// Default control-plane CLI binary.
pub const DEFAULT_CRICTL_BIN: &str = "crictl";

/// Default capability probe binary (`criu check`).
pub const DEFAULT_PROBE_BIN: &str = "criu";

/// Arguments passed to the capability probe binary.
pub const DEFAULT_PROBE_ARGS: &[&str] = &["check"];

/// Default image builder binary.
pub const DEFAULT_BUILDER_BIN: &str = "buildah";

/// Default image store binary.
pub const DEFAULT_STORE_BIN: &str = "podman";

/// Default containerd CLI, used when the image store is `ctr`.
pub const DEFAULT_CTR_BIN: &str = "ctr";

/// containerd namespace the CRI plugin keeps its images in.
pub const DEFAULT_CONTAINERD_NAMESPACE: &str = "k8s.io";

/// Image the checkpointed container is started from.
pub const DEFAULT_TEST_IMAGE: &str = "quay.io/crio/counter:latest";

/// Store-local reference of the image built from a checkpoint archive.
pub const DEFAULT_CHECKPOINT_IMAGE: &str = "localhost/crestore-checkpoint:latest";

/// Cgroup parent the image-mediated restore pod is placed under.
pub const DEFAULT_RESTORE_CGROUP_PARENT: &str = "different_cgroup_789";

/// Annotation naming the container a checkpoint image was taken from.
pub const CHECKPOINT_NAME_ANNOTATION: &str = "io.kubernetes.cri-o.annotations.checkpoint.name";

/// File created inside the container before checkpointing.
pub const CREATED_FILE: &str = "/home/counter/testfile";

/// File deleted inside the container before checkpointing.
pub const DELETED_FILE: &str = "/home/counter/.bash_logout";

/// File name of the checkpoint archive inside the run directory.
pub const ARCHIVE_FILE_NAME: &str = "cp.tar";

/// File name of the exported checkpoint image inside the run directory.
pub const IMAGE_EXPORT_FILE_NAME: &str = "cp-image.tar";

/// Timeout for bulk pod removal, in seconds.
pub const BULK_REMOVE_TIMEOUT_SECS: u64 = 5;

/// Timeout for ordinary control-plane calls, in seconds.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

/// Timeout for container creation, which may include an image pull, in seconds.
pub const CREATE_TIMEOUT_SECS: u64 = 20;

/// Timeout for image pulls, in seconds.
pub const PULL_TIMEOUT_SECS: u64 = 120;

/// Timeout for checkpoint export, in seconds.
pub const CHECKPOINT_TIMEOUT_SECS: u64 = 60;

/// Timeout for each image builder and image store call, in seconds.
pub const IMAGE_TIMEOUT_SECS: u64 = 60;

/// Delay before sampling container logs, in milliseconds.
pub const LOG_SETTLE_MS: u64 = 2000;

/// Extra time given to a child process beyond its own `--timeout`.
pub const COMMAND_GRACE_MS: u64 = 2000;

/// Poll interval while waiting on a child process.
pub const COMMAND_POLL_INTERVAL_MS: u64 = 50;

/// How long output readers may run on after a process group was killed.
pub const PIPE_DRAIN_GRACE_MS: u64 = 500;
