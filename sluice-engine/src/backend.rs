//! The task execution backend contract.
//!
//! A backend knows how to obtain a container image and run a rendered
//! command script against a prepared working directory. The engine talks to
//! it through [`TaskExecutionBackend`]; implementations range from a local
//! process runner to remote container clusters.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub mod local;

/// A host path mounted into the task container.
#[derive(Debug, Clone)]
pub struct Mount {
    /// The host path.
    pub host: PathBuf,
    /// The path inside the container.
    pub guest: PathBuf,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// The resources and image a task requests.
#[derive(Debug, Clone, Default)]
pub struct TaskResources {
    /// The requested number of CPUs.
    pub cpu: f64,
    /// The requested memory in bytes.
    pub memory: i64,
    /// The container image to run in, if any.
    pub container: Option<String>,
    /// An inline dockerfile to build the image from, if any.
    pub inline_dockerfile: Option<String>,
    /// Environment variables passed through to the command.
    pub env: HashMap<String, String>,
}

/// A request to run one rendered task command.
#[derive(Debug)]
pub struct TaskSpawnRequest {
    /// The path of the rendered command file.
    pub command: PathBuf,
    /// The working directory, mounted read-write in the container.
    pub work_dir: PathBuf,
    /// The file receiving the command's standard output.
    pub stdout: PathBuf,
    /// The file receiving the command's standard error.
    pub stderr: PathBuf,
    /// Read-only input mounts.
    pub mounts: Vec<Mount>,
    /// The requested resources.
    pub resources: TaskResources,
}

/// Marker error a backend returns when a failure was an interruption
/// (e.g. a preempted instance) rather than a command failure.
///
/// The task runtime retries interruptions against the `preemptible` budget
/// instead of `maxRetries`.
#[derive(Debug)]
pub struct Interrupted(pub String);

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task execution was interrupted: {0}", self.0)
    }
}

impl std::error::Error for Interrupted {}

/// The contract between the engine and a task execution backend.
pub trait TaskExecutionBackend: Send + Sync {
    /// Gets the maximum number of tasks the backend can run concurrently.
    fn max_concurrency(&self) -> usize;

    /// Gets the directory tasks see as their working directory root, when
    /// execution happens inside a container.
    ///
    /// Returns `None` when tasks run directly against host paths.
    fn container_root(&self) -> Option<&Path>;

    /// Ensures the given container image is available, pulling it if
    /// necessary.
    fn prepare_image(&self, image: &str) -> Result<()>;

    /// Builds an image from an inline dockerfile, returning its tag.
    ///
    /// The tag is derived from the dockerfile digest so repeated builds are
    /// cheap.
    fn build_image(&self, dockerfile: &str, tag: &str) -> Result<String>;

    /// Spawns a task.
    ///
    /// Returns a receiver signalled when the task has started, and one
    /// receiving the command's exit status. Cancelling the token stops the
    /// task (a stop request with a bounded grace period, then a kill).
    #[allow(clippy::type_complexity)]
    fn spawn(
        &self,
        request: TaskSpawnRequest,
        token: CancellationToken,
    ) -> Result<(oneshot::Receiver<()>, oneshot::Receiver<Result<i32>>)>;
}
