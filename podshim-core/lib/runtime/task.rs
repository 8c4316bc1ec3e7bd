use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::PodshimResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Exit status recorded when the real one cannot be known, e.g. for a process that exited while
/// nobody was watching. Its value carries no meaning beyond being distinguishable from the exit
/// codes processes report.
pub const UNKNOWN_EXIT_CODE: u32 = 255;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Receives a task's exit status. Closes without a value if the wait was cancelled.
pub type ExitReceiver = oneshot::Receiver<TaskExitStatus>;

/// How and when a task exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskExitStatus {
    /// The exit code, `128 + signal` for a signalled process.
    pub code: u32,

    /// When the exit was observed.
    pub exited_at: DateTime<Utc>,
}

/// A task exit event, as delivered to exit handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    /// The container the task belongs to.
    pub container_id: String,

    /// The task ID.
    pub id: String,

    /// The task's PID, 0 when unknown.
    pub pid: u32,

    /// The exit status.
    pub exit_status: u32,

    /// When the task exited.
    pub exited_at: DateTime<Utc>,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The OS process behind a container.
#[async_trait]
pub trait Task: Send + Sync {
    /// The container ID the task belongs to.
    fn id(&self) -> &str;

    /// PID of the process.
    fn pid(&self) -> u32;

    /// Sends `signal` to the process. Fails with a not-found error if the process is gone.
    async fn kill(&self, signal: Signal) -> PodshimResult<()>;

    /// Subscribes to the task's exit. The subscription lasts until `ctx` is cancelled.
    async fn wait(&self, ctx: CancellationToken) -> PodshimResult<ExitReceiver>;

    /// Releases the runtime's resources for an exited task.
    async fn delete(&self) -> PodshimResult<()>;
}

/// Looks up the task behind a container.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Returns the task of `container_id`, or a not-found error if it has none.
    async fn task(&self, container_id: &str) -> PodshimResult<Arc<dyn Task>>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TaskExitStatus {
    /// An exit with `code` observed now.
    pub fn new(code: u32) -> Self {
        Self {
            code,
            exited_at: Utc::now(),
        }
    }
}

impl TaskExit {
    /// An exit event for the task of container `id`, timestamped now.
    pub fn new(id: impl Into<String>, pid: u32, exit_status: u32) -> Self {
        let id = id.into();
        Self {
            container_id: id.clone(),
            id,
            pid,
            exit_status,
            exited_at: Utc::now(),
        }
    }

    /// An exit event built from a status received on an [`ExitReceiver`].
    pub fn from_status(id: impl Into<String>, pid: u32, status: TaskExitStatus) -> Self {
        Self {
            exited_at: status.exited_at,
            ..Self::new(id, pid, status.code)
        }
    }
}
