//! The container record. A container only relates to its sandbox through `sandbox_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Created but never started.
    Created,

    /// The container process is running.
    Running,

    /// The container process has exited.
    Exited,

    /// The state was not durably observed.
    Unknown,
}

/// Mutable status of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Current state.
    pub state: ContainerState,

    /// PID of the container process, 0 when not running.
    pub pid: u32,

    /// Exit code, once exited.
    #[serde(default)]
    pub exit_code: Option<u32>,

    /// When the process exited.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// A container belonging to a sandbox.
#[derive(Debug)]
pub struct Container {
    id: String,
    sandbox_id: String,
    name: String,
    status: RwLock<ContainerStatus>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerStatus {
    /// A status in `state` with the given pid.
    pub fn new(state: ContainerState, pid: u32) -> Self {
        Self {
            state,
            pid,
            exit_code: None,
            finished_at: None,
        }
    }
}

impl Container {
    /// Creates a container record.
    pub fn new(
        id: impl Into<String>,
        sandbox_id: impl Into<String>,
        name: impl Into<String>,
        status: ContainerStatus,
    ) -> Self {
        Self {
            id: id.into(),
            sandbox_id: sandbox_id.into(),
            name: name.into(),
            status: RwLock::new(status),
        }
    }

    /// The container ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// ID of the owning sandbox.
    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// The container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A snapshot of the current status.
    pub async fn status(&self) -> ContainerStatus {
        self.status.read().await.clone()
    }

    /// The current state.
    pub async fn state(&self) -> ContainerState {
        self.status.read().await.state
    }

    /// Records the container's exit. Returns `false` if it was already recorded as exited.
    pub async fn mark_exited(&self, exit_code: u32, finished_at: DateTime<Utc>) -> bool {
        let mut status = self.status.write().await;
        if status.state == ContainerState::Exited {
            return false;
        }

        status.state = ContainerState::Exited;
        status.pid = 0;
        status.exit_code = Some(exit_code);
        status.finished_at = Some(finished_at);
        true
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
