//! The pod sandbox record and its lifecycle state machine.
//!
//! A sandbox moves between three states:
//!
//! ```text
//!   Ready ─────────────► NotReady
//!     │  ▲                  ▲
//!     ▼  │                  │
//!   Unknown ────────────────┘
//! ```
//!
//! `NotReady` is terminal. The move into it happens at most once per sandbox and is always
//! followed by firing the sandbox's [`StopSignal`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};

use crate::{
    config::PodSandboxConfig, models::NetworkNamespace, runtime::TaskExit, PodshimError,
    PodshimResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SandboxState {
    /// The infra process is running and the namespace is attached.
    Ready,

    /// The infra process has exited and cleanup is done.
    NotReady,

    /// The last state was never durably observed, e.g. after a crash.
    Unknown,
}

/// Mutable status of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStatus {
    /// Current lifecycle state.
    pub state: SandboxState,

    /// PID of the infra process, 0 once it has exited.
    pub pid: u32,

    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,

    /// When the infra process exited.
    #[serde(default)]
    pub exited_at: Option<DateTime<Utc>>,

    /// Exit status of the infra process.
    #[serde(default)]
    pub exit_status: Option<u32>,
}

/// A one-shot signal that any number of waiters can observe.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

/// A pod sandbox.
pub struct Sandbox {
    id: String,
    name: String,
    config: PodSandboxConfig,
    status: RwLock<SandboxStatus>,
    netns: Mutex<Option<Box<dyn NetworkNamespace>>>,
    stopped: StopSignal,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        matches!(
            (self, next),
            (SandboxState::Ready, SandboxState::NotReady)
                | (SandboxState::Ready, SandboxState::Unknown)
                | (SandboxState::Unknown, SandboxState::NotReady)
                | (SandboxState::Unknown, SandboxState::Ready)
        )
    }
}

impl SandboxStatus {
    /// A fresh status in `state`.
    pub fn new(state: SandboxState, pid: u32) -> Self {
        Self {
            state,
            pid,
            created_at: Utc::now(),
            exited_at: None,
            exit_status: None,
        }
    }
}

impl StopSignal {
    /// Creates an unfired signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Fires the signal. Returns `false` if it had already fired.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired, immediately if it already has.
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once the value is true.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Sandbox {
    /// Creates a sandbox record. A sandbox created already `NotReady` has its stop signal fired.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        config: PodSandboxConfig,
        status: SandboxStatus,
        netns: Option<Box<dyn NetworkNamespace>>,
    ) -> Self {
        let stopped = StopSignal::new();
        if status.state == SandboxState::NotReady {
            stopped.fire();
        }

        Self {
            id: id.into(),
            name: name.into(),
            config,
            status: RwLock::new(status),
            netns: Mutex::new(netns),
            stopped,
        }
    }

    /// The full sandbox ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The sandbox name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared configuration.
    pub fn config(&self) -> &PodSandboxConfig {
        &self.config
    }

    /// A snapshot of the current status.
    pub async fn status(&self) -> SandboxStatus {
        self.status.read().await.clone()
    }

    /// The current lifecycle state.
    pub async fn state(&self) -> SandboxState {
        self.status.read().await.state
    }

    /// Moves the sandbox to `next` if the state machine allows it.
    ///
    /// Moving to `NotReady` must go through [`Sandbox::mark_not_ready`] so that the stop signal
    /// fires with it.
    pub async fn transition_to(&self, next: SandboxState) -> PodshimResult<()> {
        if next == SandboxState::NotReady {
            return Err(PodshimError::InvalidTransition {
                from: self.state().await,
                to: next,
            });
        }

        let mut status = self.status.write().await;
        if !status.state.can_transition_to(next) {
            return Err(PodshimError::InvalidTransition {
                from: status.state,
                to: next,
            });
        }

        tracing::debug!("sandbox {} moved from {} to {}", self.id, status.state, next);
        status.state = next;
        Ok(())
    }

    /// Records the exit of the infra process and moves the sandbox to `NotReady`, then fires the
    /// stop signal.
    ///
    /// Returns `false` without touching anything if the sandbox is already `NotReady`.
    pub async fn mark_not_ready(&self, exit: &TaskExit) -> bool {
        {
            let mut status = self.status.write().await;
            if !status.state.can_transition_to(SandboxState::NotReady) {
                return false;
            }

            tracing::info!(
                "sandbox {} moved from {} to {} (exit status {})",
                self.id,
                status.state,
                SandboxState::NotReady,
                exit.exit_status
            );
            status.state = SandboxState::NotReady;
            status.pid = 0;
            status.exited_at = Some(exit.exited_at);
            status.exit_status = Some(exit.exit_status);
        }

        self.stopped.fire();
        true
    }

    /// The one-shot signal that fires once the sandbox is `NotReady`.
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stopped
    }

    /// Resolves once the sandbox has stopped.
    pub async fn stopped(&self) {
        self.stopped.fired().await
    }

    /// Locks the network namespace slot. `None` means the namespace was never created or has
    /// already been removed.
    pub async fn netns(&self) -> MutexGuard<'_, Option<Box<dyn NetworkNamespace>>> {
        self.netns.lock().await
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxState::Ready => write!(f, "SANDBOX_READY"),
            SandboxState::NotReady => write!(f, "SANDBOX_NOTREADY"),
            SandboxState::Unknown => write!(f, "SANDBOX_UNKNOWN"),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stopped", &self.stopped.is_fired())
            .finish_non_exhaustive()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::UNKNOWN_EXIT_CODE;

    fn sandbox(state: SandboxState) -> Sandbox {
        Sandbox::new(
            "sb-1",
            "web",
            PodSandboxConfig::default(),
            SandboxStatus::new(state, 42),
            None,
        )
    }

    fn exit() -> TaskExit {
        TaskExit::new("sb-1", 42, UNKNOWN_EXIT_CODE)
    }

    #[test]
    fn test_transition_table() {
        use SandboxState::*;

        assert!(Ready.can_transition_to(NotReady));
        assert!(Unknown.can_transition_to(NotReady));
        assert!(Unknown.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Unknown));
        assert!(!NotReady.can_transition_to(Ready));
        assert!(!NotReady.can_transition_to(Unknown));
        assert!(!NotReady.can_transition_to(NotReady));
        assert!(!Ready.can_transition_to(Ready));
    }

    #[tokio::test]
    async fn test_mark_not_ready_happens_once() {
        let sandbox = sandbox(SandboxState::Ready);
        assert!(!sandbox.stop_signal().is_fired());

        assert!(sandbox.mark_not_ready(&exit()).await);
        assert!(sandbox.stop_signal().is_fired());

        let status = sandbox.status().await;
        assert_eq!(status.state, SandboxState::NotReady);
        assert_eq!(status.pid, 0);
        assert_eq!(status.exit_status, Some(UNKNOWN_EXIT_CODE));

        assert!(!sandbox.mark_not_ready(&exit()).await);
    }

    #[tokio::test]
    async fn test_not_ready_cannot_be_left() {
        let sandbox = sandbox(SandboxState::NotReady);
        assert!(sandbox.stop_signal().is_fired());

        assert!(matches!(
            sandbox.transition_to(SandboxState::Ready).await,
            Err(PodshimError::InvalidTransition { .. })
        ));
        assert!(sandbox.transition_to(SandboxState::NotReady).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_every_waiter() {
        let sandbox = std::sync::Arc::new(sandbox(SandboxState::Unknown));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let sandbox = sandbox.clone();
                tokio::spawn(async move { sandbox.stopped().await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(sandbox.mark_not_ready(&exit()).await);

        for waiter in waiters {
            waiter.await.unwrap();
        }

        // Already fired, resolves immediately.
        sandbox.stopped().await;
        assert!(!sandbox.stop_signal().fire());
    }
}
