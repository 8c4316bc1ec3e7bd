//! Exit-event handling for sandbox infra tasks.
//!
//! Every path that retires a sandbox goes through [`ExitHandler::handle_sandbox_exit`]: exits
//! observed live by an [`ExitMonitor`] and exits reconstructed after a crash alike. It deletes
//! the task and performs the `NotReady` transition, which fires the sandbox's stop signal.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    models::Sandbox,
    runtime::{ExitReceiver, TaskExit, TaskService},
    store::SandboxStore,
    PodshimResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Converges a sandbox to `NotReady` once its infra task has exited.
pub struct ExitHandler {
    task_service: Arc<dyn TaskService>,
}

/// Routes task exits to the [`ExitHandler`].
#[derive(Clone)]
pub struct ExitMonitor {
    sandbox_store: Arc<SandboxStore>,
    handler: Arc<ExitHandler>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExitHandler {
    /// Creates a handler that deletes exited tasks through `task_service`.
    pub fn new(task_service: Arc<dyn TaskService>) -> Self {
        Self { task_service }
    }

    /// Handles the exit of a sandbox's infra task.
    ///
    /// A task that is already gone is fine; the state update still happens. Calling this for a
    /// sandbox that is already `NotReady` does nothing beyond the task cleanup.
    pub async fn handle_sandbox_exit(&self, exit: &TaskExit, sandbox: &Sandbox) -> PodshimResult<()> {
        match self.task_service.task(sandbox.id()).await {
            Ok(task) => {
                if let Err(e) = task.delete().await {
                    if !e.is_not_found() {
                        tracing::error!("failed to delete task of sandbox {}: {}", sandbox.id(), e);
                        return Err(e);
                    }
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::error!("failed to load task for sandbox {}: {}", sandbox.id(), e);
                return Err(e);
            }
        }

        if sandbox.mark_not_ready(exit).await {
            tracing::info!(
                "sandbox {} exited with status {} (pid {})",
                sandbox.id(),
                exit.exit_status,
                exit.pid
            );
        } else {
            tracing::debug!("sandbox {} was already stopped", sandbox.id());
        }

        Ok(())
    }
}

impl ExitMonitor {
    /// Creates a monitor that resolves exit events to sandboxes in `sandbox_store`.
    pub fn new(sandbox_store: Arc<SandboxStore>, handler: Arc<ExitHandler>) -> Self {
        Self {
            sandbox_store,
            handler,
        }
    }

    /// Watches `exit_rx` for the exit of task `id` with `pid`.
    ///
    /// When the exit arrives it is handled as a sandbox exit. Cancelling `ctx` stops the watch
    /// without handling anything. The returned receiver completes once the monitor is done,
    /// whichever way it finished.
    pub fn start_exit_monitor(
        &self,
        ctx: CancellationToken,
        id: &str,
        pid: u32,
        exit_rx: ExitReceiver,
    ) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let monitor = self.clone();
        let id = id.to_string();

        tokio::spawn(async move {
            let _done = done_tx;

            let status = tokio::select! {
                _ = ctx.cancelled() => {
                    tracing::debug!("exit monitor for {} stopped", id);
                    return;
                }
                status = exit_rx => status,
            };

            match status {
                Ok(status) => {
                    tracing::debug!("received exit event for {} (pid {}): {}", id, pid, status.code);
                    monitor.handle_exit(TaskExit::from_status(&id, pid, status)).await;
                }
                Err(_) => tracing::debug!("exit stream for {} closed without an exit", id),
            }
        });

        done_rx
    }

    async fn handle_exit(&self, exit: TaskExit) {
        let sandbox = match self.sandbox_store.get(&exit.id).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                tracing::debug!("no sandbox for exit event of {}: {}", exit.id, e);
                return;
            }
        };

        if let Err(e) = self.handler.handle_sandbox_exit(&exit, &sandbox).await {
            tracing::error!("failed to handle exit event for sandbox {}: {}", exit.id, e);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
