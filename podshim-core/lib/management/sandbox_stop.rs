//! Pod sandbox teardown.
//!
//! [`PodSandboxService::stop_pod_sandbox`] runs the teardown as a fixed sequence of steps and
//! stops at the first one that fails. Every step checks what is already done before acting, so
//! a failed call can simply be retried:
//!
//! 1. force-stop every container whose sandbox is this one
//! 2. release the sandbox's mounts
//! 3. stop the infra container, unless the sandbox is already `NotReady`
//! 4. tear down the pod network and remove the namespace, if the sandbox still owns one
//!
//! A sandbox found `Unknown` has nobody watching its infra task. If the task is gone, its exit
//! is reconstructed and fed to the same [`ExitHandler`] live exits go through. If it is still
//! alive, an exit subscription is set up before the kill so the exit cannot be missed.

use std::{sync::Arc, time::Duration};

use nix::sys::signal::Signal;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{PodSandboxConfig, RuntimeConfig},
    management::{unmount_sandbox_files, ContainerStopper, Mounter, SystemMounter, TaskContainerStopper},
    models::{Sandbox, SandboxState},
    network::{cni_port_mappings, pod_network_labels, NetworkPlugin},
    runtime::{ExitHandler, ExitMonitor, Task, TaskExit, TaskService, UNKNOWN_EXIT_CODE},
    store::{ContainerStore, SandboxStore},
    PodshimError, PodshimResult, StopStep,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Stops pod sandboxes.
pub struct PodSandboxService {
    config: RuntimeConfig,
    sandbox_store: Arc<SandboxStore>,
    container_store: Arc<ContainerStore>,
    task_service: Arc<dyn TaskService>,
    container_stopper: Arc<dyn ContainerStopper>,
    exit_handler: Arc<ExitHandler>,
    exit_monitor: ExitMonitor,
    network_plugin: Option<Arc<dyn NetworkPlugin>>,
    mounter: Arc<dyn Mounter>,
    monitors: CancellationToken,
}

/// An exit subscription on an infra task that nobody else is watching.
///
/// Must be released with [`ExitSubscription::release`]. Dropping it cancels both contexts but
/// cannot wait for the monitor to finish.
struct ExitSubscription {
    wait_ctx: CancellationToken,
    exit_ctx: CancellationToken,
    monitor_done: oneshot::Receiver<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PodSandboxService {
    /// Creates a service over the given registries and task runtime.
    ///
    /// Containers are stopped through their tasks and no network plugin is configured.
    pub fn new(
        config: RuntimeConfig,
        sandbox_store: Arc<SandboxStore>,
        container_store: Arc<ContainerStore>,
        task_service: Arc<dyn TaskService>,
    ) -> Self {
        let exit_handler = Arc::new(ExitHandler::new(task_service.clone()));
        let exit_monitor = ExitMonitor::new(sandbox_store.clone(), exit_handler.clone());
        let container_stopper = Arc::new(TaskContainerStopper::new(
            task_service.clone(),
            config.kill_container_timeout(),
        ));

        Self {
            config,
            sandbox_store,
            container_store,
            task_service,
            container_stopper,
            exit_handler,
            exit_monitor,
            network_plugin: None,
            mounter: Arc::new(SystemMounter),
            monitors: CancellationToken::new(),
        }
    }

    /// Sets the plugin used to tear down pod networks.
    pub fn with_network_plugin(mut self, network_plugin: Arc<dyn NetworkPlugin>) -> Self {
        self.network_plugin = Some(network_plugin);
        self
    }

    /// Sets how member containers are stopped.
    pub fn with_container_stopper(mut self, container_stopper: Arc<dyn ContainerStopper>) -> Self {
        self.container_stopper = container_stopper;
        self
    }

    /// Sets how sandbox mounts are released.
    pub fn with_mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounter = mounter;
        self
    }

    /// The sandbox registry.
    pub fn sandbox_store(&self) -> &Arc<SandboxStore> {
        &self.sandbox_store
    }

    /// The container registry.
    pub fn container_store(&self) -> &Arc<ContainerStore> {
        &self.container_store
    }

    /// Stops the pod sandbox `id`, which may be a unique prefix of the full ID.
    ///
    /// Succeeds without side effects for a sandbox that is already fully stopped. On failure the
    /// error names the step that failed and the registry is left as it was for a retry.
    pub async fn stop_pod_sandbox(&self, ctx: &CancellationToken, id: &str) -> PodshimResult<()> {
        let sandbox = self
            .sandbox_store
            .get(id)
            .await
            .map_err(|e| e.in_step(id, StopStep::Lookup))?;
        let id = sandbox.id();
        tracing::info!("stopping pod sandbox {}", id);

        for container in self.container_store.list().await {
            if container.sandbox_id() != id {
                continue;
            }

            tracing::info!("force stopping container {} of sandbox {}", container.id(), id);
            self.container_stopper
                .stop_container(ctx, &container, Duration::ZERO)
                .await
                .map_err(|e| e.in_step(id, StopStep::StopContainer(container.id().to_string())))?;
        }

        unmount_sandbox_files(self.mounter.as_ref(), &self.config, id, sandbox.config())
            .map_err(|e| e.in_step(id, StopStep::UnmountFiles))?;

        let state = sandbox.state().await;
        if matches!(state, SandboxState::Ready | SandboxState::Unknown) {
            self.stop_sandbox_container(ctx, &sandbox)
                .await
                .map_err(|e| e.in_step(id, StopStep::StopInfraContainer(state)))?;
        }

        let mut netns_slot = sandbox.netns().await;
        if let Some(netns) = netns_slot.as_mut() {
            let closed = netns
                .closed()
                .map_err(|e| e.in_step(id, StopStep::CheckNetNsClosed))?;
            let netns_path = if closed {
                String::new()
            } else {
                netns.path().to_string_lossy().into_owned()
            };

            self.teardown_pod(id, &netns_path, sandbox.config())
                .await
                .map_err(|e| e.in_step(id, StopStep::TeardownNetwork))?;
            tracing::info!("tear down network for sandbox {} successfully", id);

            netns
                .remove()
                .map_err(|e| e.in_step(id, StopStep::RemoveNetNs))?;
            *netns_slot = None;
        }

        tracing::info!("stopped pod sandbox {}", id);
        Ok(())
    }

    /// Stops the infra container of a `Ready` or `Unknown` sandbox and waits for the sandbox to
    /// report that it stopped.
    pub async fn stop_sandbox_container(
        &self,
        ctx: &CancellationToken,
        sandbox: &Sandbox,
    ) -> PodshimResult<()> {
        let id = sandbox.id();
        let state = sandbox.state().await;

        let task = match self.task_service.task(id).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                if state == SandboxState::Unknown {
                    return self.cleanup_unknown_sandbox(sandbox).await;
                }

                tracing::debug!("task of sandbox {} is already gone", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let subscription = if state == SandboxState::Unknown {
            match self.subscribe_exit(id, task.as_ref()).await {
                Ok(subscription) => Some(subscription),
                Err(e) if e.is_not_found() => return self.cleanup_unknown_sandbox(sandbox).await,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let result = self.kill_and_wait(ctx, sandbox, task.as_ref()).await;
        if let Some(mut subscription) = subscription {
            subscription.release().await;
        }

        result
    }

    /// Converges an `Unknown` sandbox whose task is gone, as if its exit had been observed.
    pub async fn cleanup_unknown_sandbox(&self, sandbox: &Sandbox) -> PodshimResult<()> {
        tracing::info!(
            "sandbox {} is in unknown state and has no task, reconciling its exit",
            sandbox.id()
        );

        let exit = TaskExit::new(sandbox.id(), 0, UNKNOWN_EXIT_CODE);
        self.exit_handler.handle_sandbox_exit(&exit, sandbox).await
    }

    /// Removes the pod network of sandbox `id`. An empty `netns_path` tells the plugin the
    /// namespace is already gone.
    pub async fn teardown_pod(
        &self,
        id: &str,
        netns_path: &str,
        config: &PodSandboxConfig,
    ) -> PodshimResult<()> {
        let plugin = self
            .network_plugin
            .as_ref()
            .ok_or(PodshimError::NetworkPluginNotConfigured)?;

        let labels = pod_network_labels(id, config);
        let port_mappings = cni_port_mappings(config);
        plugin.remove(id, netns_path, &labels, &port_mappings).await
    }

    /// Re-attaches exit monitors after a restart.
    ///
    /// Every `Ready` sandbox gets a background monitor on its live task. A `Ready` sandbox whose
    /// task cannot be watched is moved to `Unknown` so the next stop reconciles it.
    pub async fn recover(&self) -> PodshimResult<()> {
        for sandbox in self.sandbox_store.list().await {
            if sandbox.state().await != SandboxState::Ready {
                continue;
            }

            let id = sandbox.id();
            let monitor_ctx = self.monitors.child_token();
            let watched = match self.task_service.task(id).await {
                Ok(task) => task
                    .wait(monitor_ctx.clone())
                    .await
                    .map(|exit_rx| (task.pid(), exit_rx)),
                Err(e) => Err(e),
            };

            match watched {
                Ok((pid, exit_rx)) => {
                    tracing::debug!("watching infra task of sandbox {} (pid {})", id, pid);
                    // Runs until the task exits or the service shuts down.
                    let _ = self.exit_monitor.start_exit_monitor(monitor_ctx, id, pid, exit_rx);
                }
                Err(e) => {
                    if e.is_not_found() {
                        tracing::info!("infra task of sandbox {} exited unobserved", id);
                    } else {
                        tracing::warn!("failed to watch infra task of sandbox {}: {}", id, e);
                    }
                    sandbox.transition_to(SandboxState::Unknown).await?;
                }
            }
        }

        Ok(())
    }

    /// Stops the background exit monitors started by [`PodSandboxService::recover`].
    pub fn shutdown(&self) {
        self.monitors.cancel();
    }

    async fn subscribe_exit(&self, id: &str, task: &dyn Task) -> PodshimResult<ExitSubscription> {
        let wait_ctx = CancellationToken::new();
        let exit_rx = task.wait(wait_ctx.clone()).await?;

        let exit_ctx = CancellationToken::new();
        let monitor_done =
            self.exit_monitor
                .start_exit_monitor(exit_ctx.clone(), id, task.pid(), exit_rx);

        tracing::debug!("subscribed to exit of sandbox {} (pid {})", id, task.pid());
        Ok(ExitSubscription {
            wait_ctx,
            exit_ctx,
            monitor_done,
        })
    }

    async fn kill_and_wait(
        &self,
        ctx: &CancellationToken,
        sandbox: &Sandbox,
        task: &dyn Task,
    ) -> PodshimResult<()> {
        match task.kill(Signal::SIGKILL).await {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }

        wait_sandbox_stop(ctx, sandbox, self.config.kill_container_timeout()).await
    }
}

impl ExitSubscription {
    /// Cancels the monitor, waits for it to finish, then cancels the exit stream.
    async fn release(&mut self) {
        self.exit_ctx.cancel();
        let _ = (&mut self.monitor_done).await;
        self.wait_ctx.cancel();
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for ExitSubscription {
    fn drop(&mut self) {
        self.exit_ctx.cancel();
        self.wait_ctx.cancel();
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Waits until `sandbox` has stopped, `ctx` is cancelled or `timeout` has passed.
///
/// If more than one is ready at once, a stopped sandbox wins over cancellation, and cancellation
/// wins over the timeout.
pub async fn wait_sandbox_stop(
    ctx: &CancellationToken,
    sandbox: &Sandbox,
    timeout: Duration,
) -> PodshimResult<()> {
    let timer = tokio::time::sleep(timeout);

    tokio::select! {
        biased;
        _ = sandbox.stopped() => Ok(()),
        _ = ctx.cancelled() => Err(PodshimError::Cancelled {
            id: sandbox.id().to_string(),
        }),
        _ = timer => Err(PodshimError::Timeout {
            id: sandbox.id().to_string(),
            timeout,
        }),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SandboxStatus;

    fn sandbox() -> Arc<Sandbox> {
        Arc::new(Sandbox::new(
            "sb-1",
            "web",
            PodSandboxConfig::default(),
            SandboxStatus::new(SandboxState::Ready, 42),
            None,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let sandbox = sandbox();
        let err = wait_sandbox_stop(&CancellationToken::new(), &sandbox, Duration::from_secs(3))
            .await
            .unwrap_err();

        match err {
            PodshimError::Timeout { id, timeout } => {
                assert_eq!(id, "sb-1");
                assert_eq!(timeout, Duration::from_secs(3));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_once_stopped() -> PodshimResult<()> {
        let sandbox = sandbox();
        let stopper = sandbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper
                .mark_not_ready(&TaskExit::new("sb-1", 42, 0))
                .await;
        });

        let started = tokio::time::Instant::now();
        wait_sandbox_stop(&CancellationToken::new(), &sandbox, Duration::from_secs(60)).await?;
        assert!(started.elapsed() < Duration::from_secs(60));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reports_cancellation() {
        let sandbox = sandbox();
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = wait_sandbox_stop(&ctx, &sandbox, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, PodshimError::Cancelled { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_stopped_wins_over_cancelled() -> PodshimResult<()> {
        let sandbox = sandbox();
        sandbox.mark_not_ready(&TaskExit::new("sb-1", 42, 0)).await;

        let ctx = CancellationToken::new();
        ctx.cancel();
        wait_sandbox_stop(&ctx, &sandbox, Duration::ZERO).await
    }

    #[tokio::test]
    async fn test_release_waits_for_monitor_before_cancelling_wait() {
        let wait_ctx = CancellationToken::new();
        let exit_ctx = CancellationToken::new();
        let (done_tx, monitor_done) = oneshot::channel();

        let monitor = {
            let wait_ctx = wait_ctx.clone();
            let exit_ctx = exit_ctx.clone();
            tokio::spawn(async move {
                let _done = done_tx;
                exit_ctx.cancelled().await;
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                }
                wait_ctx.is_cancelled()
            })
        };

        let mut subscription = ExitSubscription {
            wait_ctx: wait_ctx.clone(),
            exit_ctx,
            monitor_done,
        };
        subscription.release().await;

        assert!(wait_ctx.is_cancelled());
        assert!(!monitor.await.unwrap(), "wait was cancelled while the monitor ran");
    }
}
