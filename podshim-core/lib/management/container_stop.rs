//! Forced stop of a sandbox's member containers.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use nix::sys::signal::Signal;
use tokio_util::sync::CancellationToken;

use crate::{
    models::{Container, ContainerState},
    runtime::{ExitReceiver, Task, TaskExitStatus, TaskService, UNKNOWN_EXIT_CODE},
    PodshimError, PodshimResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Stops a single container.
#[async_trait]
pub trait ContainerStopper: Send + Sync {
    /// Stops `container`, giving it `grace` to exit after `SIGTERM` before it is killed.
    ///
    /// A zero `grace` kills the container right away. Stopping a container that is not running
    /// succeeds without doing anything.
    async fn stop_container(
        &self,
        ctx: &CancellationToken,
        container: &Container,
        grace: Duration,
    ) -> PodshimResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Stops containers by signalling their tasks.
pub struct TaskContainerStopper {
    task_service: Arc<dyn TaskService>,
    kill_timeout: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TaskContainerStopper {
    /// Creates a stopper that waits at most `kill_timeout` for a killed task to exit.
    pub fn new(task_service: Arc<dyn TaskService>, kill_timeout: Duration) -> Self {
        Self {
            task_service,
            kill_timeout,
        }
    }

    async fn finish(
        &self,
        container: &Container,
        task: &dyn Task,
        status: TaskExitStatus,
    ) -> PodshimResult<()> {
        if container.mark_exited(status.code, status.exited_at).await {
            tracing::info!(
                "container {} exited with status {}",
                container.id(),
                status.code
            );
        }

        match task.delete().await {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    /// Waits up to `limit` for the task's exit. Returns `None` when the limit passes first.
    ///
    /// The exit stream closing without a status is never read as an exit.
    async fn wait_exit(
        ctx: &CancellationToken,
        container: &Container,
        exit_rx: &mut ExitReceiver,
        limit: Duration,
    ) -> PodshimResult<Option<TaskExitStatus>> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(PodshimError::Cancelled {
                id: container.id().to_string(),
            }),
            result = tokio::time::timeout(limit, exit_rx) => match result {
                Ok(Ok(status)) => Ok(Some(status)),
                Ok(Err(_)) if ctx.is_cancelled() => Err(PodshimError::Cancelled {
                    id: container.id().to_string(),
                }),
                Ok(Err(_)) => Err(PodshimError::Runtime(format!(
                    "exit stream of container {} closed without an exit",
                    container.id()
                ))),
                Err(_) => Ok(None),
            },
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ContainerStopper for TaskContainerStopper {
    async fn stop_container(
        &self,
        ctx: &CancellationToken,
        container: &Container,
        grace: Duration,
    ) -> PodshimResult<()> {
        let state = container.state().await;
        if !matches!(state, ContainerState::Running | ContainerState::Unknown) {
            tracing::debug!("container {} is {:?}, nothing to stop", container.id(), state);
            return Ok(());
        }

        let task = match self.task_service.task(container.id()).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                container.mark_exited(UNKNOWN_EXIT_CODE, Utc::now()).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let wait_ctx = ctx.child_token();
        let _wait_guard = wait_ctx.clone().drop_guard();
        let mut exit_rx = match task.wait(wait_ctx).await {
            Ok(exit_rx) => exit_rx,
            Err(e) if e.is_not_found() => {
                return self
                    .finish(container, task.as_ref(), TaskExitStatus::new(UNKNOWN_EXIT_CODE))
                    .await;
            }
            Err(e) => return Err(e),
        };

        if !grace.is_zero() {
            tracing::info!("stopping container {} with a {:?} grace period", container.id(), grace);
            match task.kill(Signal::SIGTERM).await {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => {}
            }

            if let Some(status) = Self::wait_exit(ctx, container, &mut exit_rx, grace).await? {
                return self.finish(container, task.as_ref(), status).await;
            }

            tracing::info!("container {} did not exit within its grace period", container.id());
        }

        tracing::info!("killing container {}", container.id());
        match task.kill(Signal::SIGKILL).await {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }

        match Self::wait_exit(ctx, container, &mut exit_rx, self.kill_timeout).await? {
            Some(status) => self.finish(container, task.as_ref(), status).await,
            None => Err(PodshimError::Timeout {
                id: container.id().to_string(),
                timeout: self.kill_timeout,
            }),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::oneshot;

    use super::*;
    use crate::models::ContainerStatus;

    /// A task that exits as soon as it receives a signal in `exits_on`.
    struct ScriptedTask {
        exits_on: Vec<Signal>,
        exit_tx: Mutex<Option<oneshot::Sender<TaskExitStatus>>>,
        exit_rx: Mutex<Option<ExitReceiver>>,
        signals: Mutex<Vec<Signal>>,
        deleted: Mutex<bool>,
    }

    struct OneTask(Arc<ScriptedTask>);

    impl ScriptedTask {
        fn new(exits_on: Vec<Signal>) -> Arc<Self> {
            let (exit_tx, exit_rx) = oneshot::channel();
            Arc::new(Self {
                exits_on,
                exit_tx: Mutex::new(Some(exit_tx)),
                exit_rx: Mutex::new(Some(exit_rx)),
                signals: Mutex::new(Vec::new()),
                deleted: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl Task for ScriptedTask {
        fn id(&self) -> &str {
            "c1"
        }

        fn pid(&self) -> u32 {
            11
        }

        async fn kill(&self, signal: Signal) -> PodshimResult<()> {
            self.signals.lock().unwrap().push(signal);
            if self.exits_on.contains(&signal) {
                if let Some(tx) = self.exit_tx.lock().unwrap().take() {
                    let _ = tx.send(TaskExitStatus::new(128 + signal as i32 as u32));
                }
            }
            Ok(())
        }

        async fn wait(&self, _ctx: CancellationToken) -> PodshimResult<ExitReceiver> {
            self.exit_rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| PodshimError::Runtime("already waited".into()))
        }

        async fn delete(&self) -> PodshimResult<()> {
            *self.deleted.lock().unwrap() = true;
            Ok(())
        }
    }

    #[async_trait]
    impl TaskService for OneTask {
        async fn task(&self, container_id: &str) -> PodshimResult<Arc<dyn Task>> {
            if container_id == "c1" {
                Ok(self.0.clone())
            } else {
                Err(PodshimError::TaskNotFound(container_id.to_string()))
            }
        }
    }

    /// A task that ignores every signal and closes its exit stream once `close` fires.
    struct ClosingTask {
        close: CancellationToken,
        deleted: Mutex<bool>,
    }

    impl ClosingTask {
        /// The stream closes when the wait context is cancelled.
        fn on_wait_cancel() -> Arc<Self> {
            Self::closing_on(CancellationToken::new())
        }

        fn closing_on(close: CancellationToken) -> Arc<Self> {
            Arc::new(Self {
                close,
                deleted: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl Task for ClosingTask {
        fn id(&self) -> &str {
            "c1"
        }

        fn pid(&self) -> u32 {
            11
        }

        async fn kill(&self, _signal: Signal) -> PodshimResult<()> {
            Ok(())
        }

        async fn wait(&self, ctx: CancellationToken) -> PodshimResult<ExitReceiver> {
            let (tx, rx) = oneshot::channel::<TaskExitStatus>();
            let close = self.close.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = ctx.cancelled() => {}
                    _ = close.cancelled() => {}
                }
                drop(tx);
            });
            Ok(rx)
        }

        async fn delete(&self) -> PodshimResult<()> {
            *self.deleted.lock().unwrap() = true;
            Ok(())
        }
    }

    struct ClosingService(Arc<ClosingTask>);

    #[async_trait]
    impl TaskService for ClosingService {
        async fn task(&self, _container_id: &str) -> PodshimResult<Arc<dyn Task>> {
            Ok(self.0.clone())
        }
    }

    fn running(id: &str) -> Container {
        Container::new(id, "sb-1", "app", ContainerStatus::new(ContainerState::Running, 11))
    }

    #[tokio::test]
    async fn test_zero_grace_kills_immediately() -> PodshimResult<()> {
        let task = ScriptedTask::new(vec![Signal::SIGKILL, Signal::SIGTERM]);
        let stopper = TaskContainerStopper::new(Arc::new(OneTask(task.clone())), Duration::from_secs(5));
        let container = running("c1");

        stopper
            .stop_container(&CancellationToken::new(), &container, Duration::ZERO)
            .await?;

        assert_eq!(*task.signals.lock().unwrap(), vec![Signal::SIGKILL]);
        assert!(*task.deleted.lock().unwrap());
        let status = container.status().await;
        assert_eq!(status.state, ContainerState::Exited);
        assert_eq!(status.exit_code, Some(128 + Signal::SIGKILL as i32 as u32));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_escalates_to_kill() -> PodshimResult<()> {
        let task = ScriptedTask::new(vec![Signal::SIGKILL]);
        let stopper = TaskContainerStopper::new(Arc::new(OneTask(task.clone())), Duration::from_secs(5));
        let container = running("c1");

        stopper
            .stop_container(&CancellationToken::new(), &container, Duration::from_secs(10))
            .await?;

        assert_eq!(
            *task.signals.lock().unwrap(),
            vec![Signal::SIGTERM, Signal::SIGKILL]
        );
        assert_eq!(container.state().await, ContainerState::Exited);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_task_times_out() {
        let task = ScriptedTask::new(vec![]);
        let stopper = TaskContainerStopper::new(Arc::new(OneTask(task.clone())), Duration::from_secs(5));
        let container = running("c1");

        let err = stopper
            .stop_container(&CancellationToken::new(), &container, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, PodshimError::Timeout { .. }));
        assert_eq!(container.state().await, ContainerState::Running);
    }

    #[tokio::test]
    async fn test_missing_task_marks_exited() -> PodshimResult<()> {
        let task = ScriptedTask::new(vec![]);
        let stopper = TaskContainerStopper::new(Arc::new(OneTask(task)), Duration::from_secs(5));
        let container = running("c2");

        stopper
            .stop_container(&CancellationToken::new(), &container, Duration::ZERO)
            .await?;

        let status = container.status().await;
        assert_eq!(status.state, ContainerState::Exited);
        assert_eq!(status.exit_code, Some(UNKNOWN_EXIT_CODE));
        Ok(())
    }

    #[tokio::test]
    async fn test_exited_container_is_left_alone() -> PodshimResult<()> {
        let task = ScriptedTask::new(vec![Signal::SIGKILL]);
        let stopper = TaskContainerStopper::new(Arc::new(OneTask(task.clone())), Duration::from_secs(5));
        let container = Container::new(
            "c1",
            "sb-1",
            "app",
            ContainerStatus::new(ContainerState::Exited, 0),
        );

        stopper
            .stop_container(&CancellationToken::new(), &container, Duration::ZERO)
            .await?;
        assert!(task.signals.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_stop_never_reports_an_exit() {
        for _ in 0..50 {
            let task = ClosingTask::on_wait_cancel();
            let stopper =
                TaskContainerStopper::new(Arc::new(ClosingService(task.clone())), Duration::from_secs(5));
            let container = running("c1");
            let ctx = CancellationToken::new();

            let canceller = {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    ctx.cancel();
                })
            };

            let grace = Duration::from_secs(10);
            let err = stopper
                .stop_container(&ctx, &container, grace)
                .await
                .unwrap_err();
            let _ = canceller.await;

            assert!(matches!(err, PodshimError::Cancelled { .. }), "{err:?}");
            assert_eq!(container.state().await, ContainerState::Running);
            assert!(!*task.deleted.lock().unwrap());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_kill_wait_never_reports_an_exit() {
        for _ in 0..50 {
            let task = ClosingTask::on_wait_cancel();
            let stopper =
                TaskContainerStopper::new(Arc::new(ClosingService(task.clone())), Duration::from_secs(5));
            let container = running("c1");
            let ctx = CancellationToken::new();

            let canceller = {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    ctx.cancel();
                })
            };

            let err = stopper
                .stop_container(&ctx, &container, Duration::ZERO)
                .await
                .unwrap_err();
            let _ = canceller.await;

            assert!(matches!(err, PodshimError::Cancelled { .. }), "{err:?}");
            assert_eq!(container.state().await, ContainerState::Running);
            assert!(!*task.deleted.lock().unwrap());
        }
    }

    #[tokio::test]
    async fn test_closed_exit_stream_is_an_error() {
        let close = CancellationToken::new();
        let task = ClosingTask::closing_on(close.clone());
        let stopper =
            TaskContainerStopper::new(Arc::new(ClosingService(task.clone())), Duration::from_secs(5));
        let container = running("c1");
        close.cancel();

        let err = stopper
            .stop_container(&CancellationToken::new(), &container, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, PodshimError::Runtime(_)), "{err:?}");
        assert_eq!(container.state().await, ContainerState::Running);
        assert!(!*task.deleted.lock().unwrap());
    }
}
