//! A task runtime backed by host processes.
//!
//! Tasks are registered by container ID and PID. Exits are detected by polling: children of this
//! process are reaped with `waitpid(WNOHANG)` so their real exit status is reported, other
//! processes are probed with signal 0 and report [`UNKNOWN_EXIT_CODE`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use nix::{
    errno::Errno,
    sys::{
        signal::{self, Signal},
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    runtime::{ExitReceiver, Task, TaskExitStatus, TaskService, UNKNOWN_EXIT_CODE},
    PodshimError, PodshimResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How often a waiting task checks whether its process has exited.
pub const DEFAULT_EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Registry of container processes running on this host.
#[derive(Debug, Clone)]
pub struct ProcessTaskService {
    tasks: Arc<RwLock<HashMap<String, u32>>>,
    poll_interval: Duration,
}

/// A registered host process.
#[derive(Debug)]
pub struct ProcessTask {
    id: String,
    pid: u32,
    tasks: Arc<RwLock<HashMap<String, u32>>>,
    poll_interval: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProcessTaskService {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_EXIT_POLL_INTERVAL)
    }

    /// Creates an empty registry whose tasks poll for exits every `poll_interval`.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            poll_interval,
        }
    }

    /// Registers `pid` as the task of container `id`. A pid of 0 is ignored.
    pub async fn register(&self, id: impl Into<String>, pid: u32) {
        if pid == 0 {
            return;
        }

        let id = id.into();
        tracing::debug!("registered task {} with pid {}", id, pid);
        self.tasks.write().await.insert(id, pid);
    }
}

impl ProcessTask {
    fn nix_pid(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for ProcessTaskService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskService for ProcessTaskService {
    async fn task(&self, container_id: &str) -> PodshimResult<Arc<dyn Task>> {
        let pid = self
            .tasks
            .read()
            .await
            .get(container_id)
            .copied()
            .ok_or_else(|| PodshimError::TaskNotFound(container_id.to_string()))?;

        if !process_exists(pid) {
            tracing::debug!("process {} of task {} is gone", pid, container_id);
            return Err(PodshimError::TaskNotFound(container_id.to_string()));
        }

        Ok(Arc::new(ProcessTask {
            id: container_id.to_string(),
            pid,
            tasks: self.tasks.clone(),
            poll_interval: self.poll_interval,
        }))
    }
}

#[async_trait]
impl Task for ProcessTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    async fn kill(&self, signal: Signal) -> PodshimResult<()> {
        match signal::kill(self.nix_pid(), signal) {
            Ok(()) => {
                tracing::debug!("sent {} to task {} (pid {})", signal, self.id, self.pid);
                Ok(())
            }
            Err(Errno::ESRCH) => Err(PodshimError::TaskNotFound(self.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait(&self, ctx: CancellationToken) -> PodshimResult<ExitReceiver> {
        if !process_exists(self.pid) {
            return Err(PodshimError::TaskNotFound(self.id.clone()));
        }

        let (mut tx, rx) = oneshot::channel();
        let pid = self.pid;
        let mut ticker = tokio::time::interval(self.poll_interval);

        tokio::spawn(async move {
            loop {
                let exited = tokio::select! {
                    _ = ctx.cancelled() => return,
                    _ = tx.closed() => return,
                    _ = ticker.tick() => poll_exit(pid),
                };

                if let Some(code) = exited {
                    let _ = tx.send(TaskExitStatus::new(code));
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn delete(&self) -> PodshimResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get(&self.id) {
            Some(pid) if *pid == self.pid => {
                tasks.remove(&self.id);
                tracing::debug!("deleted task {}", self.id);
                Ok(())
            }
            _ => Err(PodshimError::TaskNotFound(self.id.clone())),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Whether a process with `pid` exists. Zombies count as existing.
fn process_exists(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Returns the exit code of `pid` if it has exited.
fn poll_exit(pid: u32) -> Option<u32> {
    match waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, code)) => Some(code as u32),
        Ok(WaitStatus::Signaled(_, signal, _)) => Some(128 + signal as i32 as u32),
        Ok(_) => None,
        Err(Errno::ECHILD) => (!process_exists(pid)).then_some(UNKNOWN_EXIT_CODE),
        Err(e) => {
            tracing::warn!("failed to poll process {}: {}", pid, e);
            None
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::process::Command;

    use serial_test::serial;

    use super::*;

    fn spawn_sleeper() -> u32 {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        child.id()
    }

    #[tokio::test]
    async fn test_unregistered_task_is_not_found() {
        let service = ProcessTaskService::new();
        let err = service.task("missing").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    #[serial]
    async fn test_kill_reports_signalled_exit() -> PodshimResult<()> {
        let service = ProcessTaskService::with_poll_interval(Duration::from_millis(10));
        let pid = spawn_sleeper();
        service.register("c1", pid).await;

        let task = service.task("c1").await?;
        assert_eq!(task.pid(), pid);

        let exit_rx = task.wait(CancellationToken::new()).await?;
        task.kill(Signal::SIGKILL).await?;

        let status = tokio::time::timeout(Duration::from_secs(5), exit_rx)
            .await
            .expect("process should exit")
            .expect("exit should be delivered");
        assert_eq!(status.code, 128 + Signal::SIGKILL as i32 as u32);

        // Reaped, so the task is gone now.
        assert!(task.kill(Signal::SIGKILL).await.unwrap_err().is_not_found());
        task.delete().await?;
        assert!(service.task("c1").await.err().unwrap().is_not_found());
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_cancelled_wait_closes_without_exit() -> PodshimResult<()> {
        let service = ProcessTaskService::with_poll_interval(Duration::from_millis(10));
        let pid = spawn_sleeper();
        service.register("c2", pid).await;
        let task = service.task("c2").await?;

        let ctx = CancellationToken::new();
        let exit_rx = task.wait(ctx.clone()).await?;
        ctx.cancel();

        assert!(exit_rx.await.is_err());

        task.kill(Signal::SIGKILL).await?;
        Ok(())
    }
}
