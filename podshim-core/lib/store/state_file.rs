//! The persisted registry.
//!
//! Sandboxes and containers are kept in memory while a command runs and snapshotted to a YAML
//! file between runs. The file is replaced atomically, so a crash mid-write leaves the previous
//! snapshot intact.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    config::PodSandboxConfig,
    models::{Container, ContainerStatus, NetNs, NetworkNamespace, Sandbox, SandboxStatus},
    store::{ContainerStore, SandboxStore},
    PodshimResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Snapshot of every sandbox and container record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    /// Sandbox records.
    #[serde(default)]
    pub sandboxes: Vec<SandboxRecord>,

    /// Container records.
    #[serde(default)]
    pub containers: Vec<ContainerRecord>,
}

/// A persisted sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRecord {
    /// Full sandbox ID.
    pub id: String,

    /// Sandbox name.
    #[serde(default)]
    pub name: String,

    /// Declared configuration.
    #[serde(default)]
    pub config: PodSandboxConfig,

    /// Last recorded status.
    pub status: SandboxStatus,

    /// Path of the pinned network namespace, absent once it has been removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netns_path: Option<PathBuf>,
}

/// A persisted container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container ID.
    pub id: String,

    /// ID of the owning sandbox.
    pub sandbox_id: String,

    /// Container name.
    #[serde(default)]
    pub name: String,

    /// Last recorded status.
    pub status: ContainerStatus,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StateFile {
    /// Reads the snapshot at `path`. A missing file is an empty registry.
    pub async fn load(path: impl AsRef<Path>) -> PodshimResult<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            tracing::debug!("no state file at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        let state: StateFile = serde_yaml::from_str(&contents)?;
        tracing::debug!(
            "loaded {} sandboxes and {} containers from {}",
            state.sandboxes.len(),
            state.containers.len(),
            path.display()
        );

        Ok(state)
    }

    /// Writes the snapshot to `path`, replacing any previous one.
    pub async fn save(&self, path: impl AsRef<Path>) -> PodshimResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let contents = serde_yaml::to_string(self)?;
        let tmp_path = path.with_extension("yaml.tmp");
        fs::write(&tmp_path, contents).await?;
        fs::rename(&tmp_path, path).await?;

        tracing::debug!("saved state to {}", path.display());
        Ok(())
    }

    /// Builds the in-memory registries from the snapshot.
    pub async fn into_stores(self) -> PodshimResult<(SandboxStore, ContainerStore)> {
        let sandbox_store = SandboxStore::new();
        for record in self.sandboxes {
            let netns = record
                .netns_path
                .map(|path| Box::new(NetNs::new(path)) as Box<dyn NetworkNamespace>);

            sandbox_store
                .add(Arc::new(Sandbox::new(
                    record.id,
                    record.name,
                    record.config,
                    record.status,
                    netns,
                )))
                .await?;
        }

        let container_store = ContainerStore::new();
        for record in self.containers {
            container_store
                .add(Arc::new(Container::new(
                    record.id,
                    record.sandbox_id,
                    record.name,
                    record.status,
                )))
                .await?;
        }

        Ok((sandbox_store, container_store))
    }

    /// Takes a snapshot of the registries, ordered by ID.
    pub async fn from_stores(sandbox_store: &SandboxStore, container_store: &ContainerStore) -> Self {
        let mut sandboxes = Vec::new();
        for sandbox in sandbox_store.list().await {
            let netns_path = sandbox
                .netns()
                .await
                .as_ref()
                .map(|netns| netns.path().to_path_buf());

            sandboxes.push(SandboxRecord {
                id: sandbox.id().to_string(),
                name: sandbox.name().to_string(),
                config: sandbox.config().clone(),
                status: sandbox.status().await,
                netns_path,
            });
        }
        sandboxes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut containers = Vec::new();
        for container in container_store.list().await {
            containers.push(ContainerRecord {
                id: container.id().to_string(),
                sandbox_id: container.sandbox_id().to_string(),
                name: container.name().to_string(),
                status: container.status().await,
            });
        }
        containers.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            sandboxes,
            containers,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
