use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::{models::Container, PodshimError, PodshimResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// In-memory index of containers by ID.
#[derive(Debug, Default)]
pub struct ContainerStore {
    containers: RwLock<HashMap<String, Arc<Container>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a container. Fails if the ID is already taken.
    pub async fn add(&self, container: Arc<Container>) -> PodshimResult<()> {
        let mut containers = self.containers.write().await;
        if containers.contains_key(container.id()) {
            return Err(PodshimError::InvalidConfig(format!(
                "container {:?} already exists",
                container.id()
            )));
        }

        containers.insert(container.id().to_string(), container);
        Ok(())
    }

    /// Looks up a container by its full ID.
    pub async fn get(&self, id: &str) -> PodshimResult<Arc<Container>> {
        self.containers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PodshimError::ContainerNotFound(id.to_string()))
    }

    /// A snapshot of all containers, in no particular order.
    pub async fn list(&self) -> Vec<Arc<Container>> {
        self.containers.read().await.values().cloned().collect()
    }
}
