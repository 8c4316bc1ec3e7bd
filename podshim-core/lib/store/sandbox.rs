use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::{models::Sandbox, PodshimError, PodshimResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// In-memory index of sandboxes by ID.
#[derive(Debug, Default)]
pub struct SandboxStore {
    sandboxes: RwLock<HashMap<String, Arc<Sandbox>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sandbox. Fails if the ID is already taken.
    pub async fn add(&self, sandbox: Arc<Sandbox>) -> PodshimResult<()> {
        let mut sandboxes = self.sandboxes.write().await;
        if sandboxes.contains_key(sandbox.id()) {
            return Err(PodshimError::InvalidConfig(format!(
                "sandbox {:?} already exists",
                sandbox.id()
            )));
        }

        sandboxes.insert(sandbox.id().to_string(), sandbox);
        Ok(())
    }

    /// Looks up a sandbox by its full ID or by a prefix that matches exactly one sandbox.
    pub async fn get(&self, id: &str) -> PodshimResult<Arc<Sandbox>> {
        let sandboxes = self.sandboxes.read().await;
        if let Some(sandbox) = sandboxes.get(id) {
            return Ok(sandbox.clone());
        }

        if id.is_empty() {
            return Err(PodshimError::SandboxNotFound(id.to_string()));
        }

        let mut matches: Vec<&Arc<Sandbox>> = sandboxes
            .iter()
            .filter(|(full_id, _)| full_id.starts_with(id))
            .map(|(_, sandbox)| sandbox)
            .collect();

        match matches.len() {
            0 => Err(PodshimError::SandboxNotFound(id.to_string())),
            1 => Ok(matches.remove(0).clone()),
            _ => {
                let mut ids: Vec<String> = matches.iter().map(|s| s.id().to_string()).collect();
                ids.sort();
                Err(PodshimError::AmbiguousSandboxId(id.to_string(), ids))
            }
        }
    }

    /// All sandboxes, in no particular order.
    pub async fn list(&self) -> Vec<Arc<Sandbox>> {
        self.sandboxes.read().await.values().cloned().collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
