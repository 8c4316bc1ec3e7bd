//! A [`NetworkPlugin`] that runs CNI plugin binaries.
//!
//! The network configuration list is read on every call so edits on disk take effect without a
//! restart. Plugins are invoked for `DEL` in reverse order of the list, each with its own entry
//! of the list on stdin and the pod labels in `CNI_ARGS`. Plugins that declare the
//! `portMappings` capability also receive the pod's published ports in `runtimeConfig`.

use std::{collections::BTreeMap, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{fs, io::AsyncWriteExt, process::Command};

use crate::{
    config::CniConfig,
    network::{CniPortMapping, NetworkPlugin},
    PodshimError, PodshimResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const CNI_COMMAND_DEL: &str = "DEL";

const PORT_MAPPINGS_CAPABILITY: &str = "portMappings";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs CNI plugins as described by a [`CniConfig`].
#[derive(Debug, Clone)]
pub struct CniPlugin {
    config: CniConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkConfigList {
    cni_version: String,
    name: String,
    #[serde(default)]
    plugins: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct CniErrorResult {
    code: u32,
    msg: String,
    #[serde(default)]
    details: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CniPlugin {
    /// Creates a plugin runner.
    pub fn new(config: CniConfig) -> Self {
        Self { config }
    }

    async fn load_config_list(&self) -> PodshimResult<NetworkConfigList> {
        let path = self.config.get_conf_file();
        let contents = fs::read_to_string(path).await.map_err(|e| {
            PodshimError::InvalidConfig(format!(
                "failed to read cni config {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut list: NetworkConfigList = serde_json::from_str(&contents)?;
        if list.plugins.is_empty() {
            // A single-plugin `.conf` file carries the plugin fields at the top level.
            let single: Map<String, Value> = serde_json::from_str(&contents)?;
            if single.contains_key("type") {
                list.plugins.push(single);
            }
        }

        if list.plugins.is_empty() {
            return Err(PodshimError::InvalidConfig(format!(
                "cni config {} has no plugins",
                path.display()
            )));
        }

        Ok(list)
    }

    fn find_plugin(&self, plugin_type: &str) -> PodshimResult<PathBuf> {
        self.config
            .get_bin_dirs()
            .iter()
            .map(|dir| dir.join(plugin_type))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                PodshimError::InvalidConfig(format!(
                    "failed to find plugin {:?} in {:?}",
                    plugin_type,
                    self.config.get_bin_dirs()
                ))
            })
    }

    async fn exec_plugin(
        &self,
        plugin_type: &str,
        id: &str,
        netns_path: &str,
        cni_args: &str,
        stdin_config: &Value,
    ) -> PodshimResult<()> {
        let binary = self.find_plugin(plugin_type)?;
        let cni_path = std::env::join_paths(self.config.get_bin_dirs())
            .map_err(|e| PodshimError::InvalidConfig(format!("invalid cni bin dirs: {}", e)))?;

        tracing::debug!("running cni plugin {} DEL for sandbox {}", plugin_type, id);
        let mut child = Command::new(&binary)
            .env("CNI_COMMAND", CNI_COMMAND_DEL)
            .env("CNI_CONTAINERID", id)
            .env("CNI_NETNS", netns_path)
            .env("CNI_IFNAME", self.config.get_if_name())
            .env("CNI_PATH", cni_path)
            .env("CNI_ARGS", cni_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&serde_json::to_vec(stdin_config)?).await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            return Ok(());
        }

        let (code, msg) = match serde_json::from_slice::<CniErrorResult>(&output.stdout) {
            Ok(result) if result.details.is_empty() => (result.code, result.msg),
            Ok(result) => (result.code, format!("{}; {}", result.msg, result.details)),
            Err(_) => (
                output.status.code().unwrap_or_default() as u32,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
        };

        Err(PodshimError::Cni {
            plugin: plugin_type.to_string(),
            code,
            msg,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl NetworkPlugin for CniPlugin {
    async fn remove(
        &self,
        id: &str,
        netns_path: &str,
        labels: &BTreeMap<String, String>,
        port_mappings: &[CniPortMapping],
    ) -> PodshimResult<()> {
        let list = self.load_config_list().await?;
        let cni_args = labels
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(";");

        for plugin in list.plugins.iter().rev() {
            let plugin_type = plugin
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    PodshimError::InvalidConfig(format!(
                        "plugin in network {:?} has no type",
                        list.name
                    ))
                })?
                .to_string();

            let mut stdin_config = plugin.clone();
            stdin_config.insert("cniVersion".to_string(), json!(list.cni_version));
            stdin_config.insert("name".to_string(), json!(list.name));

            let wants_ports = plugin
                .get("capabilities")
                .and_then(|caps| caps.get(PORT_MAPPINGS_CAPABILITY))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if wants_ports && !port_mappings.is_empty() {
                stdin_config.insert(
                    "runtimeConfig".to_string(),
                    json!({ PORT_MAPPINGS_CAPABILITY: port_mappings }),
                );
            }

            self.exec_plugin(
                &plugin_type,
                id,
                netns_path,
                &cni_args,
                &Value::Object(stdin_config),
            )
            .await?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
