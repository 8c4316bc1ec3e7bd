use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{config::PodSandboxConfig, PodshimResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Label carrying the pod namespace.
pub const POD_NAMESPACE_LABEL: &str = "K8S_POD_NAMESPACE";

/// Label carrying the pod name.
pub const POD_NAME_LABEL: &str = "K8S_POD_NAME";

/// Label carrying the sandbox ID.
pub const POD_INFRA_CONTAINER_ID_LABEL: &str = "K8S_POD_INFRA_CONTAINER_ID";

/// Tells plugins to ignore labels they do not understand.
pub const IGNORE_UNKNOWN_LABEL: &str = "IgnoreUnknown";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A port mapping in the shape CNI plugins expect in `runtimeConfig.portMappings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniPortMapping {
    /// Port on the host.
    pub host_port: i32,

    /// Port inside the pod.
    pub container_port: i32,

    /// Lower-case protocol name.
    pub protocol: String,

    /// Host IP, empty for all addresses.
    #[serde(rename = "hostIP", default, skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Detaches a pod from its network.
#[async_trait]
pub trait NetworkPlugin: Send + Sync {
    /// Removes the network of sandbox `id`.
    ///
    /// An empty `netns_path` means the namespace is already gone and the plugin should release
    /// what it can without entering it.
    async fn remove(
        &self,
        id: &str,
        netns_path: &str,
        labels: &BTreeMap<String, String>,
        port_mappings: &[CniPortMapping],
    ) -> PodshimResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Labels that identify the pod to network plugins.
pub fn pod_network_labels(id: &str, config: &PodSandboxConfig) -> BTreeMap<String, String> {
    let metadata = config.get_metadata();
    BTreeMap::from([
        (POD_NAMESPACE_LABEL.to_string(), metadata.namespace.clone()),
        (POD_NAME_LABEL.to_string(), metadata.name.clone()),
        (POD_INFRA_CONTAINER_ID_LABEL.to_string(), id.to_string()),
        (IGNORE_UNKNOWN_LABEL.to_string(), "1".to_string()),
    ])
}

/// The declared port mappings that were actually published, in CNI form.
pub fn cni_port_mappings(config: &PodSandboxConfig) -> Vec<CniPortMapping> {
    config
        .get_port_mappings()
        .iter()
        .filter(|mapping| mapping.host_port > 0)
        .map(|mapping| CniPortMapping {
            host_port: mapping.host_port,
            container_port: mapping.container_port,
            protocol: mapping.protocol.to_string().to_lowercase(),
            host_ip: mapping.host_ip.clone(),
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
