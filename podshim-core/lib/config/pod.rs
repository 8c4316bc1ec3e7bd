//! Declared configuration of a pod sandbox.
//!
//! This is the part of a sandbox's configuration that teardown needs: the metadata used to label
//! the pod on the network, the port mappings that were published for it, and whether it shares
//! the host's IPC namespace.

use std::fmt;

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Immutable configuration a sandbox was created with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters, CopyGetters)]
pub struct PodSandboxConfig {
    /// Pod identity as known to the orchestrator.
    #[builder(default)]
    #[serde(default)]
    #[getset(get = "pub with_prefix")]
    metadata: PodSandboxMetadata,

    /// Ports published from the pod to the host.
    #[builder(default)]
    #[serde(default)]
    #[getset(get = "pub with_prefix")]
    port_mappings: Vec<PortMapping>,

    /// Whether the pod uses the host IPC namespace, in which case it has no private `/dev/shm`.
    #[builder(default)]
    #[serde(default)]
    #[getset(get_copy = "pub with_prefix")]
    host_ipc: bool,
}

/// Pod identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct PodSandboxMetadata {
    /// Pod name.
    #[builder(setter(into))]
    pub name: String,

    /// Pod namespace.
    #[builder(setter(into))]
    pub namespace: String,

    /// Pod UID.
    #[builder(default, setter(into))]
    #[serde(default)]
    pub uid: String,

    /// Creation attempt number.
    #[builder(default)]
    #[serde(default)]
    pub attempt: u32,
}

/// A port published from the pod to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Transport protocol.
    #[serde(default)]
    pub protocol: Protocol,

    /// Port inside the pod.
    pub container_port: i32,

    /// Port on the host. Zero or negative means the port was not published.
    #[serde(default)]
    pub host_port: i32,

    /// Host IP to bind to, empty for all addresses.
    #[serde(default)]
    pub host_ip: String,
}

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP
    #[default]
    Tcp,

    /// UDP
    Udp,

    /// SCTP
    Sctp,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Sctp => write!(f, "SCTP"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_config_from_yaml() {
        let yaml = r#"
metadata:
  name: web
  namespace: default
  uid: "1234"
port_mappings:
  - protocol: UDP
    container_port: 53
    host_port: 5353
  - container_port: 80
host_ipc: true
"#;
        let config: PodSandboxConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.get_metadata().name, "web");
        assert_eq!(config.get_metadata().uid, "1234");
        assert!(config.get_host_ipc());
        assert_eq!(config.get_port_mappings().len(), 2);
        assert_eq!(config.get_port_mappings()[0].protocol, Protocol::Udp);
        assert_eq!(config.get_port_mappings()[1].protocol, Protocol::Tcp);
        assert_eq!(config.get_port_mappings()[1].host_port, 0);
    }
}
