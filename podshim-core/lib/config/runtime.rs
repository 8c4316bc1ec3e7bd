//! Runtime configuration for the podshim teardown core.
//!
//! The runtime configuration is read from a YAML file in the podshim home directory. Every field
//! has a default, so a missing file yields a usable configuration without a network plugin.
//! Environment variables override the file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use podshim_utils::{
    env, DEFAULT_CNI_BIN_DIR, DEFAULT_CNI_CONF_FILE, DEFAULT_CNI_IFNAME,
    DEFAULT_KILL_CONTAINER_TIMEOUT, PODSHIM_CONFIG_FILENAME, SANDBOXES_SUBDIR, SANDBOX_SHM_DIR,
    STATE_FILENAME,
};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{PodshimError, PodshimResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Settings that shape how sandboxes are torn down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct RuntimeConfig {
    /// Root directory for the state file and per-sandbox directories.
    #[serde(default = "env::get_podshim_home_path")]
    state_dir: PathBuf,

    /// How long to wait for a killed task to report its exit. Written in seconds, fractions
    /// allowed.
    #[serde(
        rename = "kill_container_timeout_secs",
        default = "default_kill_container_timeout",
        with = "duration_secs"
    )]
    #[getset(skip)]
    kill_container_timeout: Duration,

    /// CNI network settings. Absent means no network plugin is configured.
    #[serde(default)]
    network: Option<CniConfig>,
}

/// Where to find CNI plugins and the network configuration they run with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CniConfig {
    /// Directories searched for plugin binaries.
    #[serde(default = "default_cni_bin_dirs")]
    bin_dirs: Vec<PathBuf>,

    /// Path of the network configuration list.
    #[serde(default = "default_cni_conf_file")]
    conf_file: PathBuf,

    /// Name of the interface inside the pod's network namespace.
    #[serde(default = "default_cni_if_name")]
    if_name: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RuntimeConfig {
    /// Creates a configuration rooted at `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>, network: Option<CniConfig>) -> Self {
        Self {
            state_dir: state_dir.into(),
            kill_container_timeout: DEFAULT_KILL_CONTAINER_TIMEOUT,
            network,
        }
    }

    /// Sets the kill timeout.
    pub fn with_kill_container_timeout(mut self, timeout: Duration) -> Self {
        self.kill_container_timeout = timeout;
        self
    }

    /// Loads the configuration from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing file yields the defaults. `PODSHIM_HOME` overrides the state directory and
    /// `PODSHIM_KILL_TIMEOUT_SECS` overrides the kill timeout, whatever the file says.
    pub async fn load(path: Option<&Path>) -> PodshimResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => env::get_podshim_home_path().join(PODSHIM_CONFIG_FILENAME),
        };

        let mut config = if fs::try_exists(&path).await? {
            let contents = fs::read_to_string(&path).await?;
            tracing::debug!("loaded runtime config from {}", path.display());
            serde_yaml::from_str::<RuntimeConfig>(&contents)?
        } else {
            tracing::debug!("no runtime config at {}, using defaults", path.display());
            RuntimeConfig::default()
        };

        if let Some(home) = env::get_podshim_home_override() {
            config.state_dir = home;
        }

        if let Some(timeout) = env::get_kill_timeout()
            .map_err(|e| PodshimError::InvalidConfig(e.to_string()))?
        {
            config.kill_container_timeout = timeout;
        }

        Ok(config)
    }

    /// How long to wait for a killed task to report its exit.
    pub fn kill_container_timeout(&self) -> Duration {
        self.kill_container_timeout
    }

    /// Path of the persisted registry.
    pub fn state_file_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILENAME)
    }

    /// Directory holding files that belong to one sandbox.
    pub fn sandbox_root_dir(&self, id: &str) -> PathBuf {
        self.state_dir.join(SANDBOXES_SUBDIR).join(id)
    }

    /// Mount point of the sandbox's private `/dev/shm`.
    pub fn sandbox_dev_shm(&self, id: &str) -> PathBuf {
        self.sandbox_root_dir(id).join(SANDBOX_SHM_DIR)
    }
}

impl CniConfig {
    /// Creates a CNI configuration.
    pub fn new(bin_dirs: Vec<PathBuf>, conf_file: impl Into<PathBuf>) -> Self {
        Self {
            bin_dirs,
            conf_file: conf_file.into(),
            if_name: default_cni_if_name(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(env::get_podshim_home_path(), None)
    }
}

impl Default for CniConfig {
    fn default() -> Self {
        Self::new(default_cni_bin_dirs(), default_cni_conf_file())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn default_kill_container_timeout() -> Duration {
    DEFAULT_KILL_CONTAINER_TIMEOUT
}

fn default_cni_bin_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from(DEFAULT_CNI_BIN_DIR)]
}

fn default_cni_conf_file() -> PathBuf {
    PathBuf::from(DEFAULT_CNI_CONF_FILE)
}

fn default_cni_if_name() -> String {
    DEFAULT_CNI_IFNAME.to_string()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    #[serial]
    async fn test_load_missing_file_uses_defaults() -> PodshimResult<()> {
        std::env::remove_var(env::KILL_TIMEOUT_ENV_VAR);
        let temp_dir = TempDir::new()?;

        let config = RuntimeConfig::load(Some(&temp_dir.path().join("absent.yaml"))).await?;

        assert_eq!(config.kill_container_timeout(), DEFAULT_KILL_CONTAINER_TIMEOUT);
        assert!(config.get_network().is_none());
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_load_file_with_env_override() -> PodshimResult<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.yaml");
        fs::write(
            &path,
            "state_dir: /run/podshim\nkill_container_timeout_secs: 30\nnetwork:\n  conf_file: /etc/cni/net.d/10-test.conflist\n",
        )
        .await?;

        std::env::remove_var(env::KILL_TIMEOUT_ENV_VAR);
        std::env::remove_var(env::PODSHIM_HOME_ENV_VAR);
        let config = RuntimeConfig::load(Some(&path)).await?;
        assert_eq!(config.get_state_dir(), &PathBuf::from("/run/podshim"));
        assert_eq!(config.kill_container_timeout(), Duration::from_secs(30));

        let network = config.get_network().as_ref().unwrap();
        assert_eq!(network.get_if_name(), DEFAULT_CNI_IFNAME);
        assert_eq!(network.get_bin_dirs(), &default_cni_bin_dirs());
        assert_eq!(
            config.sandbox_dev_shm("abc"),
            PathBuf::from("/run/podshim/sandboxes/abc/shm")
        );

        std::env::set_var(env::KILL_TIMEOUT_ENV_VAR, "5");
        let config = RuntimeConfig::load(Some(&path)).await?;
        assert_eq!(config.kill_container_timeout(), Duration::from_secs(5));
        std::env::remove_var(env::KILL_TIMEOUT_ENV_VAR);

        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_podshim_home_overrides_file_state_dir() -> PodshimResult<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "state_dir: /run/podshim\n").await?;

        std::env::set_var(env::PODSHIM_HOME_ENV_VAR, temp_dir.path());
        let result = RuntimeConfig::load(Some(&path)).await;
        std::env::remove_var(env::PODSHIM_HOME_ENV_VAR);

        let config = result?;
        assert_eq!(config.get_state_dir(), &temp_dir.path().to_path_buf());
        assert_eq!(config.state_file_path(), temp_dir.path().join(STATE_FILENAME));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_sub_second_kill_timeout_is_kept() -> PodshimResult<()> {
        let config = RuntimeConfig::new("/run/podshim", None)
            .with_kill_container_timeout(Duration::from_millis(250));
        assert_eq!(config.kill_container_timeout(), Duration::from_millis(250));

        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "kill_container_timeout_secs: 0.5\n").await?;

        std::env::remove_var(env::KILL_TIMEOUT_ENV_VAR);
        let loaded = RuntimeConfig::load(Some(&path)).await?;
        assert_eq!(loaded.kill_container_timeout(), Duration::from_millis(500));

        let yaml = serde_yaml::to_string(&config)?;
        let reloaded: RuntimeConfig = serde_yaml::from_str(&yaml)?;
        assert_eq!(reloaded.kill_container_timeout(), Duration::from_millis(250));
        Ok(())
    }
}
