//! Default values shared across the podshim crates.

use std::{path::PathBuf, sync::LazyLock, time::Duration};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default podshim home directory, `~/.podshim`.
pub static DEFAULT_PODSHIM_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join(PODSHIM_HOME_DIR)
});

/// The name of the podshim home directory.
pub const PODSHIM_HOME_DIR: &str = ".podshim";

/// The runtime configuration filename inside the podshim home directory.
pub const PODSHIM_CONFIG_FILENAME: &str = "config.yaml";

/// The filename of the persisted sandbox and container registry.
pub const STATE_FILENAME: &str = "state.yaml";

/// Subdirectory of the state directory that holds per-sandbox directories.
pub const SANDBOXES_SUBDIR: &str = "sandboxes";

/// Name of the per-sandbox `/dev/shm` mount point.
pub const SANDBOX_SHM_DIR: &str = "shm";

/// How long to wait for a killed task to report its exit.
pub const DEFAULT_KILL_CONTAINER_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Default directory holding CNI plugin binaries.
pub const DEFAULT_CNI_BIN_DIR: &str = "/opt/cni/bin";

/// Default CNI network configuration list.
pub const DEFAULT_CNI_CONF_FILE: &str = "/etc/cni/net.d/10-podshim.conflist";

/// Interface name CNI plugins are asked to remove inside the namespace.
pub const DEFAULT_CNI_IFNAME: &str = "eth0";
