//! Sandbox-level mounts.

use std::path::Path;

use nix::{
    errno::Errno,
    mount::{umount2, MntFlags},
};

use crate::{
    config::{PodSandboxConfig, RuntimeConfig},
    PodshimResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Detaches mounts.
pub trait Mounter: Send + Sync {
    /// Lazily unmounts `path`. A path that is missing or not a mount point is not an error.
    fn unmount(&self, path: &Path) -> PodshimResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`Mounter`] backed by `umount2(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounter;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Mounter for SystemMounter {
    fn unmount(&self, path: &Path) -> PodshimResult<()> {
        match umount2(path, MntFlags::MNT_DETACH) {
            Ok(()) => {
                tracing::debug!("unmounted {}", path.display());
                Ok(())
            }
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Releases the mounts a sandbox was given at creation.
///
/// Only a sandbox with its own IPC namespace has a private `/dev/shm` to release.
pub fn unmount_sandbox_files(
    mounter: &dyn Mounter,
    config: &RuntimeConfig,
    id: &str,
    pod_config: &PodSandboxConfig,
) -> PodshimResult<()> {
    if pod_config.get_host_ipc() {
        return Ok(());
    }

    let dev_shm = config.sandbox_dev_shm(id);
    if !dev_shm.exists() {
        return Ok(());
    }

    mounter.unmount(&dev_shm)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Mutex};

    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct RecordingMounter {
        unmounted: Mutex<Vec<PathBuf>>,
    }

    impl Mounter for RecordingMounter {
        fn unmount(&self, path: &Path) -> PodshimResult<()> {
            self.unmounted.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn test_unmounts_private_shm() -> PodshimResult<()> {
        let temp_dir = TempDir::new()?;
        let config = RuntimeConfig::new(temp_dir.path(), None);
        std::fs::create_dir_all(config.sandbox_dev_shm("sb-1"))?;

        let mounter = RecordingMounter::default();
        unmount_sandbox_files(&mounter, &config, "sb-1", &PodSandboxConfig::default())?;
        assert_eq!(
            *mounter.unmounted.lock().unwrap(),
            vec![config.sandbox_dev_shm("sb-1")]
        );

        let host_ipc = PodSandboxConfig::builder().host_ipc(true).build();
        unmount_sandbox_files(&mounter, &config, "sb-1", &host_ipc)?;
        assert_eq!(mounter.unmounted.lock().unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_shm_is_skipped() -> PodshimResult<()> {
        let temp_dir = TempDir::new()?;
        let config = RuntimeConfig::new(temp_dir.path(), None);

        let mounter = RecordingMounter::default();
        unmount_sandbox_files(&mounter, &config, "sb-1", &PodSandboxConfig::default())?;
        assert!(mounter.unmounted.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_system_mounter_tolerates_plain_dirs() -> PodshimResult<()> {
        let temp_dir = TempDir::new()?;
        match SystemMounter.unmount(temp_dir.path()) {
            Ok(()) => {}
            // Unprivileged test runs cannot unmount at all.
            Err(crate::PodshimError::Nix(Errno::EPERM)) => {}
            Err(e) => return Err(e),
        }
        SystemMounter.unmount(&temp_dir.path().join("missing")).or_else(|e| match e {
            crate::PodshimError::Nix(Errno::EPERM) => Ok(()),
            e => Err(e),
        })
    }
}
