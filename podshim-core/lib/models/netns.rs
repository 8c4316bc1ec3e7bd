//! The network namespace owned by a sandbox.
//!
//! A sandbox's network namespace is kept alive by bind-mounting `/proc/<pid>/ns/net` onto a file.
//! Once the namespace has been removed the handle is dropped from its sandbox; touching it again
//! is a bug in the caller.

use std::{
    io,
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    mount::{umount2, MntFlags},
    sys::statfs::statfs,
};

use crate::PodshimResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// `f_type` reported by `statfs` for a bind-mounted namespace file.
const NSFS_MAGIC: i64 = 0x6e73_6673;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A network namespace resource that can be queried and removed.
pub trait NetworkNamespace: Send + Sync {
    /// Filesystem path of the namespace.
    fn path(&self) -> &Path;

    /// Whether the namespace is already gone.
    fn closed(&self) -> PodshimResult<bool>;

    /// Unmounts and deletes the namespace. Must be called at most once.
    fn remove(&mut self) -> PodshimResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A network namespace pinned by a bind mount at `path`.
#[derive(Debug)]
pub struct NetNs {
    path: PathBuf,
    removed: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NetNs {
    /// Wraps the namespace pinned at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            removed: false,
        }
    }

    fn is_mounted(&self) -> PodshimResult<bool> {
        match statfs(&self.path) {
            Ok(stat) => Ok(stat.filesystem_type().0 as i64 == NSFS_MAGIC),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl NetworkNamespace for NetNs {
    fn path(&self) -> &Path {
        &self.path
    }

    fn closed(&self) -> PodshimResult<bool> {
        debug_assert!(!self.removed, "network namespace used after removal");
        Ok(!self.is_mounted()?)
    }

    fn remove(&mut self) -> PodshimResult<()> {
        debug_assert!(!self.removed, "network namespace removed twice");

        if self.is_mounted()? {
            match umount2(&self.path, MntFlags::MNT_DETACH) {
                Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!("removed network namespace at {}", self.path.display());
        self.removed = true;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_namespace_is_closed() -> PodshimResult<()> {
        let temp_dir = TempDir::new()?;
        let netns = NetNs::new(temp_dir.path().join("cni-missing"));

        assert!(netns.closed()?);
        Ok(())
    }

    #[test]
    fn test_plain_file_is_closed_and_removable() -> PodshimResult<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("cni-stale");
        std::fs::write(&path, b"")?;

        let mut netns = NetNs::new(&path);
        assert!(netns.closed()?);

        netns.remove()?;
        assert!(!path.exists());
        Ok(())
    }
}
