//! Plain directory storage.

use super::{StorageBackend, StorageKind};
use crate::errors::{LxboxError, LxboxResult};
use crate::runtime::constants::SNAPSHOT_DELIMITER;
use std::path::PathBuf;

/// Containers stored as directories under the runtime home.
#[derive(Clone, Debug)]
pub struct DirStorage {
    home_dir: PathBuf,
}

impl DirStorage {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }
}

impl StorageBackend for DirStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Dir
    }

    fn container_path(&self, name: &str) -> PathBuf {
        crate::runtime::layout::FilesystemLayout::new(self.home_dir.clone()).container_path(name)
    }

    fn container_create(&self, name: &str) -> LxboxResult<()> {
        let path = self.container_path(name);
        std::fs::create_dir_all(&path).map_err(|e| {
            LxboxError::Storage(format!("failed to create {}: {}", path.display(), e))
        })?;
        tracing::debug!(container = %name, path = %path.display(), "Created container directory");
        Ok(())
    }

    fn container_delete(&self, name: &str) -> LxboxResult<()> {
        let path = self.container_path(name);
        if !path.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&path).map_err(|e| {
            LxboxError::Storage(format!("failed to remove {}: {}", path.display(), e))
        })?;

        // Drop the now-empty snapshot group of a deleted snapshot
        if let Some((parent, _)) = name.split_once(SNAPSHOT_DELIMITER)
            && let Some(group) = path.parent()
            && group.ends_with(parent)
        {
            let _ = std::fs::remove_dir(group);
        }

        tracing::debug!(container = %name, "Removed container directory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_delete() {
        let temp = TempDir::new().unwrap();
        let storage = DirStorage::new(temp.path().to_path_buf());

        storage.container_create("c1").unwrap();
        let path = storage.container_path("c1");
        assert!(path.is_dir());
        assert!(path.ends_with("containers/c1"));

        storage.container_delete("c1").unwrap();
        assert!(!path.exists());
        // Idempotent
        storage.container_delete("c1").unwrap();
    }

    #[test]
    fn test_snapshot_delete_cleans_group() {
        let temp = TempDir::new().unwrap();
        let storage = DirStorage::new(temp.path().to_path_buf());

        storage.container_create("c1/snap0").unwrap();
        let snap = storage.container_path("c1/snap0");
        assert!(snap.ends_with("snapshots/c1/snap0"));

        storage.container_delete("c1/snap0").unwrap();
        assert!(!snap.exists());
        assert!(!temp.path().join("snapshots/c1").exists());
    }
}
