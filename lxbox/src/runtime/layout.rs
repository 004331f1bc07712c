use crate::errors::{LxboxError, LxboxResult};
use crate::runtime::constants::{SNAPSHOT_DELIMITER, filenames};
use std::path::{Path, PathBuf};

/// Directory structure constants
pub mod dirs {
    /// Base directory name for lxbox data
    pub const LXBOX_DIR: &str = ".lxbox";

    pub const DB_DIR: &str = "db";

    /// Subdirectory for container root directories
    pub const CONTAINERS_DIR: &str = "containers";

    /// Subdirectory for snapshots, grouped by parent container
    pub const SNAPSHOTS_DIR: &str = "snapshots";

    /// Subdirectory for log files
    pub const LOGS_DIR: &str = "logs";
}

/// Part of a container name before the snapshot delimiter.
///
/// `c1/snap0` → `c1`, `c1` → `c1`.
pub fn base_name(name: &str) -> &str {
    name.split(SNAPSHOT_DELIMITER).next().unwrap_or(name)
}

/// Whether `name` refers to a snapshot.
pub fn is_snapshot_name(name: &str) -> bool {
    name.contains(SNAPSHOT_DELIMITER)
}

// ============================================================================
// FILESYSTEM LAYOUT (home directory)
// ============================================================================

/// Paths under the runtime home directory.
///
/// ```text
/// ~/.lxbox/
/// ├── .lock
/// ├── db/lxbox.db
/// ├── logs/lxbox.log.YYYY-MM-DD
/// ├── containers/{name}/
/// │   └── state/            # checkpoint of a stateful stop
/// └── snapshots/{name}/{snapshot}/
/// ```
#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::DB_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join(filenames::DATABASE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    /// ~/.lxbox/containers
    pub fn containers_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::CONTAINERS_DIR)
    }

    /// ~/.lxbox/snapshots
    pub fn snapshots_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::SNAPSHOTS_DIR)
    }

    /// Directory of a container or snapshot.
    ///
    /// `c1` → containers/c1, `c1/snap0` → snapshots/c1/snap0
    pub fn container_path(&self, name: &str) -> PathBuf {
        match name.split_once(SNAPSHOT_DELIMITER) {
            Some((parent, snapshot)) => self.snapshots_dir().join(parent).join(snapshot),
            None => self.containers_dir().join(name),
        }
    }

    /// Directory whose storage backend owns `name` (snapshots share their parent's).
    pub fn storage_probe_path(&self, name: &str) -> PathBuf {
        self.containers_dir().join(base_name(name))
    }

    /// Checkpoint directory written by a stateful stop.
    pub fn state_path(&self, name: &str) -> PathBuf {
        self.container_path(name).join(filenames::STATE_DIR)
    }

    /// Initialize the filesystem structure.
    pub fn prepare(&self) -> LxboxResult<()> {
        for dir in [
            self.home_dir.clone(),
            self.db_dir(),
            self.logs_dir(),
            self.containers_dir(),
            self.snapshots_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                LxboxError::Storage(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
