//! Storage backends and backend resolution.
//!
//! Backends themselves (block devices, subvolumes, datasets) live outside
//! this crate; they are plugged in as [`StorageBackend`] implementations.
//! This module decides *which* backend owns a container:
//! - new containers get the runtime's configured default backend
//! - existing containers are resolved from their on-disk path
//!   (see [`detect`])

pub mod detect;
pub mod dir;

use crate::errors::{LxboxError, LxboxResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub use detect::{detect_kind, storage_for_path};
pub use dir::DirStorage;

/// Storage backend technologies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Plain directory tree.
    #[default]
    Dir,
    Btrfs,
    Lvm,
    Zfs,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Dir => "dir",
            StorageKind::Btrfs => "btrfs",
            StorageKind::Lvm => "lvm",
            StorageKind::Zfs => "zfs",
        }
    }
}

impl FromStr for StorageKind {
    type Err = LxboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dir" => Ok(StorageKind::Dir),
            "btrfs" => Ok(StorageKind::Btrfs),
            "lvm" => Ok(StorageKind::Lvm),
            "zfs" => Ok(StorageKind::Zfs),
            _ => Err(LxboxError::Config(format!(
                "Unknown storage backend: '{}'. Supported: dir, btrfs, lvm, zfs",
                s
            ))),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability a storage technology exposes to container drivers.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> StorageKind;

    /// Where the container's filesystem lives on the host.
    fn container_path(&self, name: &str) -> PathBuf;

    /// Allocate storage for a new container.
    fn container_create(&self, name: &str) -> LxboxResult<()>;

    /// Release a container's storage. Missing storage is not an error.
    fn container_delete(&self, name: &str) -> LxboxResult<()>;
}

/// Configured backends, one per kind.
#[derive(Clone, Debug, Default)]
pub struct StorageRegistry {
    backends: HashMap<StorageKind, Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one of the same kind.
    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        tracing::debug!(kind = %backend.kind(), "Registering storage backend");
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: StorageKind) -> LxboxResult<Arc<dyn StorageBackend>> {
        self.backends.get(&kind).cloned().ok_or_else(|| {
            let mut configured: Vec<_> = self.backends.keys().map(|k| k.as_str()).collect();
            configured.sort_unstable();
            LxboxError::Storage(format!(
                "storage backend {} is not configured. Configured backends: {:?}",
                kind, configured
            ))
        })
    }

    pub fn kinds(&self) -> Vec<StorageKind> {
        self.backends.keys().copied().collect()
    }

    /// Backend that owns the container directory at `path`.
    pub fn for_path(&self, path: &Path) -> LxboxResult<Arc<dyn StorageBackend>> {
        storage_for_path(self, path)
    }
}
