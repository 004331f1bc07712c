//! Configuration for the lxbox runtime.

use crate::idmap::IdmapOptions;
use crate::runtime::constants::envs as const_envs;
use crate::runtime::layout::dirs as const_dirs;
use crate::storage::StorageKind;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime-wide options.
///
/// The default storage backend is part of these options and is passed to
/// every create call; there is no process-global backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeOptions {
    /// Home directory (`LXBOX_HOME`, or `~/.lxbox`).
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    /// Backend attached to newly created containers.
    ///
    /// Default: `dir`
    #[serde(default)]
    pub default_storage: StorageKind,

    /// Host range unprivileged containers are mapped into.
    ///
    /// Default: root's `/etc/subuid` + `/etc/subgid` ranges when both exist,
    /// otherwise 1000000 + 1000000000.
    #[serde(default = "IdmapOptions::detect")]
    pub idmap: IdmapOptions,

    /// Device that must be present for VM containers to start.
    ///
    /// Default: /dev/kvm
    #[serde(default = "default_vm_accelerator")]
    pub vm_accelerator: PathBuf,

    /// Take an exclusive lock on `home_dir` for the runtime's lifetime.
    ///
    /// Default: true
    #[serde(default = "default_lock_home")]
    pub lock_home: bool,
}

fn default_home_dir() -> PathBuf {
    std::env::var(const_envs::LXBOX_HOME)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(const_dirs::LXBOX_DIR);
            path
        })
}

fn default_vm_accelerator() -> PathBuf {
    PathBuf::from("/dev/kvm")
}

fn default_lock_home() -> bool {
    true
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            default_storage: StorageKind::default(),
            idmap: IdmapOptions::detect(),
            vm_accelerator: default_vm_accelerator(),
            lock_home: default_lock_home(),
        }
    }
}

impl RuntimeOptions {
    /// Default options rooted at `home_dir`.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }
}
