//! Storage backend discovery using the inventory pattern.
//!
//! Each backend kind registers a detector at compile time with
//! `inventory::submit!`. Discovery runs the detectors in ascending
//! priority order; the first one that claims the path wins.

use super::{StorageBackend, StorageKind, StorageRegistry};
use crate::errors::{LxboxError, LxboxResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Type alias for detector functions.
pub type DetectFn = fn(&Path) -> bool;

/// Registration entry submitted per backend kind.
pub struct StorageDetector {
    pub kind: StorageKind,
    /// Lower runs first. Marker-based detectors must beat the `dir` fallback.
    pub priority: u8,
    pub claims: DetectFn,
}

inventory::collect!(StorageDetector);

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

/// LVM volumes are mounted with a `<path>.lv` link next to them.
fn claims_lvm(path: &Path) -> bool {
    with_suffix(path, ".lv").symlink_metadata().is_ok()
}

/// ZFS datasets leave a `<path>.zfs` marker next to them.
fn claims_zfs(path: &Path) -> bool {
    with_suffix(path, ".zfs").symlink_metadata().is_ok()
}

/// Btrfs subvolume roots always have inode 256.
#[cfg(target_os = "linux")]
fn claims_btrfs(path: &Path) -> bool {
    use nix::sys::statfs::{BTRFS_SUPER_MAGIC, statfs};
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_dir() || meta.ino() != 256 {
        return false;
    }
    statfs(path)
        .map(|fs| fs.filesystem_type() == BTRFS_SUPER_MAGIC)
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn claims_btrfs(_path: &Path) -> bool {
    false
}

fn claims_dir(path: &Path) -> bool {
    path.is_dir()
}

inventory::submit! {
    StorageDetector { kind: StorageKind::Lvm, priority: 10, claims: claims_lvm }
}

inventory::submit! {
    StorageDetector { kind: StorageKind::Zfs, priority: 20, claims: claims_zfs }
}

inventory::submit! {
    StorageDetector { kind: StorageKind::Btrfs, priority: 30, claims: claims_btrfs }
}

inventory::submit! {
    StorageDetector { kind: StorageKind::Dir, priority: 255, claims: claims_dir }
}

/// Registered detectors, lowest priority value first.
fn detectors() -> Vec<&'static StorageDetector> {
    let mut detectors: Vec<_> = inventory::iter::<StorageDetector>().collect();
    detectors.sort_by_key(|d| d.priority);
    detectors
}

/// Which backend kind manages the container directory at `path`.
///
/// # Errors
///
/// `StorageDiscovery` if no detector claims the path.
pub fn detect_kind(path: &Path) -> LxboxResult<StorageKind> {
    for detector in detectors() {
        if (detector.claims)(path) {
            tracing::debug!(path = %path.display(), kind = %detector.kind, "Detected storage backend");
            return Ok(detector.kind);
        }
    }

    Err(LxboxError::StorageDiscovery(format!(
        "no storage backend claims {}",
        path.display()
    )))
}

/// Configured backend that manages the container directory at `path`.
///
/// # Errors
///
/// `StorageDiscovery` if no detector claims the path, or if the detected
/// kind has no configured backend.
pub fn storage_for_path(
    registry: &StorageRegistry,
    path: &Path,
) -> LxboxResult<Arc<dyn StorageBackend>> {
    let kind = detect_kind(path)?;
    registry.get(kind).map_err(|_| {
        LxboxError::StorageDiscovery(format!(
            "{} is managed by {} storage, which is not configured",
            path.display(),
            kind
        ))
    })
}

/// Kinds with a registered detector.
pub fn detectable_kinds() -> Vec<StorageKind> {
    detectors().into_iter().map(|d| d.kind).collect()
}
