//! Device model: attachable resources described as key/value maps.
//!
//! A [`Device`] is a flat attribute map (`type`, `path`, `source`, ...).
//! A [`DeviceSet`] maps unique device names to devices. Both are backed by
//! `BTreeMap`, so iteration is sorted by key and every derived result
//! (expansion, name selection, diffs) is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Attribute names with special meaning.
pub mod keys {
    pub const TYPE: &str = "type";
    pub const PATH: &str = "path";
    pub const SOURCE: &str = "source";
    pub const READONLY: &str = "readonly";
}

/// Device type values.
pub mod types {
    pub const NONE: &str = "none";
    pub const NIC: &str = "nic";
    pub const DISK: &str = "disk";
    pub const UNIX_CHAR: &str = "unix-char";
    pub const UNIX_BLOCK: &str = "unix-block";
}

/// Path of the root filesystem disk.
pub const ROOT_PATH: &str = "/";

/// One attachable resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Device(BTreeMap<String, String>);

impl Device {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Disk device mounted at `/`.
    pub fn root_disk() -> Self {
        Self::from_pairs([(keys::TYPE, types::DISK), (keys::PATH, ROOT_PATH)])
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn device_type(&self) -> Option<&str> {
        self.get(keys::TYPE)
    }

    pub fn is_disk(&self) -> bool {
        self.device_type() == Some(types::DISK)
    }

    /// Disk attached at `/`.
    pub fn is_root_disk(&self) -> bool {
        self.is_disk() && self.get(keys::PATH) == Some(ROOT_PATH)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Device {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// Named devices, unique by name and iterated in name order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSet(BTreeMap<String, Device>);

/// Result of comparing two device sets.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeviceDiff {
    pub removed: Vec<String>,
    pub added: Vec<String>,
    pub updated: Vec<String>,
}

impl DeviceDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.updated.is_empty()
    }
}

impl DeviceSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Insert or replace a device, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, device: Device) -> Option<Device> {
        self.0.insert(name.into(), device)
    }

    pub fn remove(&mut self, name: &str) -> Option<Device> {
        self.0.remove(name)
    }

    /// Device names in iteration order.
    pub fn names(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Device> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` on top of `self`: same-named devices are replaced whole.
    pub fn merge(&mut self, other: &DeviceSet) {
        for (name, device) in other.iter() {
            self.0.insert(name.clone(), device.clone());
        }
    }

    /// Name and device of the first root disk, if any.
    pub fn root_disk(&self) -> Option<(&str, &Device)> {
        self.0
            .iter()
            .find(|(_, d)| d.is_root_disk())
            .map(|(n, d)| (n.as_str(), d))
    }

    pub fn has_root_disk(&self) -> bool {
        self.root_disk().is_some()
    }

    /// First name of the form `base`, `base_`, `base__`, ... not already used.
    ///
    /// Gives up after `max_attempts` candidates.
    pub fn unused_name(&self, base: &str, max_attempts: usize) -> Option<String> {
        let mut candidate = base.to_string();
        for _ in 0..max_attempts {
            if !self.contains(&candidate) {
                return Some(candidate);
            }
            candidate.push('_');
        }
        None
    }

    /// Compare `self` (old) against `new`.
    pub fn diff(&self, new: &DeviceSet) -> DeviceDiff {
        let mut diff = DeviceDiff::default();

        for (name, old_dev) in self.iter() {
            match new.get(name) {
                None => diff.removed.push(name.clone()),
                Some(new_dev) if new_dev != old_dev => diff.updated.push(name.clone()),
                Some(_) => {}
            }
        }
        for name in new.0.keys() {
            if !self.contains(name) {
                diff.added.push(name.clone());
            }
        }

        diff
    }
}

impl<K: Into<String>> FromIterator<(K, Device)> for DeviceSet {
    fn from_iter<I: IntoIterator<Item = (K, Device)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, d)| (k.into(), d)).collect())
    }
}

impl<'a> IntoIterator for &'a DeviceSet {
    type Item = (&'a String, &'a Device);
    type IntoIter = btree_map::Iter<'a, String, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
