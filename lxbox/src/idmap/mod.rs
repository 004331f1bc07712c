//! uid/gid identity maps for unprivileged containers.
//!
//! An [`IdmapSet`] is persisted as JSON under
//! `volatile.last_state.idmap`. "No mapping" (privileged containers) is
//! written as the literal `[]`, so the key always holds well-formed JSON.

use crate::config::{ConfigMap, is_true, keys};
use crate::errors::{LxboxError, LxboxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Serialized form of "no mapping".
pub const EMPTY_IDMAP: &str = "[]";

/// One mapping range.
///
/// Field names on the wire are the ones later runtime and migration code
/// reads back (`Isuid`, `Hostid`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdmapEntry {
    #[serde(rename = "Isuid")]
    pub is_uid: bool,
    #[serde(rename = "Isgid")]
    pub is_gid: bool,
    #[serde(rename = "Hostid")]
    pub host_id: u64,
    #[serde(rename = "Nsid")]
    pub ns_id: u64,
    #[serde(rename = "Maprange")]
    pub map_range: u64,
}

impl IdmapEntry {
    pub fn uid(ns_id: u64, host_id: u64, map_range: u64) -> Self {
        Self {
            is_uid: true,
            is_gid: false,
            host_id,
            ns_id,
            map_range,
        }
    }

    pub fn gid(ns_id: u64, host_id: u64, map_range: u64) -> Self {
        Self {
            is_uid: false,
            is_gid: true,
            host_id,
            ns_id,
            map_range,
        }
    }

    /// Host id for `ns_id`, if it falls inside this range.
    ///
    /// `None` as well when the shifted id does not fit in a `u64`, which
    /// only happens for ranges read back from a damaged record.
    pub fn host_for(&self, ns_id: u64) -> Option<u64> {
        let offset = ns_id.checked_sub(self.ns_id)?;
        if offset >= self.map_range {
            return None;
        }
        self.host_id.checked_add(offset)
    }

    /// `u 0 1000000 65536` style lines, one per id kind covered.
    pub fn to_lxc_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(2);
        if self.is_uid {
            lines.push(format!("u {} {} {}", self.ns_id, self.host_id, self.map_range));
        }
        if self.is_gid {
            lines.push(format!("g {} {} {}", self.ns_id, self.host_id, self.map_range));
        }
        lines
    }
}

/// Ordered set of mapping ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdmapSet {
    pub entries: Vec<IdmapEntry>,
}

impl IdmapSet {
    pub fn new(entries: Vec<IdmapEntry>) -> Self {
        Self { entries }
    }

    /// One uid range and one gid range starting at ns id 0.
    pub fn isolated(host_base: u64, size: u64) -> Self {
        Self::new(vec![
            IdmapEntry::uid(0, host_base, size),
            IdmapEntry::gid(0, host_base, size),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> LxboxResult<String> {
        serde_json::to_string(&self.entries)
            .map_err(|e| LxboxError::Serialization(format!("failed to encode idmap: {}", e)))
    }

    /// Parse a persisted idmap.
    pub fn parse(json: &str) -> LxboxResult<Self> {
        let entries: Vec<IdmapEntry> = serde_json::from_str(json)
            .map_err(|e| LxboxError::Serialization(format!("invalid idmap {:?}: {}", json, e)))?;
        Ok(Self { entries })
    }

    /// Host uid that namespace uid `ns_id` maps to.
    pub fn shift_uid(&self, ns_id: u64) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| e.is_uid)
            .find_map(|e| e.host_for(ns_id))
    }

    /// Host gid that namespace gid `ns_id` maps to.
    pub fn shift_gid(&self, ns_id: u64) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| e.is_gid)
            .find_map(|e| e.host_for(ns_id))
    }

    pub fn to_lxc_lines(&self) -> Vec<String> {
        self.entries.iter().flat_map(|e| e.to_lxc_lines()).collect()
    }
}

impl fmt::Display for IdmapSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lxc_lines().join(", "))
    }
}

/// Serialize an optional idmap for the reserved config key.
pub fn serialize(idmap: Option<&IdmapSet>) -> LxboxResult<String> {
    match idmap {
        Some(set) => set.to_json(),
        None => Ok(EMPTY_IDMAP.to_string()),
    }
}

/// Daemon-wide range that unprivileged containers are mapped into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdmapOptions {
    #[serde(default = "default_host_base")]
    pub host_base: u64,
    #[serde(default = "default_size")]
    pub size: u64,
}

fn default_host_base() -> u64 {
    1_000_000
}

fn default_size() -> u64 {
    1_000_000_000
}

impl Default for IdmapOptions {
    fn default() -> Self {
        Self {
            host_base: default_host_base(),
            size: default_size(),
        }
    }
}

impl IdmapOptions {
    /// Read `user`'s ranges from subuid/subgid files.
    ///
    /// Returns `None` unless both files exist and agree on one range;
    /// callers then fall back to the defaults.
    pub fn from_subid_files(subuid: &Path, subgid: &Path, user: &str) -> Option<Self> {
        let uid = read_subid_range(subuid, user)?;
        let gid = read_subid_range(subgid, user)?;
        if uid != gid {
            tracing::debug!(?uid, ?gid, "subuid and subgid ranges differ, using defaults");
            return None;
        }
        Some(Self {
            host_base: uid.0,
            size: uid.1,
        })
    }

    /// Ranges for `root` from `/etc/subuid` and `/etc/subgid`, or the defaults.
    pub fn detect() -> Self {
        Self::from_subid_files(Path::new("/etc/subuid"), Path::new("/etc/subgid"), "root")
            .unwrap_or_default()
    }
}

fn read_subid_range(path: &Path, user: &str) -> Option<(u64, u64)> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().find_map(|line| {
        let mut fields = line.trim().split(':');
        let (name, start, count) = (fields.next()?, fields.next()?, fields.next()?);
        if name != user {
            return None;
        }
        Some((start.parse().ok()?, count.parse().ok()?))
    })
}

/// Idmap a container with `config` should run with.
///
/// Privileged containers get no mapping. Otherwise the daemon range applies,
/// with `security.idmap.base` / `security.idmap.size` overriding it.
pub fn compute(config: &ConfigMap, defaults: &IdmapOptions) -> LxboxResult<Option<IdmapSet>> {
    if is_true(config.get(keys::SECURITY_PRIVILEGED).map(String::as_str)) {
        return Ok(None);
    }

    let parse = |key: &str, fallback: u64| -> LxboxResult<u64> {
        match config.get(key) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| LxboxError::Config(format!("{} must be an integer, got {:?}", key, raw))),
            None => Ok(fallback),
        }
    };

    let host_base = parse(keys::SECURITY_IDMAP_BASE, defaults.host_base)?;
    let size = parse(keys::SECURITY_IDMAP_SIZE, defaults.size)?;
    if size == 0 {
        return Err(LxboxError::Config(format!(
            "{} must be positive",
            keys::SECURITY_IDMAP_SIZE
        )));
    }

    Ok(Some(IdmapSet::isolated(host_base, size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    #[test]
    fn test_no_mapping_serializes_to_empty_array() {
        assert_eq!(serialize(None).unwrap(), "[]");
        assert!(IdmapSet::parse("[]").unwrap().is_empty());
    }

    #[test]
    fn test_wire_field_names() {
        let set = IdmapSet::new(vec![IdmapEntry::uid(0, 100000, 65536)]);
        assert_eq!(
            set.to_json().unwrap(),
            r#"[{"Isuid":true,"Isgid":false,"Hostid":100000,"Nsid":0,"Maprange":65536}]"#
        );
    }

    #[test]
    fn test_privileged_has_no_mapping() {
        let mut config = ConfigMap::new();
        config.insert("security.privileged".into(), "true".into());
        assert_eq!(compute(&config, &IdmapOptions::default()).unwrap(), None);
    }

    #[test]
    fn test_default_mapping() {
        let set = compute(&ConfigMap::new(), &IdmapOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(set.entries.len(), 2);
        assert_eq!(set.shift_uid(0), Some(1_000_000));
        assert_eq!(set.shift_gid(1000), Some(1_001_000));
        assert_eq!(set.shift_uid(1_000_000_000), None);
    }

    #[test]
    fn test_shift_does_not_overflow() {
        let set = IdmapSet::new(vec![IdmapEntry::uid(0, u64::MAX - 1, 10)]);
        assert_eq!(set.shift_uid(1), Some(u64::MAX));
        assert_eq!(set.shift_uid(5), None);
        assert_eq!(IdmapEntry::uid(10, 0, 5).host_for(3), None);
    }

    #[test]
    fn test_config_overrides() {
        let mut config = ConfigMap::new();
        config.insert("security.idmap.base".into(), "200000".into());
        config.insert("security.idmap.size".into(), "65536".into());

        let set = compute(&config, &IdmapOptions::default()).unwrap().unwrap();
        assert_eq!(set.to_lxc_lines(), vec!["u 0 200000 65536", "g 0 200000 65536"]);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut config = ConfigMap::new();
        config.insert("security.idmap.size".into(), "0".into());
        assert!(compute(&config, &IdmapOptions::default()).is_err());
    }

    #[test]
    fn test_subid_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let subuid = dir.path().join("subuid");
        let subgid = dir.path().join("subgid");
        for path in [&subuid, &subgid] {
            let mut f = std::fs::File::create(path).unwrap();
            writeln!(f, "alice:100000:65536").unwrap();
            writeln!(f, "root:300000:131072").unwrap();
        }

        let opts = IdmapOptions::from_subid_files(&subuid, &subgid, "root").unwrap();
        assert_eq!(opts.host_base, 300000);
        assert_eq!(opts.size, 131072);

        assert!(IdmapOptions::from_subid_files(&subuid, &subgid, "bob").is_none());
        assert!(IdmapOptions::from_subid_files(&dir.path().join("missing"), &subgid, "root").is_none());
    }

    fn arb_entry() -> impl Strategy<Value = IdmapEntry> {
        (any::<bool>(), any::<bool>(), any::<u32>(), any::<u32>(), 1u64..=u32::MAX as u64).prop_map(
            |(is_uid, is_gid, host, ns, range)| IdmapEntry {
                is_uid,
                is_gid,
                host_id: host as u64,
                ns_id: ns as u64,
                map_range: range,
            },
        )
    }

    proptest! {
        #[test]
        fn prop_json_round_trip(entries in prop::collection::vec(arb_entry(), 0..5)) {
            let set = IdmapSet::new(entries);
            let json = serialize(Some(&set)).unwrap();
            prop_assert_eq!(IdmapSet::parse(&json).unwrap(), set);
        }
    }
}
