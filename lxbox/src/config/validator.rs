//! Config and device policy checks.
//!
//! Every check is a pure predicate over a map. The two flags passed to the
//! set-level checks change the policy:
//! - `is_profile`: profiles may not hold volatile keys and need no root disk
//! - `is_new_instance`: a container being created may not carry runtime
//!   history (`volatile.last_state.*`) or a read-only root disk

use super::{ConfigMap, keys};
use crate::device::{Device, DeviceSet, keys as dev_keys, types as dev_types};
use crate::idmap::IdmapSet;
use std::collections::HashMap;
use thiserror::Error;

/// Maximum length of a container name component.
pub const MAX_NAME_LEN: usize = 63;

/// A config or device policy violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("volatile key {0} can only be set on containers")]
    VolatileOnProfile(String),

    #[error("key {0} records runtime state and can't be set on a new container")]
    RuntimeStateOnCreate(String),

    #[error("raw.lxc may not set {0}")]
    ForbiddenRawLxc(String),

    #[error("device name must not be empty")]
    EmptyDeviceName,

    #[error("device {0}: missing device type")]
    MissingDeviceType(String),

    #[error("device {device}: invalid device type {kind:?}")]
    InvalidDeviceType { device: String, kind: String },

    #[error("device {device}: invalid attribute {key:?} for type {kind}")]
    InvalidDeviceKey {
        device: String,
        kind: String,
        key: String,
    },

    #[error("device {device}: missing required attribute {key:?}")]
    MissingDeviceKey { device: String, key: String },

    #[error("device {device}: invalid value for {key}: {value:?}")]
    InvalidDeviceValue {
        device: String,
        key: String,
        value: String,
    },

    #[error("root disk {0} may not have a source")]
    RootDiskWithSource(String),

    #[error("disks {first} and {second} use the same path {path}")]
    DuplicateDiskPath {
        first: String,
        second: String,
        path: String,
    },

    #[error("container is lacking a root disk")]
    MissingRootDisk,

    #[error("root disk {0} of a new container can't be read-only")]
    ReadOnlyRootDisk(String),

    #[error("invalid container name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
}

type ValidationResult = Result<(), ValidationError>;

#[derive(Clone, Copy)]
enum KeyKind {
    Bool,
    Int,
    UnsignedInt,
    PositiveInt,
    OneOf(&'static [&'static str]),
    Text,
}

fn key_kind(key: &str) -> Option<KeyKind> {
    let kind = match key {
        "boot.autostart" | "limits.memory.swap" | "security.privileged" | "security.nesting" => {
            KeyKind::Bool
        }
        "boot.autostart.delay"
        | "boot.autostart.priority"
        | "limits.cpu.priority"
        | "limits.disk.priority"
        | "limits.network.priority"
        | "limits.memory.swap.priority"
        | "limits.processes" => KeyKind::Int,
        "security.idmap.base" => KeyKind::UnsignedInt,
        "security.idmap.size" => KeyKind::PositiveInt,
        "limits.memory.enforce" => KeyKind::OneOf(&["hard", "soft"]),
        "limits.cpu" | "limits.cpu.allowance" | "limits.memory" | "linux.kernel_modules"
        | "raw.apparmor" | "raw.lxc" | "volatile.base_image" | "volatile.apply_template" => {
            KeyKind::Text
        }
        keys::VOLATILE_LAST_STATE_POWER => KeyKind::OneOf(&["RUNNING", "STOPPED"]),
        _ if key.starts_with("user.") || key.starts_with("environment.") => KeyKind::Text,
        _ if is_volatile_device_key(key) => KeyKind::Text,
        _ => return None,
    };
    Some(kind)
}

/// `volatile.<device>.hwaddr` and `volatile.<device>.name`.
fn is_volatile_device_key(key: &str) -> bool {
    let Some(rest) = key.strip_prefix(keys::VOLATILE_PREFIX) else {
        return false;
    };
    match rest.rsplit_once('.') {
        Some((device, "hwaddr" | "name")) => !device.is_empty() && device != "last_state",
        _ => false,
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn validate_value(key: &str, value: &str, kind: KeyKind) -> ValidationResult {
    match kind {
        KeyKind::Bool => match value.to_ascii_lowercase().as_str() {
            "true" | "false" | "1" | "0" | "yes" | "no" | "on" | "off" | "" => Ok(()),
            _ => Err(invalid(key, value, "expected a boolean")),
        },
        KeyKind::Int => value
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| invalid(key, value, "expected an integer")),
        KeyKind::UnsignedInt => value
            .parse::<u64>()
            .map(|_| ())
            .map_err(|_| invalid(key, value, "expected a non-negative integer")),
        KeyKind::PositiveInt => match value.parse::<u64>() {
            Ok(n) if n > 0 => Ok(()),
            _ => Err(invalid(key, value, "expected a positive integer")),
        },
        KeyKind::OneOf(allowed) => {
            if allowed.contains(&value) {
                Ok(())
            } else {
                Err(invalid(key, value, format!("expected one of {allowed:?}")))
            }
        }
        KeyKind::Text => Ok(()),
    }
}

fn validate_raw_lxc(value: &str) -> ValidationResult {
    for line in value.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let key = line.split('=').next().unwrap_or_default().trim();
        if key == "lxc.logfile" || key.starts_with("lxc.network.") {
            return Err(ValidationError::ForbiddenRawLxc(key.to_string()));
        }
    }
    Ok(())
}

/// Check a single config key/value pair.
pub fn validate_config_key(key: &str, value: &str) -> ValidationResult {
    if key == keys::VOLATILE_LAST_STATE_IDMAP {
        return IdmapSet::parse(value)
            .map(|_| ())
            .map_err(|e| invalid(key, value, e.to_string()));
    }

    let kind = key_kind(key).ok_or_else(|| ValidationError::UnknownKey(key.to_string()))?;
    validate_value(key, value, kind)?;

    if key == keys::RAW_LXC {
        validate_raw_lxc(value)?;
    }
    Ok(())
}

/// Check a config map.
pub fn validate_config(
    config: &ConfigMap,
    is_profile: bool,
    is_new_instance: bool,
) -> ValidationResult {
    for (key, value) in config {
        if is_profile && key.starts_with(keys::VOLATILE_PREFIX) {
            return Err(ValidationError::VolatileOnProfile(key.clone()));
        }

        if is_new_instance
            && key.starts_with(keys::VOLATILE_LAST_STATE_PREFIX)
            && key != keys::VOLATILE_LAST_STATE_IDMAP
        {
            return Err(ValidationError::RuntimeStateOnCreate(key.clone()));
        }

        validate_config_key(key, value)?;
    }
    Ok(())
}

fn allowed_device_keys(kind: &str) -> Option<&'static [&'static str]> {
    let allowed: &'static [&'static str] = match kind {
        dev_types::NONE => &[],
        dev_types::NIC => &[
            "limits.max",
            "limits.ingress",
            "limits.egress",
            "host_name",
            "hwaddr",
            "mtu",
            "name",
            "nictype",
            "parent",
        ],
        dev_types::DISK => &[
            "limits.max",
            "limits.read",
            "limits.write",
            "optional",
            "path",
            "readonly",
            "recursive",
            "size",
            "source",
        ],
        dev_types::UNIX_CHAR | dev_types::UNIX_BLOCK => {
            &["gid", "major", "minor", "mode", "path", "uid"]
        }
        _ => return None,
    };
    Some(allowed)
}

fn require<'a>(name: &str, device: &'a Device, key: &str) -> Result<&'a str, ValidationError> {
    match device.get(key) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingDeviceKey {
            device: name.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Check one device on its own, without looking at its siblings.
pub fn validate_device(name: &str, device: &Device) -> ValidationResult {
    if name.is_empty() {
        return Err(ValidationError::EmptyDeviceName);
    }

    let kind = device
        .device_type()
        .ok_or_else(|| ValidationError::MissingDeviceType(name.to_string()))?;
    let allowed = allowed_device_keys(kind).ok_or_else(|| ValidationError::InvalidDeviceType {
        device: name.to_string(),
        kind: kind.to_string(),
    })?;

    for (key, _) in device.iter() {
        if key != dev_keys::TYPE && !allowed.contains(&key.as_str()) {
            return Err(ValidationError::InvalidDeviceKey {
                device: name.to_string(),
                kind: kind.to_string(),
                key: key.clone(),
            });
        }
    }

    match kind {
        dev_types::NIC => {
            let nictype = require(name, device, "nictype")?;
            match nictype {
                "bridged" | "physical" | "macvlan" => {
                    require(name, device, "parent")?;
                }
                "p2p" => {}
                other => {
                    return Err(ValidationError::InvalidDeviceValue {
                        device: name.to_string(),
                        key: "nictype".to_string(),
                        value: other.to_string(),
                    });
                }
            }
        }
        dev_types::DISK => {
            require(name, device, dev_keys::PATH)?;
            if device.is_root_disk() {
                if device.get(dev_keys::SOURCE).is_some_and(|s| !s.is_empty()) {
                    return Err(ValidationError::RootDiskWithSource(name.to_string()));
                }
            } else {
                require(name, device, dev_keys::SOURCE)?;
            }
        }
        dev_types::UNIX_CHAR | dev_types::UNIX_BLOCK => {
            require(name, device, dev_keys::PATH)?;
        }
        _ => {}
    }

    Ok(())
}

/// Check a device set.
///
/// For containers (`is_profile == false`) the set must be complete: exactly
/// one root disk.
pub fn validate_devices(
    devices: &DeviceSet,
    is_profile: bool,
    is_new_instance: bool,
) -> ValidationResult {
    let mut disk_paths: HashMap<&str, &str> = HashMap::new();

    for (name, device) in devices {
        validate_device(name, device)?;

        if !device.is_disk() {
            continue;
        }
        let path = device.get(dev_keys::PATH).unwrap_or_default();
        if let Some(first) = disk_paths.insert(path, name.as_str()) {
            return Err(ValidationError::DuplicateDiskPath {
                first: first.to_string(),
                second: name.clone(),
                path: path.to_string(),
            });
        }

        if is_new_instance
            && device.is_root_disk()
            && super::is_true(device.get(dev_keys::READONLY))
        {
            return Err(ValidationError::ReadOnlyRootDisk(name.clone()));
        }
    }

    if !is_profile && !devices.has_root_disk() {
        return Err(ValidationError::MissingRootDisk);
    }

    Ok(())
}

/// Check a container name. Snapshots are `<container>/<snapshot>`.
pub fn validate_container_name(name: &str) -> ValidationResult {
    let fail = |reason: &str| ValidationError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = name.splitn(2, '/');
    for part in parts.by_ref() {
        let first = part.chars().next().ok_or_else(|| fail("empty name"))?;
        if part.len() > MAX_NAME_LEN {
            return Err(fail("too long"));
        }
        if !first.is_ascii_alphabetic() {
            return Err(fail("must start with a letter"));
        }
        if part.ends_with('-') {
            return Err(fail("can't end with a hyphen"));
        }
        if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(fail("only letters, digits and hyphens are allowed"));
        }
    }
    if name.matches('/').count() > 1 {
        return Err(fail("only one snapshot separator is allowed"));
    }

    Ok(())
}
