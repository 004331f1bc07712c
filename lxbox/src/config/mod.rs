//! Container configuration: key/value maps, profiles and expansion.

pub mod expand;
pub mod validator;

use crate::device::DeviceSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use expand::{expand_config, expand_devices};
pub use validator::{ValidationError, validate_config, validate_device, validate_devices};

/// Container or profile config, iterated in key order.
pub type ConfigMap = BTreeMap<String, String>;

/// Well-known config keys.
pub mod keys {
    pub const SECURITY_PRIVILEGED: &str = "security.privileged";
    pub const SECURITY_NESTING: &str = "security.nesting";
    pub const SECURITY_IDMAP_BASE: &str = "security.idmap.base";
    pub const SECURITY_IDMAP_SIZE: &str = "security.idmap.size";
    pub const RAW_LXC: &str = "raw.lxc";

    /// Prefix of keys owned by the daemon rather than the user.
    pub const VOLATILE_PREFIX: &str = "volatile.";
    /// Prefix of keys recording runtime history.
    pub const VOLATILE_LAST_STATE_PREFIX: &str = "volatile.last_state.";
    /// Serialized idmap the container was last set up with.
    pub const VOLATILE_LAST_STATE_IDMAP: &str = "volatile.last_state.idmap";
    pub const VOLATILE_LAST_STATE_POWER: &str = "volatile.last_state.power";
}

/// Name of the profile every runtime creates on first start.
pub const DEFAULT_PROFILE: &str = "default";

/// Reusable bundle of config and devices applied under a container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub devices: DeviceSet,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ConfigMap::new(),
            devices: DeviceSet::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_device(mut self, name: impl Into<String>, device: crate::device::Device) -> Self {
        self.devices.insert(name, device);
        self
    }
}

/// Parse a config boolean the way users write them.
pub fn is_true(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}
