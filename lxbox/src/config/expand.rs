//! Layered config expansion.
//!
//! Profiles are applied in list order, then local values on top:
//!
//! ```text
//! profiles[0] → profiles[1] → ... → profiles[n-1] → local
//! (lowest)                                          (highest)
//! ```
//!
//! Both functions are pure. Drivers call them again whenever profiles,
//! local config or local devices change.

use super::{ConfigMap, Profile};
use crate::device::DeviceSet;

/// Merge profile config under local config.
pub fn expand_config(profiles: &[Profile], local: &ConfigMap) -> ConfigMap {
    let mut expanded = ConfigMap::new();

    for profile in profiles {
        for (key, value) in &profile.config {
            expanded.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in local {
        expanded.insert(key.clone(), value.clone());
    }

    expanded
}

/// Merge profile devices under local devices. Devices are replaced whole by name.
pub fn expand_devices(profiles: &[Profile], local: &DeviceSet) -> DeviceSet {
    let mut expanded = DeviceSet::new();

    for profile in profiles {
        expanded.merge(&profile.devices);
    }
    expanded.merge(local);

    expanded
}
