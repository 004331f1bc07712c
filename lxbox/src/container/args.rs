//! Creation/load request for a container.

use crate::config::{ConfigMap, DEFAULT_PROFILE};
use crate::device::{Device, DeviceSet};
use crate::errors::LxboxError;
use crate::runtime::layout::is_snapshot_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CPU architecture a container runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    I686,
    X86_64,
    Armv7l,
    Aarch64,
    Ppc64le,
    S390x,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::I686 => "i686",
            Architecture::X86_64 => "x86_64",
            Architecture::Armv7l => "armv7l",
            Architecture::Aarch64 => "aarch64",
            Architecture::Ppc64le => "ppc64le",
            Architecture::S390x => "s390x",
        }
    }

    /// Architecture of the running host, falling back to x86_64.
    pub fn host() -> Self {
        match std::env::consts::ARCH {
            "x86" => Architecture::I686,
            "arm" => Architecture::Armv7l,
            "aarch64" => Architecture::Aarch64,
            "powerpc64" => Architecture::Ppc64le,
            "s390x" => Architecture::S390x,
            _ => Architecture::X86_64,
        }
    }
}

impl FromStr for Architecture {
    type Err = LxboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i686" | "i386" => Ok(Architecture::I686),
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "armv7l" | "armhf" => Ok(Architecture::Armv7l),
            "aarch64" | "arm64" => Ok(Architecture::Aarch64),
            "ppc64le" | "ppc64el" => Ok(Architecture::Ppc64le),
            "s390x" => Ok(Architecture::S390x),
            _ => Err(LxboxError::InvalidArgument(format!(
                "unknown architecture: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regular container or snapshot of one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    #[default]
    Regular,
    Snapshot,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Regular => "regular",
            ContainerType::Snapshot => "snapshot",
        }
    }
}

impl FromStr for ContainerType {
    type Err = LxboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(ContainerType::Regular),
            "snapshot" => Ok(ContainerType::Snapshot),
            _ => Err(LxboxError::InvalidArgument(format!(
                "unknown container type: {}",
                s
            ))),
        }
    }
}

/// Which driver runs a container: OS-level container or hardware VM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Native,
    Vm,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Native => "native",
            DriverKind::Vm => "vm",
        }
    }
}

impl FromStr for DriverKind {
    type Err = LxboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" | "container" => Ok(DriverKind::Native),
            "vm" | "virtual-machine" => Ok(DriverKind::Vm),
            _ => Err(LxboxError::InvalidArgument(format!(
                "Unknown driver: '{}'. Supported: native, vm",
                s
            ))),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to create or load a container.
///
/// Built by the caller (or read back from the store) and never modified by
/// the drivers, which copy what they keep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerArgs {
    /// Store-assigned id, 0 before the container is persisted.
    pub id: i64,
    pub name: String,
    pub ephemeral: bool,
    pub architecture: Architecture,
    pub ctype: ContainerType,
    pub driver: DriverKind,
    pub stateful: bool,
    pub creation_date: DateTime<Utc>,
    pub last_used_date: Option<DateTime<Utc>>,
    /// Applied in order; later profiles override earlier ones.
    pub profiles: Vec<String>,
    pub config: ConfigMap,
    pub devices: DeviceSet,
}

impl ContainerArgs {
    /// Args for a new container using the `default` profile.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let ctype = if is_snapshot_name(&name) {
            ContainerType::Snapshot
        } else {
            ContainerType::Regular
        };
        Self {
            id: 0,
            name,
            ephemeral: false,
            architecture: Architecture::host(),
            ctype,
            driver: DriverKind::Native,
            stateful: false,
            creation_date: Utc::now(),
            last_used_date: None,
            profiles: vec![DEFAULT_PROFILE.to_string()],
            config: ConfigMap::new(),
            devices: DeviceSet::new(),
        }
    }

    pub fn with_driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_device(mut self, name: impl Into<String>, device: Device) -> Self {
        self.devices.insert(name, device);
        self
    }

    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn is_snapshot(&self) -> bool {
        self.ctype == ContainerType::Snapshot
    }
}
