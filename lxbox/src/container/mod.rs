//! Container drivers and the create/load pipelines.
//!
//! Callers only ever see `Box<dyn Container>`. Two drivers implement it:
//!
//! - [`NativeContainer`]: OS-level containers; owns all config, device,
//!   idmap and persistence behavior.
//! - [`VmContainer`]: hardware-virtualized containers; wraps a
//!   `NativeContainer` and only specializes the lifecycle verbs.
//!
//! The driver is chosen by [`ContainerArgs::driver`].

mod args;
mod native;
mod pipeline;
mod vm;

pub use args::{Architecture, ContainerArgs, ContainerType, DriverKind};
pub use native::NativeContainer;
pub use vm::VmContainer;

pub(crate) use pipeline::{create, load};

use crate::config::ConfigMap;
use crate::device::DeviceSet;
use crate::engine::ContainerStatus;
use crate::errors::LxboxResult;
use crate::idmap::IdmapSet;
use crate::storage::StorageKind;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Capability set every container driver provides.
pub trait Container: fmt::Debug + Send + Sync {
    // ========================================================================
    // IDENTITY
    // ========================================================================

    /// Store id.
    fn id(&self) -> i64;
    fn name(&self) -> &str;
    fn driver(&self) -> DriverKind;
    fn architecture(&self) -> Architecture;
    fn container_type(&self) -> ContainerType;
    fn is_ephemeral(&self) -> bool;

    /// True while a checkpoint from a stateful stop is waiting to be restored.
    fn is_stateful(&self) -> bool;
    fn creation_date(&self) -> DateTime<Utc>;
    fn last_used_date(&self) -> Option<DateTime<Utc>>;

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    fn profiles(&self) -> &[String];
    fn local_config(&self) -> &ConfigMap;
    fn local_devices(&self) -> &DeviceSet;

    /// Profiles merged under local config.
    fn expanded_config(&self) -> &ConfigMap;

    /// Profile devices merged under local devices.
    fn expanded_devices(&self) -> &DeviceSet;

    /// Replace profiles, local config and local devices.
    ///
    /// Re-expands and re-validates before anything is changed; on error the
    /// container and its persisted record are untouched. With
    /// `user_requested`, changes to daemon-owned `volatile.*` keys are
    /// refused.
    fn update(&mut self, args: &ContainerArgs, user_requested: bool) -> LxboxResult<()>;

    /// Set one local config key through [`Container::update`].
    fn config_key_set(&mut self, key: &str, value: &str) -> LxboxResult<()>;

    /// Idmap the current config calls for. `None` means no mapping.
    fn idmap_set(&self) -> LxboxResult<Option<IdmapSet>>;

    /// Idmap persisted under `volatile.last_state.idmap`.
    fn last_idmap_set(&self) -> LxboxResult<Option<IdmapSet>>;

    // ========================================================================
    // STORAGE
    // ========================================================================

    fn storage_kind(&self) -> StorageKind;

    /// Host path of the container's filesystem.
    fn path(&self) -> PathBuf;

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    fn start(&mut self, stateful: bool) -> LxboxResult<()>;
    fn stop(&mut self, stateful: bool) -> LxboxResult<()>;
    fn shutdown(&mut self, timeout: Duration) -> LxboxResult<()>;

    /// Remove storage and the persisted record.
    fn delete(&mut self) -> LxboxResult<()>;

    /// Current engine state. Never cached.
    fn status(&self) -> LxboxResult<ContainerStatus>;
}

/// Second construction phase shared by the create and load pipelines.
pub(crate) trait ContainerInit: Container {
    /// Load profiles, expand config and devices, open the engine handle.
    fn init(&mut self) -> LxboxResult<()>;

    /// Tear down a half-created container.
    ///
    /// Unlike [`Container::delete`] this never refuses: an active engine is
    /// stopped first and storage and record removal are both attempted. The
    /// first error is returned.
    fn discard(&mut self) -> LxboxResult<()>;
}

/// Snapshot of a container's identity and configuration as creation args.
pub(crate) fn args_of(container: &dyn Container) -> ContainerArgs {
    ContainerArgs {
        id: container.id(),
        name: container.name().to_string(),
        ephemeral: container.is_ephemeral(),
        architecture: container.architecture(),
        ctype: container.container_type(),
        driver: container.driver(),
        stateful: container.is_stateful(),
        creation_date: container.creation_date(),
        last_used_date: container.last_used_date(),
        profiles: container.profiles().to_vec(),
        config: container.local_config().clone(),
        devices: container.local_devices().clone(),
    }
}
