//! Create and load pipelines.
//!
//! Create runs these steps in order; any failure deletes the partially built
//! container before the error is returned:
//!
//! ```text
//! 1. insert the record, construct driver, attach default storage, allocate it
//! 2. init()
//! 3. root disk completion (update with a synthesized `root` disk)
//! 4. validate_config(expanded, is_profile = false, is_new_instance = true)
//! 5. validate_devices(expanded, is_profile = false, is_new_instance = true)
//! 6. persist idmap under volatile.last_state.idmap ("[]" when none)
//! 7. refresh network leases (best effort, never rolls back)
//! ```
//!
//! Load resolves storage from disk, runs `init()` and returns. It never
//! validates and never deletes.

use super::{Container, ContainerArgs, ContainerInit, DriverKind, NativeContainer, VmContainer};
use crate::config::{keys, validate_config, validate_devices};
use crate::device::{Device, DeviceSet};
use crate::errors::{LxboxError, LxboxResult};
use crate::idmap;
use crate::runtime::RuntimeInner;
use crate::runtime::constants::root_disk;
use crate::storage::StorageBackend;
use std::sync::Arc;

// ============================================================================
// ROLLBACK GUARD
// ============================================================================

/// Deletes the container on drop unless disarmed.
struct RollbackGuard<'a> {
    container: &'a mut dyn ContainerInit,
    armed: bool,
}

impl<'a> RollbackGuard<'a> {
    fn new(container: &'a mut dyn ContainerInit) -> Self {
        Self {
            container,
            armed: true,
        }
    }

    fn container(&mut self) -> &mut dyn ContainerInit {
        &mut *self.container
    }

    /// Disarm the guard (call on success).
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let name = self.container.name().to_string();
        tracing::warn!(container = %name, "Container creation failed, rolling back");

        if let Err(e) = self.container.discard() {
            tracing::warn!(container = %name, error = %e, "Failed to delete container during rollback");
        }
    }
}

// ============================================================================
// STEPS
// ============================================================================

fn construct(
    runtime: &RuntimeInner,
    args: &ContainerArgs,
    storage: Arc<dyn StorageBackend>,
) -> Box<dyn ContainerInit> {
    let base = NativeContainer::new(Arc::clone(runtime), args, storage);
    match args.driver {
        DriverKind::Native => Box::new(base),
        DriverKind::Vm => Box::new(VmContainer::new(base)),
    }
}

/// Name for a synthesized root disk, or `None` if `devices` already has one.
fn root_disk_name(devices: &DeviceSet) -> LxboxResult<Option<String>> {
    if devices.has_root_disk() {
        return Ok(None);
    }
    devices
        .unused_name(root_disk::BASE_NAME, root_disk::MAX_NAME_ATTEMPTS)
        .map(Some)
        .ok_or_else(|| {
            LxboxError::Config(format!(
                "no free root disk name after {} attempts",
                root_disk::MAX_NAME_ATTEMPTS
            ))
        })
}

/// Add a root disk to local devices when the expanded set lacks one.
fn complete_root_disk(container: &mut dyn Container) -> LxboxResult<()> {
    let Some(name) = root_disk_name(container.expanded_devices())? else {
        return Ok(());
    };

    tracing::debug!(container = %container.name(), device = %name, "Adding root disk");
    let mut args = super::args_of(container);
    args.devices.insert(name, Device::root_disk());
    container.update(&args, false)
}

fn persist_idmap(container: &mut dyn Container) -> LxboxResult<()> {
    let idmap = container.idmap_set()?;
    let json = idmap::serialize(idmap.as_ref())?;
    container.config_key_set(keys::VOLATILE_LAST_STATE_IDMAP, &json)
}

fn run_create_steps(
    container: &mut dyn ContainerInit,
    storage: &dyn StorageBackend,
) -> LxboxResult<()> {
    storage.container_create(container.name())?;
    container.init()?;
    complete_root_disk(&mut *container)?;
    validate_config(container.expanded_config(), false, true)?;
    validate_devices(container.expanded_devices(), false, true)?;
    persist_idmap(&mut *container)
}

// ============================================================================
// PIPELINES
// ============================================================================

/// Build, normalize and persist a new container.
///
/// Fails with `AlreadyExists` before anything is rolled back if the name is
/// taken, so an existing container is never deleted.
pub(crate) fn create(runtime: &RuntimeInner, args: &ContainerArgs) -> LxboxResult<Box<dyn Container>> {
    let storage = runtime.storage.get(runtime.options.default_storage)?;

    let mut args = args.clone();
    args.id = runtime.store.container_insert(&args)?;
    let mut container = construct(runtime, &args, Arc::clone(&storage));

    {
        let mut guard = RollbackGuard::new(container.as_mut());
        run_create_steps(guard.container(), storage.as_ref())?;
        guard.disarm();
    }

    if let Err(e) = runtime.network.update_static_leases() {
        tracing::warn!(container = %args.name, error = %e, "Failed to update static leases");
    }

    tracing::info!(
        container = %args.name,
        driver = %args.driver,
        storage = %storage.kind(),
        "Created container"
    );
    Ok(container)
}

/// Attach to a persisted container. No validation, no cleanup on failure.
pub(crate) fn load(runtime: &RuntimeInner, args: &ContainerArgs) -> LxboxResult<Box<dyn Container>> {
    let probe = runtime.layout.storage_probe_path(&args.name);
    let storage = runtime.storage.for_path(&probe)?;

    let mut container = construct(runtime, args, storage);
    container.init()?;

    tracing::debug!(container = %args.name, driver = %args.driver, "Loaded container");
    Ok(container)
}
