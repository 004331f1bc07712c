//! Hardware-virtualized container driver.
//!
//! Wraps a [`NativeContainer`] and overrides `start`, `stop` and
//! `shutdown`. Config, devices, idmaps, storage and persistence are the
//! base driver's.

use super::{
    Architecture, Container, ContainerArgs, ContainerInit, ContainerType, DriverKind,
    NativeContainer,
};
use crate::config::ConfigMap;
use crate::device::DeviceSet;
use crate::engine::ContainerStatus;
use crate::errors::{LxboxError, LxboxResult};
use crate::idmap::IdmapSet;
use crate::storage::StorageKind;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct VmContainer {
    base: NativeContainer,
}

impl VmContainer {
    pub(crate) fn new(base: NativeContainer) -> Self {
        Self { base }
    }

    /// VMs can't boot without the hardware accelerator device.
    fn check_accelerator(&self) -> LxboxResult<()> {
        let accelerator = &self.base.runtime().options.vm_accelerator;
        if !accelerator.exists() {
            return Err(LxboxError::Unsupported(format!(
                "cannot start VM {}: accelerator {} is not available",
                self.base.name(),
                accelerator.display()
            )));
        }
        Ok(())
    }
}

impl ContainerInit for VmContainer {
    fn init(&mut self) -> LxboxResult<()> {
        self.base.init()
    }

    fn discard(&mut self) -> LxboxResult<()> {
        self.base.discard()
    }
}

impl Container for VmContainer {
    fn id(&self) -> i64 {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn driver(&self) -> DriverKind {
        DriverKind::Vm
    }

    fn architecture(&self) -> Architecture {
        self.base.architecture()
    }

    fn container_type(&self) -> ContainerType {
        self.base.container_type()
    }

    fn is_ephemeral(&self) -> bool {
        self.base.is_ephemeral()
    }

    fn is_stateful(&self) -> bool {
        self.base.is_stateful()
    }

    fn creation_date(&self) -> DateTime<Utc> {
        self.base.creation_date()
    }

    fn last_used_date(&self) -> Option<DateTime<Utc>> {
        self.base.last_used_date()
    }

    fn profiles(&self) -> &[String] {
        self.base.profiles()
    }

    fn local_config(&self) -> &ConfigMap {
        self.base.local_config()
    }

    fn local_devices(&self) -> &DeviceSet {
        self.base.local_devices()
    }

    fn expanded_config(&self) -> &ConfigMap {
        self.base.expanded_config()
    }

    fn expanded_devices(&self) -> &DeviceSet {
        self.base.expanded_devices()
    }

    fn update(&mut self, args: &ContainerArgs, user_requested: bool) -> LxboxResult<()> {
        self.base.update(args, user_requested)
    }

    fn config_key_set(&mut self, key: &str, value: &str) -> LxboxResult<()> {
        self.base.config_key_set(key, value)
    }

    fn idmap_set(&self) -> LxboxResult<Option<IdmapSet>> {
        self.base.idmap_set()
    }

    fn last_idmap_set(&self) -> LxboxResult<Option<IdmapSet>> {
        self.base.last_idmap_set()
    }

    fn storage_kind(&self) -> StorageKind {
        self.base.storage_kind()
    }

    fn path(&self) -> PathBuf {
        self.base.path()
    }

    fn start(&mut self, stateful: bool) -> LxboxResult<()> {
        self.check_accelerator()?;

        tracing::info!(container = %self.name(), driver = "vm", stateful, "Booting VM");
        let started = Instant::now();
        self.base.start(stateful)?;
        tracing::info!(
            container = %self.name(),
            driver = "vm",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "VM started"
        );
        Ok(())
    }

    fn stop(&mut self, stateful: bool) -> LxboxResult<()> {
        tracing::info!(container = %self.name(), driver = "vm", stateful, "Stopping VM");
        let name = self.name().to_string();
        self.base.stop(stateful)?;
        tracing::info!(container = %name, driver = "vm", "VM stopped");
        Ok(())
    }

    fn shutdown(&mut self, timeout: Duration) -> LxboxResult<()> {
        tracing::info!(container = %self.name(), driver = "vm", ?timeout, "Shutting down VM");
        let name = self.name().to_string();
        self.base.shutdown(timeout)?;
        tracing::info!(container = %name, driver = "vm", "VM shut down");
        Ok(())
    }

    fn delete(&mut self) -> LxboxResult<()> {
        self.base.delete()
    }

    fn status(&self) -> LxboxResult<ContainerStatus> {
        self.base.status()
    }
}
