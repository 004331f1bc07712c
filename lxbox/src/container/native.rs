//! OS-level container driver.

use super::{Architecture, Container, ContainerArgs, ContainerInit, ContainerType, DriverKind};
use crate::config::{
    ConfigMap, Profile, expand_config, expand_devices, keys, validate_config, validate_device,
    validate_devices,
};
use crate::device::DeviceSet;
use crate::engine::{ContainerStatus, Engine, EngineState};
use crate::errors::{LxboxError, LxboxResult};
use crate::idmap::{self, IdmapSet};
use crate::runtime::RuntimeInner;
use crate::storage::{StorageBackend, StorageKind};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Base driver. Implements the whole [`Container`] contract.
pub struct NativeContainer {
    runtime: RuntimeInner,

    id: i64,
    name: String,
    driver: DriverKind,
    architecture: Architecture,
    ctype: ContainerType,
    ephemeral: bool,
    stateful: bool,
    creation_date: DateTime<Utc>,
    last_used_date: Option<DateTime<Utc>>,

    profiles: Vec<String>,
    local_config: ConfigMap,
    local_devices: DeviceSet,
    expanded_config: ConfigMap,
    expanded_devices: DeviceSet,

    storage: Arc<dyn StorageBackend>,
    /// Opened by `init()`.
    engine: Option<Box<dyn Engine>>,
}

impl std::fmt::Debug for NativeContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeContainer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("storage", &self.storage.kind())
            .field("initialized", &self.engine.is_some())
            .finish()
    }
}

impl NativeContainer {
    /// Populate a driver from `args` with `storage` attached. Nothing is
    /// expanded until `init()`.
    pub(crate) fn new(
        runtime: RuntimeInner,
        args: &ContainerArgs,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            runtime,
            id: args.id,
            name: args.name.clone(),
            driver: args.driver,
            architecture: args.architecture,
            ctype: args.ctype,
            ephemeral: args.ephemeral,
            stateful: args.stateful,
            creation_date: args.creation_date,
            last_used_date: args.last_used_date,
            profiles: args.profiles.clone(),
            local_config: args.config.clone(),
            local_devices: args.devices.clone(),
            expanded_config: ConfigMap::new(),
            expanded_devices: DeviceSet::new(),
            storage,
            engine: None,
        }
    }

    pub(crate) fn runtime(&self) -> &RuntimeInner {
        &self.runtime
    }

    fn engine(&self) -> LxboxResult<&dyn Engine> {
        self.engine.as_deref().ok_or_else(|| {
            LxboxError::InvalidState(format!("container {} is not initialized", self.name))
        })
    }

    fn engine_state(&self) -> LxboxResult<EngineState> {
        self.engine()?.state()
    }

    fn load_profiles(&self, names: &[String]) -> LxboxResult<Vec<Profile>> {
        names
            .iter()
            .map(|name| {
                self.runtime
                    .store
                    .profile_get(name)?
                    .ok_or_else(|| LxboxError::NotFound(format!("profile {}", name)))
            })
            .collect()
    }

    fn state_path(&self) -> PathBuf {
        self.runtime.layout.state_path(&self.name)
    }

    fn clear_state(&mut self) -> LxboxResult<()> {
        let path = self.state_path();
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|e| {
                LxboxError::Storage(format!("failed to remove {}: {}", path.display(), e))
            })?;
        }
        self.runtime.store.container_set_stateful(&self.name, false)?;
        self.stateful = false;
        Ok(())
    }

    /// Persist the current idmap if it differs from the recorded one.
    fn refresh_idmap(&mut self) -> LxboxResult<()> {
        let current = self.idmap_set()?;
        if current == self.last_idmap_set()? {
            return Ok(());
        }
        tracing::debug!(container = %self.name, "Idmap changed, persisting");
        let json = idmap::serialize(current.as_ref())?;
        self.config_key_set(keys::VOLATILE_LAST_STATE_IDMAP, &json)
    }

    /// After a clean stop: ephemeral containers go away.
    fn on_stopped(&mut self) -> LxboxResult<()> {
        if self.ephemeral {
            tracing::info!(container = %self.name, "Deleting ephemeral container after stop");
            return self.delete();
        }
        Ok(())
    }

    fn ensure_active(&self, verb: &str) -> LxboxResult<()> {
        if !self.engine_state()?.is_active() {
            return Err(LxboxError::InvalidState(format!(
                "cannot {} {}: container is not running",
                verb, self.name
            )));
        }
        Ok(())
    }
}

/// Reject changes to daemon-owned keys between `old` and `new`.
fn check_volatile_unchanged(old: &ConfigMap, new: &ConfigMap) -> LxboxResult<()> {
    let changed = old
        .keys()
        .chain(new.keys())
        .filter(|key| key.starts_with(keys::VOLATILE_PREFIX))
        .find(|key| old.get(*key) != new.get(*key));

    match changed {
        Some(key) => Err(LxboxError::InvalidArgument(format!(
            "volatile key {} can't be changed",
            key
        ))),
        None => Ok(()),
    }
}

impl ContainerInit for NativeContainer {
    fn init(&mut self) -> LxboxResult<()> {
        let profiles = self.load_profiles(&self.profiles)?;
        self.expanded_config = expand_config(&profiles, &self.local_config);
        self.expanded_devices = expand_devices(&profiles, &self.local_devices);

        self.engine = Some(self.runtime.engines.open(&self.name, self.driver)?);

        tracing::debug!(
            container = %self.name,
            driver = %self.driver,
            profiles = ?self.profiles,
            devices = ?self.expanded_devices.names(),
            "Initialized container"
        );
        Ok(())
    }

    fn discard(&mut self) -> LxboxResult<()> {
        if let Some(engine) = self.engine.as_deref() {
            match engine.state() {
                Ok(state) if state.is_active() => {
                    if let Err(e) = engine.stop(None) {
                        tracing::warn!(container = %self.name, error = %e, "Failed to stop engine before discard");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(container = %self.name, error = %e, "Engine state unknown, discarding anyway");
                }
            }
        }

        let storage_result = self.storage.container_delete(&self.name);
        let record_result = self.runtime.store.container_remove(&self.name);
        storage_result.and(record_result)?;

        tracing::info!(container = %self.name, storage = %self.storage.kind(), "Discarded container");
        Ok(())
    }
}

impl Container for NativeContainer {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn driver(&self) -> DriverKind {
        self.driver
    }

    fn architecture(&self) -> Architecture {
        self.architecture
    }

    fn container_type(&self) -> ContainerType {
        self.ctype
    }

    fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    fn is_stateful(&self) -> bool {
        self.stateful
    }

    fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    fn last_used_date(&self) -> Option<DateTime<Utc>> {
        self.last_used_date
    }

    fn profiles(&self) -> &[String] {
        &self.profiles
    }

    fn local_config(&self) -> &ConfigMap {
        &self.local_config
    }

    fn local_devices(&self) -> &DeviceSet {
        &self.local_devices
    }

    fn expanded_config(&self) -> &ConfigMap {
        &self.expanded_config
    }

    fn expanded_devices(&self) -> &DeviceSet {
        &self.expanded_devices
    }

    fn update(&mut self, args: &ContainerArgs, user_requested: bool) -> LxboxResult<()> {
        validate_config(&args.config, false, false)?;
        for (name, device) in &args.devices {
            validate_device(name, device)?;
        }
        if user_requested {
            check_volatile_unchanged(&self.local_config, &args.config)?;
        }

        let profiles = self.load_profiles(&args.profiles)?;
        let expanded_config = expand_config(&profiles, &args.config);
        let expanded_devices = expand_devices(&profiles, &args.devices);
        validate_config(&expanded_config, false, false)?;
        validate_devices(&expanded_devices, false, false)?;

        let mut record = args.clone();
        record.name = self.name.clone();
        self.runtime.store.container_update(&self.name, &record)?;

        let diff = self.expanded_devices.diff(&expanded_devices);
        if !diff.is_empty() {
            tracing::debug!(
                container = %self.name,
                added = ?diff.added,
                removed = ?diff.removed,
                updated = ?diff.updated,
                "Devices changed"
            );
        }

        self.architecture = args.architecture;
        self.ephemeral = args.ephemeral;
        self.profiles = args.profiles.clone();
        self.local_config = args.config.clone();
        self.local_devices = args.devices.clone();
        self.expanded_config = expanded_config;
        self.expanded_devices = expanded_devices;

        tracing::debug!(container = %self.name, user_requested, "Updated container");
        Ok(())
    }

    fn config_key_set(&mut self, key: &str, value: &str) -> LxboxResult<()> {
        let mut args = super::args_of(&*self);
        args.config.insert(key.to_string(), value.to_string());
        self.update(&args, false)
    }

    fn idmap_set(&self) -> LxboxResult<Option<IdmapSet>> {
        idmap::compute(&self.expanded_config, &self.runtime.options.idmap)
    }

    fn last_idmap_set(&self) -> LxboxResult<Option<IdmapSet>> {
        match self.expanded_config.get(keys::VOLATILE_LAST_STATE_IDMAP) {
            None => Ok(None),
            Some(json) => {
                let set = IdmapSet::parse(json)?;
                Ok((!set.is_empty()).then_some(set))
            }
        }
    }

    fn storage_kind(&self) -> StorageKind {
        self.storage.kind()
    }

    fn path(&self) -> PathBuf {
        self.storage.container_path(&self.name)
    }

    fn start(&mut self, stateful: bool) -> LxboxResult<()> {
        if self.engine_state()?.is_active() {
            return Err(LxboxError::InvalidState(format!(
                "container {} is already running",
                self.name
            )));
        }

        self.refresh_idmap()?;

        if stateful {
            let state_path = self.state_path();
            if !self.stateful || !state_path.is_dir() {
                return Err(LxboxError::InvalidState(format!(
                    "container {} has no saved state to restore",
                    self.name
                )));
            }
            self.engine()?.start(Some(&state_path))?;
            self.clear_state()?;
        } else {
            if self.stateful {
                // Stateless start discards the checkpoint
                self.clear_state()?;
            }
            self.engine()?.start(None)?;
        }

        let now = Utc::now();
        self.runtime.store.container_touch(&self.name, now)?;
        self.last_used_date = Some(now);

        tracing::info!(container = %self.name, stateful, "Started container");
        Ok(())
    }

    fn stop(&mut self, stateful: bool) -> LxboxResult<()> {
        self.ensure_active("stop")?;

        if stateful {
            let state_path = self.state_path();
            if state_path.exists() {
                std::fs::remove_dir_all(&state_path).map_err(|e| {
                    LxboxError::Storage(format!("failed to remove {}: {}", state_path.display(), e))
                })?;
            }
            std::fs::create_dir_all(&state_path).map_err(|e| {
                LxboxError::Storage(format!("failed to create {}: {}", state_path.display(), e))
            })?;

            if let Err(e) = self.engine()?.stop(Some(&state_path)) {
                let _ = std::fs::remove_dir_all(&state_path);
                return Err(e);
            }
            self.runtime.store.container_set_stateful(&self.name, true)?;
            self.stateful = true;

            tracing::info!(container = %self.name, path = %state_path.display(), "Stopped container with checkpoint");
            return Ok(());
        }

        self.engine()?.stop(None)?;
        tracing::info!(container = %self.name, "Stopped container");
        self.on_stopped()
    }

    fn shutdown(&mut self, timeout: Duration) -> LxboxResult<()> {
        self.ensure_active("shut down")?;

        self.engine()?.shutdown(timeout)?;
        tracing::info!(container = %self.name, ?timeout, "Shut down container");
        self.on_stopped()
    }

    fn delete(&mut self) -> LxboxResult<()> {
        if let Some(engine) = self.engine.as_deref()
            && engine.state()?.is_active()
        {
            return Err(LxboxError::InvalidState(format!(
                "cannot delete {}: container is running",
                self.name
            )));
        }

        self.storage.container_delete(&self.name)?;
        self.runtime.store.container_remove(&self.name)?;

        tracing::info!(container = %self.name, storage = %self.storage.kind(), "Deleted container");
        Ok(())
    }

    fn status(&self) -> LxboxResult<ContainerStatus> {
        Ok(ContainerStatus::new(self.engine_state()?))
    }
}
