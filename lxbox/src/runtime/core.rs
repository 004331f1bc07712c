//! Runtime entry point: owns the shared collaborators and serializes
//! lifecycle calls per container.

use std::sync::Arc;

use crate::config::{DEFAULT_PROFILE, Profile, validate_config, validate_devices};
use crate::config::validator::validate_container_name;
use crate::container::{self, Container, ContainerArgs};
use crate::db::{ContainerStore, SqliteStore};
use crate::engine::EngineFactory;
use crate::errors::{LxboxError, LxboxResult};
use crate::network::{NetworkNotifier, NoopNetwork};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::lock::{ContainerLocks, RuntimeLock};
use crate::runtime::options::RuntimeOptions;
use crate::storage::{DirStorage, StorageBackend, StorageRegistry};
use crate::util::init_logging_for;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Entry point for creating, loading and deleting containers.
///
/// **Lock Behavior**: with `lock_home` (the default) only one runtime can use
/// a given home directory at a time. The lock is released on drop.
///
/// **Cloning**: cheap; all clones share the same state.
#[derive(Clone)]
pub struct ContainerRuntime {
    inner: RuntimeInner,
}

/// Shared runtime state handed to every driver.
pub(crate) type RuntimeInner = Arc<RuntimeInnerImpl>;

/// Immutable after construction; collaborators synchronize internally.
pub(crate) struct RuntimeInnerImpl {
    pub(crate) options: RuntimeOptions,
    pub(crate) layout: FilesystemLayout,
    pub(crate) store: Arc<dyn ContainerStore>,
    pub(crate) storage: StorageRegistry,
    pub(crate) engines: Arc<dyn EngineFactory>,
    pub(crate) network: Arc<dyn NetworkNotifier>,
    pub(crate) locks: ContainerLocks,
    _runtime_lock: Option<RuntimeLock>,
}

/// Collects collaborators for a [`ContainerRuntime`].
pub struct RuntimeBuilder {
    options: RuntimeOptions,
    store: Option<Arc<dyn ContainerStore>>,
    backends: Vec<Arc<dyn StorageBackend>>,
    engines: Option<Arc<dyn EngineFactory>>,
    network: Option<Arc<dyn NetworkNotifier>>,
}

impl RuntimeBuilder {
    /// Store to persist into. Default: SQLite at `<home>/db/lxbox.db`.
    pub fn store(mut self, store: Arc<dyn ContainerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Extra storage backend. A `dir` backend is always present unless
    /// replaced by one registered here.
    pub fn storage_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Virtualization engine. Required.
    pub fn engine_factory(mut self, engines: Arc<dyn EngineFactory>) -> Self {
        self.engines = Some(engines);
        self
    }

    /// Network hook. Default: [`NoopNetwork`].
    pub fn network(mut self, network: Arc<dyn NetworkNotifier>) -> Self {
        self.network = Some(network);
        self
    }

    /// Prepare the home directory, take the lock and open the store.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `home_dir` is not absolute, or no engine factory was given
    /// - the default storage backend is not registered
    /// - another runtime already uses the home directory
    /// - the store can't be opened
    pub fn build(self) -> LxboxResult<ContainerRuntime> {
        let options = self.options;
        if !options.home_dir.is_absolute() {
            return Err(LxboxError::Config(format!(
                "home_dir must be absolute path, got: {}",
                options.home_dir.display()
            )));
        }
        let engines = self
            .engines
            .ok_or_else(|| LxboxError::Config("an engine factory is required".into()))?;

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            LxboxError::Storage(format!(
                "Failed to initialize filesystem at {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        init_logging_for(&layout)?;

        let runtime_lock = if options.lock_home {
            Some(RuntimeLock::acquire(layout.home_dir())?)
        } else {
            None
        };

        let mut storage = StorageRegistry::new();
        storage.register(Arc::new(DirStorage::new(layout.home_dir().to_path_buf())));
        for backend in self.backends {
            storage.register(backend);
        }
        storage.get(options.default_storage).map_err(|_| {
            LxboxError::Config(format!(
                "default storage backend {} is not registered",
                options.default_storage
            ))
        })?;

        let store: Arc<dyn ContainerStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::open(&layout.db_path())?),
        };
        if store.profile_get(DEFAULT_PROFILE)?.is_none() {
            store.profile_put(&Profile::new(DEFAULT_PROFILE))?;
            tracing::debug!("Created default profile");
        }

        let inner = Arc::new(RuntimeInnerImpl {
            options,
            layout,
            store,
            storage,
            engines,
            network: self.network.unwrap_or_else(|| Arc::new(NoopNetwork)),
            locks: ContainerLocks::new(),
            _runtime_lock: runtime_lock,
        });

        tracing::debug!(
            home_dir = %inner.layout.home_dir().display(),
            default_storage = %inner.options.default_storage,
            "initialized runtime"
        );

        Ok(ContainerRuntime { inner })
    }
}

// ============================================================================
// RUNTIME IMPLEMENTATION
// ============================================================================

impl ContainerRuntime {
    pub fn builder(options: RuntimeOptions) -> RuntimeBuilder {
        RuntimeBuilder {
            options,
            store: None,
            backends: Vec::new(),
            engines: None,
            network: None,
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    /// Create a container.
    ///
    /// Any failure after the record is inserted deletes the container again,
    /// so the store never keeps a half-built record.
    pub fn create(&self, args: ContainerArgs) -> LxboxResult<Box<dyn Container>> {
        validate_container_name(&args.name)?;

        self.inner
            .locks
            .with_lock(&args.name, || container::create(&self.inner, &args))
    }

    /// Load a persisted container.
    pub fn load(&self, name: &str) -> LxboxResult<Box<dyn Container>> {
        self.inner.locks.with_lock(name, || self.load_unlocked(name))
    }

    fn load_unlocked(&self, name: &str) -> LxboxResult<Box<dyn Container>> {
        let args = self
            .inner
            .store
            .container_get(name)?
            .ok_or_else(|| LxboxError::NotFound(format!("container {}", name)))?;
        container::load(&self.inner, &args)
    }

    /// Load and delete a container.
    pub fn delete(&self, name: &str) -> LxboxResult<()> {
        self.inner
            .locks
            .with_lock(name, || self.load_unlocked(name)?.delete())
    }

    /// Names of all persisted containers, sorted.
    pub fn list(&self) -> LxboxResult<Vec<String>> {
        self.inner.store.container_names()
    }

    /// Create or replace a profile after validating it as a profile.
    pub fn create_profile(&self, profile: Profile) -> LxboxResult<()> {
        validate_config(&profile.config, true, false)?;
        validate_devices(&profile.devices, true, false)?;
        self.inner.store.profile_put(&profile)?;
        tracing::debug!(profile = %profile.name, "Saved profile");
        Ok(())
    }

    pub fn profile(&self, name: &str) -> LxboxResult<Profile> {
        self.inner
            .store
            .profile_get(name)?
            .ok_or_else(|| LxboxError::NotFound(format!("profile {}", name)))
    }

    pub fn profile_names(&self) -> LxboxResult<Vec<String>> {
        self.inner.store.profile_names()
    }
}
