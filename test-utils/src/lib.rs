//! Shared fixtures for lxbox integration tests.
//!
//! - [`FakeEngineFactory`]: in-memory engine that records every call
//! - [`RecordingNetwork`]: counts lease refreshes, optionally failing
//! - [`FaultyStore`]: SQLite store with injectable update/insert failures
//! - [`TestContext`]: runtime on a temp home wired to all of the above

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lxbox::db::{ContainerStore, SqliteStore};
use lxbox::runtime::layout::FilesystemLayout;
use lxbox::{
    ContainerArgs, ContainerRuntime, DriverKind, Engine, EngineFactory, EngineState, IdmapOptions,
    LxboxError, LxboxResult, NetworkNotifier, Profile, RuntimeOptions,
};
use parking_lot::Mutex;
use tempfile::TempDir;

// ============================================================================
// ENGINE
// ============================================================================

/// One recorded engine call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCall {
    Start {
        name: String,
        restore_from: Option<PathBuf>,
    },
    Stop {
        name: String,
        checkpoint_to: Option<PathBuf>,
    },
    Shutdown {
        name: String,
        timeout: Duration,
    },
}

#[derive(Default)]
struct EngineShared {
    states: HashMap<String, EngineState>,
    calls: Vec<EngineCall>,
    opened: Vec<(String, DriverKind)>,
    fail_open: HashSet<String>,
    fail_start: HashSet<String>,
    fail_state: HashSet<String>,
}

/// Engine factory whose containers live in a shared map.
#[derive(Clone, Default)]
pub struct FakeEngineFactory {
    shared: Arc<Mutex<EngineShared>>,
}

impl FakeEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail for `name`.
    pub fn fail_open(&self, name: &str) {
        self.shared.lock().fail_open.insert(name.to_string());
    }

    /// Make `start` fail for `name`.
    pub fn fail_start(&self, name: &str) {
        self.shared.lock().fail_start.insert(name.to_string());
    }

    /// Make `state` fail for `name`.
    pub fn fail_state(&self, name: &str) {
        self.shared.lock().fail_state.insert(name.to_string());
    }

    pub fn set_state(&self, name: &str, state: EngineState) {
        self.shared.lock().states.insert(name.to_string(), state);
    }

    pub fn state_of(&self, name: &str) -> EngineState {
        self.shared
            .lock()
            .states
            .get(name)
            .copied()
            .unwrap_or(EngineState::Stopped)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.shared.lock().calls.clone()
    }

    /// `(name, driver)` for every successful `open`.
    pub fn opened(&self) -> Vec<(String, DriverKind)> {
        self.shared.lock().opened.clone()
    }
}

impl EngineFactory for FakeEngineFactory {
    fn open(&self, name: &str, kind: DriverKind) -> LxboxResult<Box<dyn Engine>> {
        let mut shared = self.shared.lock();
        if shared.fail_open.contains(name) {
            return Err(LxboxError::Engine(format!("injected open failure for {}", name)));
        }
        shared.opened.push((name.to_string(), kind));
        Ok(Box::new(FakeEngine {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

pub struct FakeEngine {
    name: String,
    shared: Arc<Mutex<EngineShared>>,
}

impl FakeEngine {
    fn transition(&self, call: EngineCall, to: EngineState) {
        let mut shared = self.shared.lock();
        shared.calls.push(call);
        shared.states.insert(self.name.clone(), to);
    }
}

impl Engine for FakeEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, restore_from: Option<&Path>) -> LxboxResult<()> {
        if self.shared.lock().fail_start.contains(&self.name) {
            return Err(LxboxError::Engine(format!("injected start failure for {}", self.name)));
        }
        self.transition(
            EngineCall::Start {
                name: self.name.clone(),
                restore_from: restore_from.map(Path::to_path_buf),
            },
            EngineState::Running,
        );
        Ok(())
    }

    fn stop(&self, checkpoint_to: Option<&Path>) -> LxboxResult<()> {
        self.transition(
            EngineCall::Stop {
                name: self.name.clone(),
                checkpoint_to: checkpoint_to.map(Path::to_path_buf),
            },
            EngineState::Stopped,
        );
        Ok(())
    }

    fn shutdown(&self, timeout: Duration) -> LxboxResult<()> {
        self.transition(
            EngineCall::Shutdown {
                name: self.name.clone(),
                timeout,
            },
            EngineState::Stopped,
        );
        Ok(())
    }

    fn state(&self) -> LxboxResult<EngineState> {
        let shared = self.shared.lock();
        if shared.fail_state.contains(&self.name) {
            return Err(LxboxError::Engine(format!("injected state failure for {}", self.name)));
        }
        Ok(shared
            .states
            .get(&self.name)
            .copied()
            .unwrap_or(EngineState::Stopped))
    }
}

// ============================================================================
// NETWORK
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingNetwork {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NetworkNotifier for RecordingNetwork {
    fn update_static_leases(&self) -> LxboxResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(LxboxError::Network("injected lease failure".into()));
        }
        Ok(())
    }
}

// ============================================================================
// STORE
// ============================================================================

type UpdatePredicate = Box<dyn Fn(&ContainerArgs) -> bool + Send + Sync>;

/// SQLite store that can be told to fail container updates.
pub struct FaultyStore {
    inner: SqliteStore,
    fail_update: Mutex<Option<UpdatePredicate>>,
    updates: AtomicUsize,
}

impl FaultyStore {
    pub fn open(path: &Path) -> LxboxResult<Self> {
        Ok(Self {
            inner: SqliteStore::open(path)?,
            fail_update: Mutex::new(None),
            updates: AtomicUsize::new(0),
        })
    }

    /// Fail every `container_update` whose new record matches `predicate`.
    pub fn fail_updates_if<F>(&self, predicate: F)
    where
        F: Fn(&ContainerArgs) -> bool + Send + Sync + 'static,
    {
        *self.fail_update.lock() = Some(Box::new(predicate));
    }

    pub fn clear_failures(&self) {
        *self.fail_update.lock() = None;
    }

    /// Successful `container_update` calls so far.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl ContainerStore for FaultyStore {
    fn container_insert(&self, args: &ContainerArgs) -> LxboxResult<i64> {
        self.inner.container_insert(args)
    }

    fn container_get(&self, name: &str) -> LxboxResult<Option<ContainerArgs>> {
        self.inner.container_get(name)
    }

    fn container_update(&self, name: &str, args: &ContainerArgs) -> LxboxResult<()> {
        if let Some(predicate) = self.fail_update.lock().as_ref()
            && predicate(args)
        {
            return Err(LxboxError::Database(format!("injected update failure for {}", name)));
        }
        self.inner.container_update(name, args)?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn container_set_stateful(&self, name: &str, stateful: bool) -> LxboxResult<()> {
        self.inner.container_set_stateful(name, stateful)
    }

    fn container_touch(&self, name: &str, when: DateTime<Utc>) -> LxboxResult<()> {
        self.inner.container_touch(name, when)
    }

    fn container_remove(&self, name: &str) -> LxboxResult<()> {
        self.inner.container_remove(name)
    }

    fn container_names(&self) -> LxboxResult<Vec<String>> {
        self.inner.container_names()
    }

    fn profile_get(&self, name: &str) -> LxboxResult<Option<Profile>> {
        self.inner.profile_get(name)
    }

    fn profile_put(&self, profile: &Profile) -> LxboxResult<()> {
        self.inner.profile_put(profile)
    }

    fn profile_names(&self) -> LxboxResult<Vec<String>> {
        self.inner.profile_names()
    }
}

// ============================================================================
// TEST CONTEXT
// ============================================================================

/// Test context with isolated runtime and automatic cleanup.
pub struct TestContext {
    pub runtime: ContainerRuntime,
    pub engines: FakeEngineFactory,
    pub network: Arc<RecordingNetwork>,
    pub store: Arc<FaultyStore>,
    temp_dir: TempDir, // Dropped after test
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_options(|_| {})
    }

    /// Context whose runtime options are adjusted by `configure` first.
    ///
    /// Defaults: fixed idmap range, no home lock, and a VM accelerator file
    /// that exists.
    pub fn with_options(configure: impl FnOnce(&mut RuntimeOptions)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let accelerator = temp_dir.path().join("kvm");
        std::fs::write(&accelerator, b"").expect("Failed to create accelerator file");

        let mut options = RuntimeOptions::with_home(temp_dir.path().join("home"));
        options.idmap = IdmapOptions::default();
        options.vm_accelerator = accelerator;
        options.lock_home = false;
        configure(&mut options);

        let engines = FakeEngineFactory::new();
        let network = Arc::new(RecordingNetwork::new());
        let store = Arc::new(Self::open_store(&options.home_dir));
        let runtime = Self::build(options, &engines, &network, &store);

        Self {
            runtime,
            engines,
            network,
            store,
            temp_dir,
        }
    }

    fn open_store(home_dir: &Path) -> FaultyStore {
        let layout = FilesystemLayout::new(home_dir.to_path_buf());
        layout.prepare().expect("Failed to prepare home dir");
        FaultyStore::open(&layout.db_path()).expect("Failed to open store")
    }

    fn build(
        options: RuntimeOptions,
        engines: &FakeEngineFactory,
        network: &Arc<RecordingNetwork>,
        store: &Arc<FaultyStore>,
    ) -> ContainerRuntime {
        ContainerRuntime::builder(options)
            .engine_factory(Arc::new(engines.clone()))
            .network(Arc::clone(network) as Arc<dyn NetworkNotifier>)
            .store(Arc::clone(store) as Arc<dyn ContainerStore>)
            .build()
            .expect("Failed to create runtime")
    }

    /// Simulate a restart: fresh runtime, store connection and engine
    /// handles over the same home directory.
    pub fn restart(&mut self) {
        let options = self.runtime.options().clone();
        self.store = Arc::new(Self::open_store(&options.home_dir));
        self.runtime = Self::build(options, &self.engines, &self.network, &self.store);
    }

    pub fn home(&self) -> &Path {
        self.runtime.layout().home_dir()
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory a `dir` backend keeps `name` in.
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.runtime.layout().container_path(name)
    }

    /// Persisted record for `name`, bypassing the runtime.
    pub fn record(&self, name: &str) -> Option<ContainerArgs> {
        self.store.container_get(name).expect("Failed to read store")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
