//! Integration tests for runtime initialization and locking behavior.

use std::sync::Arc;

use lxbox::{ContainerRuntime, LxboxError, RuntimeOptions, StorageKind};
use lxbox_test_utils::FakeEngineFactory;
use tempfile::TempDir;

fn build(options: RuntimeOptions) -> Result<ContainerRuntime, LxboxError> {
    ContainerRuntime::builder(options)
        .engine_factory(Arc::new(FakeEngineFactory::new()))
        .build()
}

#[test]
fn test_runtime_prevents_concurrent_access() {
    let temp_dir = TempDir::new().unwrap();

    let runtime1 = build(RuntimeOptions::with_home(temp_dir.path())).unwrap();

    let result = build(RuntimeOptions::with_home(temp_dir.path()));
    let err = result.err().unwrap();
    assert!(matches!(err, LxboxError::InvalidState(_)));
    assert!(err.to_string().contains("already using"));

    drop(runtime1);

    let _runtime2 = build(RuntimeOptions::with_home(temp_dir.path())).unwrap();
}

#[test]
fn test_runtime_creates_default_profile_and_layout() {
    let temp_dir = TempDir::new().unwrap();

    let runtime = build(RuntimeOptions::with_home(temp_dir.path())).unwrap();

    let profile = runtime.profile("default").unwrap();
    assert!(profile.config.is_empty());
    assert!(profile.devices.is_empty());
    assert!(runtime.list().unwrap().is_empty());
    assert!(temp_dir.path().join("db").join("lxbox.db").exists());
    assert!(temp_dir.path().join("containers").is_dir());
    assert!(temp_dir.path().join("logs").is_dir());
}

#[test]
fn test_runtime_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    {
        let runtime = build(RuntimeOptions::with_home(temp_dir.path())).unwrap();
        runtime
            .create_profile(lxbox::Profile::new("web").with_config("limits.cpu", "2"))
            .unwrap();
    }

    let runtime = build(RuntimeOptions::with_home(temp_dir.path())).unwrap();
    assert_eq!(runtime.profile_names().unwrap(), vec!["default", "web"]);
}

#[test]
fn test_runtime_requires_engine_factory() {
    let temp_dir = TempDir::new().unwrap();

    let result = ContainerRuntime::builder(RuntimeOptions::with_home(temp_dir.path())).build();
    assert!(matches!(result, Err(LxboxError::Config(_))));
}

#[test]
fn test_runtime_requires_absolute_home() {
    let result = build(RuntimeOptions::with_home("relative/home"));
    assert!(matches!(result, Err(LxboxError::Config(_))));
}

#[test]
fn test_runtime_requires_default_storage_backend() {
    let temp_dir = TempDir::new().unwrap();
    let mut options = RuntimeOptions::with_home(temp_dir.path());
    options.default_storage = StorageKind::Zfs;

    let err = build(options).err().unwrap();
    assert!(matches!(err, LxboxError::Config(_)));
    assert!(err.to_string().contains("zfs"));
}
