//! Integration tests for loading persisted containers.

use lxbox::config::keys;
use lxbox::{Architecture, ContainerArgs, Device, DriverKind, LxboxError, StorageKind};
use lxbox_test_utils::TestContext;
use lxbox::db::ContainerStore;

/// Persist `args` and its storage directory without going through create.
fn seed(ctx: &TestContext, args: &ContainerArgs) {
    ctx.store.container_insert(args).unwrap();
    std::fs::create_dir_all(ctx.container_dir(&args.name)).unwrap();
}

#[test]
fn load_after_restart_matches_created_container() {
    let mut ctx = TestContext::new();
    let created = ctx
        .runtime
        .create(ContainerArgs::new("c1").with_config("limits.cpu", "2"))
        .unwrap();
    let (config, devices) = (
        created.expanded_config().clone(),
        created.expanded_devices().clone(),
    );
    drop(created);

    ctx.restart();
    let loaded = ctx.runtime.load("c1").unwrap();

    assert_eq!(loaded.expanded_config(), &config);
    assert_eq!(loaded.expanded_devices(), &devices);
    assert_eq!(loaded.storage_kind(), StorageKind::Dir);
    assert!(loaded.last_idmap_set().unwrap().is_some());
}

#[test]
fn load_skips_validation() {
    let ctx = TestContext::new();

    // Unknown key, runtime state and no root disk: create would refuse all three
    let args = ContainerArgs::new("legacy")
        .with_config("bogus.key", "1")
        .with_config(keys::VOLATILE_LAST_STATE_POWER, "RUNNING")
        .with_device("eth0", Device::from_pairs([("type", "nic")]));
    seed(&ctx, &args);

    let loaded = ctx.runtime.load("legacy").unwrap();

    assert_eq!(
        loaded.expanded_config().get("bogus.key").map(String::as_str),
        Some("1")
    );
    assert!(!loaded.expanded_devices().has_root_disk());
    assert_eq!(ctx.store.updates(), 0);
    assert_eq!(ctx.network.calls(), 0);
}

#[test]
fn load_preserves_persisted_flags() {
    let ctx = TestContext::new();

    let mut args = ContainerArgs::new("c1")
        .with_driver(DriverKind::Vm)
        .with_architecture(Architecture::Aarch64)
        .with_ephemeral(true);
    args.stateful = true;
    seed(&ctx, &args);

    let loaded = ctx.runtime.load("c1").unwrap();

    assert!(loaded.is_stateful());
    assert!(loaded.is_ephemeral());
    assert_eq!(loaded.driver(), DriverKind::Vm);
    assert_eq!(loaded.architecture(), Architecture::Aarch64);
    assert!(ctx.engines.opened().contains(&("c1".to_string(), DriverKind::Vm)));
}

#[test]
fn load_undiscoverable_storage_fails() {
    let ctx = TestContext::new();
    ctx.store.container_insert(&ContainerArgs::new("c1")).unwrap();

    let err = ctx.runtime.load("c1").unwrap_err();

    assert!(matches!(err, LxboxError::StorageDiscovery(_)));
    // Nothing is cleaned up on the load path
    assert!(ctx.record("c1").is_some());
    assert!(ctx.engines.opened().is_empty());
}

#[test]
fn load_storage_of_unconfigured_kind_fails() {
    let ctx = TestContext::new();
    seed(&ctx, &ContainerArgs::new("c1"));

    // LVM marker next to the container directory
    let marker = ctx.home().join("containers").join("c1.lv");
    std::fs::write(&marker, b"").unwrap();

    let err = ctx.runtime.load("c1").unwrap_err();
    assert!(matches!(err, LxboxError::StorageDiscovery(_)));
    assert!(err.to_string().contains("lvm"));
}

#[test]
fn load_snapshot_uses_parent_storage() {
    let ctx = TestContext::new();
    seed(&ctx, &ContainerArgs::new("c1"));
    ctx.store
        .container_insert(&ContainerArgs::new("c1/snap0"))
        .unwrap();

    let snapshot = ctx.runtime.load("c1/snap0").unwrap();

    assert_eq!(snapshot.storage_kind(), StorageKind::Dir);
    assert_eq!(
        snapshot.path(),
        ctx.home().join("snapshots").join("c1").join("snap0")
    );
    assert_eq!(snapshot.container_type(), lxbox::ContainerType::Snapshot);
}

#[test]
fn load_missing_container_fails() {
    let ctx = TestContext::new();
    assert!(matches!(
        ctx.runtime.load("ghost"),
        Err(LxboxError::NotFound(_))
    ));
}

#[test]
fn load_with_missing_profile_fails() {
    let ctx = TestContext::new();
    seed(
        &ctx,
        &ContainerArgs::new("c1").with_profiles(["default", "gone"]),
    );

    assert!(matches!(
        ctx.runtime.load("c1"),
        Err(LxboxError::NotFound(_))
    ));
    assert!(ctx.record("c1").is_some());
}
