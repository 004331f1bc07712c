//! Integration tests for container creation, normalization and deletion.

use lxbox::config::keys;
use lxbox::{
    ContainerArgs, Device, IdmapSet, LxboxError, Profile, StorageKind, ValidationError,
};
use lxbox_test_utils::TestContext;

fn nic() -> Device {
    Device::from_pairs([("type", "nic"), ("nictype", "p2p")])
}

// ============================================================================
// ROOT DISK COMPLETION
// ============================================================================

#[test]
fn create_synthesizes_root_disk_from_empty_default_profile() {
    let ctx = TestContext::new();

    let container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    let devices = container.expanded_devices();
    assert_eq!(devices.names(), vec!["root"]);
    let root = devices.get("root").unwrap();
    assert_eq!(root.get("type"), Some("disk"));
    assert_eq!(root.get("path"), Some("/"));

    // Synthesized into local devices, and persisted
    assert!(container.local_devices().contains("root"));
    assert!(ctx.record("c1").unwrap().devices.contains("root"));
}

#[test]
fn create_picks_first_free_root_name() {
    let ctx = TestContext::new();
    ctx.runtime
        .create_profile(
            Profile::new("default")
                .with_device("root", nic())
                .with_device("root_", nic()),
        )
        .unwrap();

    let container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    let devices = container.expanded_devices();
    assert_eq!(devices.names(), vec!["root", "root_", "root__"]);
    assert!(devices.get("root__").unwrap().is_root_disk());
    assert_eq!(container.local_devices().names(), vec!["root__"]);
}

#[test]
fn create_keeps_existing_root_disk() {
    let ctx = TestContext::new();

    let args = ContainerArgs::new("c1").with_device("rootfs", Device::root_disk());
    let container = ctx.runtime.create(args).unwrap();

    let roots: Vec<_> = container
        .expanded_devices()
        .iter()
        .filter(|(_, d)| d.is_root_disk())
        .map(|(n, _)| n.clone())
        .collect();
    assert_eq!(roots, vec!["rootfs".to_string()]);
}

#[test]
fn create_uses_root_disk_from_profile() {
    let ctx = TestContext::new();
    ctx.runtime
        .create_profile(Profile::new("default").with_device("root", Device::root_disk()))
        .unwrap();

    let container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    assert!(container.local_devices().is_empty());
    assert_eq!(container.expanded_devices().names(), vec!["root"]);
}

// ============================================================================
// EXPANSION
// ============================================================================

#[test]
fn create_expands_profiles_in_list_order() {
    let ctx = TestContext::new();
    ctx.runtime
        .create_profile(
            Profile::new("small")
                .with_config("limits.cpu", "1")
                .with_config("limits.memory", "512MB"),
        )
        .unwrap();
    ctx.runtime
        .create_profile(Profile::new("big").with_config("limits.memory", "8GB"))
        .unwrap();

    let args = ContainerArgs::new("c1")
        .with_profiles(["default", "small", "big"])
        .with_config("limits.cpu", "4");
    let container = ctx.runtime.create(args).unwrap();

    let expanded = container.expanded_config();
    assert_eq!(expanded.get("limits.cpu").map(String::as_str), Some("4"));
    assert_eq!(expanded.get("limits.memory").map(String::as_str), Some("8GB"));
    assert!(!container.local_config().contains_key("limits.memory"));
}

// ============================================================================
// IDMAP
// ============================================================================

#[test]
fn privileged_container_persists_empty_idmap() {
    let ctx = TestContext::new();

    let args = ContainerArgs::new("c1").with_config(keys::SECURITY_PRIVILEGED, "true");
    let container = ctx.runtime.create(args).unwrap();

    assert_eq!(container.idmap_set().unwrap(), None);
    assert_eq!(
        container
            .local_config()
            .get(keys::VOLATILE_LAST_STATE_IDMAP)
            .map(String::as_str),
        Some("[]")
    );
    assert_eq!(container.last_idmap_set().unwrap(), None);
}

#[test]
fn unprivileged_container_persists_idmap_json() {
    let ctx = TestContext::new();

    let container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    let expected = IdmapSet::isolated(1_000_000, 1_000_000_000);
    assert_eq!(container.idmap_set().unwrap(), Some(expected.clone()));
    assert_eq!(container.last_idmap_set().unwrap(), Some(expected.clone()));

    let record = ctx.record("c1").unwrap();
    let json = record.config.get(keys::VOLATILE_LAST_STATE_IDMAP).unwrap();
    assert_eq!(IdmapSet::parse(json).unwrap(), expected);
    assert!(json.contains("\"Hostid\":1000000"));
}

#[test]
fn idmap_range_comes_from_config() {
    let ctx = TestContext::new();

    let args = ContainerArgs::new("c1")
        .with_config(keys::SECURITY_IDMAP_BASE, "200000")
        .with_config(keys::SECURITY_IDMAP_SIZE, "65536");
    let container = ctx.runtime.create(args).unwrap();

    let idmap = container.last_idmap_set().unwrap().unwrap();
    assert_eq!(idmap.shift_uid(0), Some(200000));
    assert_eq!(idmap.shift_gid(65535), Some(265535));
    assert_eq!(idmap.shift_uid(65536), None);
}

// ============================================================================
// RUNTIME API
// ============================================================================

#[test]
fn create_attaches_default_storage_and_notifies_network() {
    let ctx = TestContext::new();

    let container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    assert_eq!(container.storage_kind(), StorageKind::Dir);
    assert_eq!(container.path(), ctx.container_dir("c1"));
    assert!(ctx.container_dir("c1").is_dir());
    assert_eq!(ctx.network.calls(), 1);
    assert!(container.id() > 0);
}

#[test]
fn create_existing_name_fails_without_touching_it() {
    let ctx = TestContext::new();
    ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    let err = ctx.runtime.create(ContainerArgs::new("c1")).unwrap_err();
    assert!(matches!(err, LxboxError::AlreadyExists(_)));

    assert!(ctx.record("c1").is_some());
    assert!(ctx.container_dir("c1").is_dir());
}

#[test]
fn create_rejects_invalid_name() {
    let ctx = TestContext::new();

    let err = ctx.runtime.create(ContainerArgs::new("-bad")).unwrap_err();
    assert!(matches!(
        err,
        LxboxError::Validation(ValidationError::InvalidName { .. })
    ));
    assert!(ctx.runtime.list().unwrap().is_empty());
}

#[test]
fn list_and_delete() {
    let ctx = TestContext::new();
    ctx.runtime.create(ContainerArgs::new("web")).unwrap();
    ctx.runtime.create(ContainerArgs::new("db")).unwrap();
    assert_eq!(ctx.runtime.list().unwrap(), vec!["db", "web"]);

    ctx.runtime.delete("web").unwrap();

    assert_eq!(ctx.runtime.list().unwrap(), vec!["db"]);
    assert!(!ctx.container_dir("web").exists());
    assert!(matches!(
        ctx.runtime.delete("web"),
        Err(LxboxError::NotFound(_))
    ));
}

#[test]
fn profiles_are_validated_as_profiles() {
    let ctx = TestContext::new();

    assert_eq!(ctx.runtime.profile_names().unwrap(), vec!["default"]);

    let err = ctx
        .runtime
        .create_profile(Profile::new("bad").with_config("volatile.base_image", "abc"))
        .unwrap_err();
    assert!(matches!(
        err,
        LxboxError::Validation(ValidationError::VolatileOnProfile(_))
    ));
    assert!(matches!(
        ctx.runtime.profile("bad"),
        Err(LxboxError::NotFound(_))
    ));
}

// ============================================================================
// UPDATE
// ============================================================================

#[test]
fn update_revalidates_and_persists() {
    let ctx = TestContext::new();
    let mut container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    let mut args = ctx.record("c1").unwrap();
    args.config.insert("limits.cpu".into(), "2".into());
    args.devices.insert("eth0", nic());
    container.update(&args, true).unwrap();

    assert_eq!(container.expanded_devices().names(), vec!["eth0", "root"]);
    let record = ctx.record("c1").unwrap();
    assert_eq!(record.config.get("limits.cpu").map(String::as_str), Some("2"));
    assert!(record.devices.contains("eth0"));
}

#[test]
fn failed_update_changes_nothing() {
    let ctx = TestContext::new();
    let mut container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();
    let before = ctx.record("c1").unwrap();

    // Dropping the root disk leaves the container without one
    let mut args = before.clone();
    args.devices.remove("root");
    args.config.insert("limits.cpu".into(), "2".into());
    let err = container.update(&args, true).unwrap_err();
    assert!(matches!(
        err,
        LxboxError::Validation(ValidationError::MissingRootDisk)
    ));

    assert!(container.local_devices().contains("root"));
    assert!(!container.expanded_config().contains_key("limits.cpu"));
    assert_eq!(ctx.record("c1").unwrap().config, before.config);
}

#[test]
fn user_update_cannot_change_volatile_keys() {
    let ctx = TestContext::new();
    let mut container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    let mut args = ctx.record("c1").unwrap();
    args.config
        .insert(keys::VOLATILE_LAST_STATE_IDMAP.into(), "[]".into());

    assert!(matches!(
        container.update(&args, true),
        Err(LxboxError::InvalidArgument(_))
    ));
    // Internal updates may
    container.update(&args, false).unwrap();
    assert_eq!(container.last_idmap_set().unwrap(), None);
}

#[test]
fn config_key_set_goes_through_update() {
    let ctx = TestContext::new();
    let mut container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    container.config_key_set("user.owner", "alice").unwrap();
    assert_eq!(
        ctx.record("c1")
            .unwrap()
            .config
            .get("user.owner")
            .map(String::as_str),
        Some("alice")
    );

    let err = container.config_key_set("bogus.key", "1").unwrap_err();
    assert!(err.is_validation());
    assert!(!container.local_config().contains_key("bogus.key"));
}
