//! Integration tests for compensating deletion when creation fails.
//!
//! After every failed create, neither the persisted record nor the
//! container's storage may remain.

use lxbox::config::keys;
use lxbox::{ContainerArgs, Device, EngineState, LxboxError, ValidationError};
use lxbox_test_utils::{EngineCall, TestContext};

fn assert_rolled_back(ctx: &TestContext, name: &str) {
    assert!(ctx.record(name).is_none(), "record for {name} survived");
    assert!(
        !ctx.container_dir(name).exists(),
        "storage for {name} survived"
    );
    assert!(!ctx.runtime.list().unwrap().contains(&name.to_string()));
}

// ============================================================================
// INIT FAILURES
// ============================================================================

#[test]
fn missing_profile_rolls_back() {
    let ctx = TestContext::new();

    let args = ContainerArgs::new("c1").with_profiles(["default", "missing"]);
    let err = ctx.runtime.create(args).unwrap_err();

    assert!(matches!(err, LxboxError::NotFound(_)));
    assert_rolled_back(&ctx, "c1");
}

#[test]
fn engine_open_failure_rolls_back() {
    let ctx = TestContext::new();
    ctx.engines.fail_open("c1");

    let err = ctx.runtime.create(ContainerArgs::new("c1")).unwrap_err();

    assert!(matches!(err, LxboxError::Engine(_)));
    assert_rolled_back(&ctx, "c1");
}

// ============================================================================
// ROOT DISK COMPLETION FAILURES
// ============================================================================

#[test]
fn device_update_failure_rolls_back() {
    let ctx = TestContext::new();
    ctx.store.fail_updates_if(|args| args.devices.contains("root"));

    let err = ctx.runtime.create(ContainerArgs::new("c1")).unwrap_err();

    assert!(matches!(err, LxboxError::Database(_)));
    assert_rolled_back(&ctx, "c1");
}

#[test]
fn invalid_local_device_rolls_back_during_completion() {
    let ctx = TestContext::new();

    // Bridged NIC without a parent
    let args = ContainerArgs::new("c1").with_device(
        "eth0",
        Device::from_pairs([("type", "nic"), ("nictype", "bridged")]),
    );
    let err = ctx.runtime.create(args).unwrap_err();

    assert!(matches!(
        err,
        LxboxError::Validation(ValidationError::MissingDeviceKey { .. })
    ));
    assert_rolled_back(&ctx, "c1");
}

// ============================================================================
// VALIDATION FAILURES
// ============================================================================

#[test]
fn config_validation_failure_rolls_back() {
    let ctx = TestContext::new();

    let args = ContainerArgs::new("c1")
        .with_config(keys::VOLATILE_LAST_STATE_POWER, "RUNNING")
        .with_device("root", Device::root_disk());
    let err = ctx.runtime.create(args).unwrap_err();

    assert!(matches!(
        err,
        LxboxError::Validation(ValidationError::RuntimeStateOnCreate(_))
    ));
    assert_rolled_back(&ctx, "c1");
}

#[test]
fn device_validation_failure_rolls_back() {
    let ctx = TestContext::new();

    let read_only_root =
        Device::from_pairs([("type", "disk"), ("path", "/"), ("readonly", "true")]);
    let args = ContainerArgs::new("c1").with_device("root", read_only_root);
    let err = ctx.runtime.create(args).unwrap_err();

    assert!(err.is_validation());
    assert!(matches!(
        err,
        LxboxError::Validation(ValidationError::ReadOnlyRootDisk(_))
    ));
    assert_rolled_back(&ctx, "c1");
}

// ============================================================================
// IDMAP FAILURES
// ============================================================================

#[test]
fn idmap_persistence_failure_rolls_back() {
    let ctx = TestContext::new();
    ctx.store
        .fail_updates_if(|args| args.config.contains_key(keys::VOLATILE_LAST_STATE_IDMAP));

    let err = ctx.runtime.create(ContainerArgs::new("c1")).unwrap_err();

    assert!(matches!(err, LxboxError::Database(_)));
    assert_rolled_back(&ctx, "c1");
}

#[test]
fn negative_idmap_base_is_a_validation_error() {
    let ctx = TestContext::new();

    let args = ContainerArgs::new("c1").with_config(keys::SECURITY_IDMAP_BASE, "-1");
    let err = ctx.runtime.create(args).unwrap_err();

    assert!(matches!(
        err,
        LxboxError::Validation(ValidationError::InvalidValue { ref key, .. })
            if key == keys::SECURITY_IDMAP_BASE
    ));
    assert_rolled_back(&ctx, "c1");
}

#[test]
fn invalid_idmap_size_rolls_back() {
    let ctx = TestContext::new();

    let args = ContainerArgs::new("c1").with_config(keys::SECURITY_IDMAP_SIZE, "0");
    let err = ctx.runtime.create(args).unwrap_err();

    assert!(err.is_validation());
    assert_rolled_back(&ctx, "c1");
}

// ============================================================================
// ENGINE STATE DURING ROLLBACK
// ============================================================================

fn read_only_root_args(name: &str) -> ContainerArgs {
    let read_only_root =
        Device::from_pairs([("type", "disk"), ("path", "/"), ("readonly", "true")]);
    ContainerArgs::new(name).with_device("root", read_only_root)
}

#[test]
fn rollback_stops_active_engine() {
    let ctx = TestContext::new();
    ctx.engines.set_state("c1", EngineState::Running);

    let err = ctx.runtime.create(read_only_root_args("c1")).unwrap_err();

    assert!(err.is_validation());
    assert_rolled_back(&ctx, "c1");
    assert_eq!(ctx.engines.state_of("c1"), EngineState::Stopped);
    assert_eq!(
        ctx.engines.calls(),
        vec![EngineCall::Stop {
            name: "c1".into(),
            checkpoint_to: None,
        }]
    );
}

#[test]
fn rollback_ignores_engine_state_errors() {
    let ctx = TestContext::new();
    ctx.engines.fail_state("c1");

    let err = ctx.runtime.create(read_only_root_args("c1")).unwrap_err();

    assert!(err.is_validation());
    assert_rolled_back(&ctx, "c1");
    assert!(ctx.engines.calls().is_empty());
}

// ============================================================================
// NON-ROLLBACK PATHS
// ============================================================================

#[test]
fn network_failure_does_not_roll_back() {
    let ctx = TestContext::new();
    ctx.network.set_failing(true);

    let container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();

    assert_eq!(ctx.network.calls(), 1);
    assert_eq!(container.name(), "c1");
    assert!(ctx.record("c1").is_some());
    assert!(ctx.container_dir("c1").is_dir());
}

#[test]
fn rollback_leaves_other_containers_alone() {
    let ctx = TestContext::new();
    ctx.runtime.create(ContainerArgs::new("c1")).unwrap();
    ctx.engines.fail_open("c2");

    assert!(ctx.runtime.create(ContainerArgs::new("c2")).is_err());

    assert_rolled_back(&ctx, "c2");
    assert!(ctx.record("c1").is_some());
    assert!(ctx.container_dir("c1").is_dir());
    assert_eq!(ctx.network.calls(), 1);
}

#[test]
fn name_can_be_reused_after_rollback() {
    let ctx = TestContext::new();
    ctx.store.fail_updates_if(|_| true);
    assert!(ctx.runtime.create(ContainerArgs::new("c1")).is_err());

    ctx.store.clear_failures();
    let container = ctx.runtime.create(ContainerArgs::new("c1")).unwrap();
    assert!(container.expanded_devices().has_root_disk());
}
