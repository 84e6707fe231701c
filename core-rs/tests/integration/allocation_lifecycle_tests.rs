//! Integration tests for the environment allocation lifecycle
//!
//! Tests the full lifecycle through `PortContext`:
//! - Environment creation
//! - Service port allocation
//! - Release and reuse
//! - Recovery from a corrupt registry file

use envport_core::{
    EnvPortError, EnvironmentType, LockSettings, PortContext, PortRange, Settings, PORTAL_SERVICE,
};
use std::fs;
use tempfile::TempDir;

fn create_context(temp_dir: &TempDir) -> PortContext {
    let settings = Settings {
        registry_path: Some(temp_dir.path().join("port-registry.json")),
        lock: LockSettings {
            max_attempts: 500,
            base_delay_ms: 1,
            max_jitter_ms: 5,
        },
        ..Settings::default()
    };
    PortContext::new(settings).unwrap()
}

#[test]
fn test_theme_environments_get_consecutive_portals() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);
    let allocator = context.allocator();

    let mut portals = vec![];
    for name in ["theme-1", "theme-2", "theme-3"] {
        let ports = allocator
            .allocate_ports_for_environment(name, EnvironmentType::Theme)
            .unwrap();
        assert!(allocator.validate_port_for_environment(ports.portal, EnvironmentType::Theme));
        portals.push(ports.portal);
    }

    assert_eq!(portals, vec![3200, 3201, 3202]);
}

#[test]
fn test_service_port_within_bounds() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);
    let allocator = context.allocator();

    let ports = allocator
        .allocate_ports_for_environment("app-1", EnvironmentType::Theme)
        .unwrap();
    assert_eq!(ports.portal, 3200);

    let api = allocator.allocate_service_port("app-1", "api").unwrap();
    assert!((3201..=3299).contains(&api), "api port {} out of bounds", api);

    let entries = allocator.get_environment_ports("app-1").unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.service == PORTAL_SERVICE && e.port == 3200));
    assert!(entries.iter().any(|e| e.service == "api" && e.port == api));
}

#[test]
fn test_conflict_retry_skips_manual_reservation() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);

    context
        .registry()
        .register_allocation("manual-env", PORTAL_SERVICE, 3200)
        .unwrap();

    let ports = context
        .allocator()
        .allocate_ports_for_environment("theme-x", EnvironmentType::Theme)
        .unwrap();

    assert_eq!(ports.portal, 3201);
    assert_eq!(ports.services, PortRange { start: 3202, end: 3299 });
}

#[test]
fn test_release_then_reuse() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);
    let allocator = context.allocator();

    allocator
        .allocate_ports_for_environment("demo-1", EnvironmentType::Demo)
        .unwrap();
    let db = allocator.allocate_service_port("demo-1", "db").unwrap();
    let cache = allocator.allocate_service_port("demo-1", "cache").unwrap();
    let owned = [3300, db, cache];

    assert!(allocator.release_environment_ports("demo-1").unwrap());

    for port in owned {
        assert!(allocator.is_port_available(port).unwrap(), "port {} still taken", port);
    }
    assert!(allocator.get_environment_ports("demo-1").unwrap().is_empty());

    // Next environment reuses the freed portal
    let reused = allocator
        .allocate_ports_for_environment("demo-2", EnvironmentType::Demo)
        .unwrap();
    assert_eq!(reused.portal, 3300);
}

#[test]
fn test_single_port_release_then_reuse() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);
    let allocator = context.allocator();

    allocator
        .allocate_ports_for_environment("test-1", EnvironmentType::Test)
        .unwrap();
    let first = allocator.allocate_service_port("test-1", "worker").unwrap();
    let second = allocator.allocate_service_port("test-1", "queue").unwrap();

    assert!(allocator.release_port(first).unwrap());

    // Freed slot is the lowest free port above the portal again
    let third = allocator.allocate_service_port("test-1", "scheduler").unwrap();
    assert_eq!(third, first);
    assert_eq!(allocator.get_service_port("test-1", "queue").unwrap(), Some(second));
    assert_eq!(allocator.get_service_port("test-1", "worker").unwrap(), None);
}

#[test]
fn test_release_singleton_sequence() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);
    let allocator = context.allocator();

    let prod = allocator
        .allocate_ports_for_environment("prod", EnvironmentType::Release)
        .unwrap();
    assert_eq!(prod.portal, 3456);

    let err = allocator
        .allocate_ports_for_environment("prod-2", EnvironmentType::Release)
        .unwrap_err();
    assert!(err.to_string().contains("already allocated"));

    allocator.release_environment_ports("prod").unwrap();
    let after = allocator
        .allocate_ports_for_environment("prod-2", EnvironmentType::Release)
        .unwrap();
    assert_eq!(after.portal, 3456);
}

#[test]
fn test_allocations_survive_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let context = create_context(&temp_dir);
        context
            .allocator()
            .allocate_ports_for_environment("epic-1", EnvironmentType::Epic)
            .unwrap();
        context.allocator().allocate_service_port("epic-1", "api").unwrap();
    }

    {
        let context = create_context(&temp_dir);
        let ports = context.allocator().get_environment_ports("epic-1").unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port, 3500);

        let next = context
            .allocator()
            .allocate_ports_for_environment("epic-2", EnvironmentType::Epic)
            .unwrap();
        assert_eq!(next.portal, 3502);
    }
}

#[test]
fn test_corruption_recovery_on_read_and_write() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);
    let registry_path = context.registry().path().to_path_buf();

    for garbage in ["", "not json at all", "{\"environments\": 42}", "[1, 2, 3]"] {
        fs::write(&registry_path, garbage).unwrap();
        let summary = context.allocator().get_port_usage_summary().unwrap();
        assert!(summary.values().all(|u| u.used == 0));

        fs::write(&registry_path, garbage).unwrap();
        let ports = context
            .allocator()
            .allocate_ports_for_environment("theme-1", EnvironmentType::Theme)
            .unwrap();
        assert_eq!(ports.portal, 3200);
    }
}

#[test]
fn test_usage_summary_counts_by_band() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);
    let allocator = context.allocator();

    allocator
        .allocate_ports_for_environment("t1", EnvironmentType::Test)
        .unwrap();
    allocator
        .allocate_ports_for_environment("t2", EnvironmentType::Test)
        .unwrap();
    allocator.allocate_service_port("t1", "api").unwrap();
    allocator.reserve_port(3350, "manual", "db").unwrap();

    let summary = allocator.get_port_usage_summary().unwrap();
    let test = summary[&EnvironmentType::Test];
    assert_eq!((test.total, test.used, test.available), (100, 3, 97));
    let demo = summary[&EnvironmentType::Demo];
    assert_eq!((demo.total, demo.used, demo.available), (100, 1, 99));
}

#[test]
fn test_unknown_environment_operations() {
    let temp_dir = TempDir::new().unwrap();
    let context = create_context(&temp_dir);
    let allocator = context.allocator();

    assert!(allocator.get_environment_ports("ghost").unwrap().is_empty());
    assert!(allocator.release_environment_ports("ghost").unwrap());
    assert!(!allocator.release_port(3299).unwrap());
    assert!(matches!(
        allocator.allocate_service_port("ghost", "api"),
        Err(EnvPortError::EnvironmentNotFound(_))
    ));
}
