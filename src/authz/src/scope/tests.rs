//! Test suite for scope module
//!
//! Tests cover:
//! - Permission key parsing and serialization
//! - Scope resolution with and without a resource
//! - Signal priority ordering
//! - Concurrent access

use super::*;
use crate::types::Principal;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

fn perms(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// PermissionKey Tests
// ============================================================================

#[test]
fn test_key_parsing() {
    let key = PermissionKey::parse("orders.view.own").unwrap();
    assert_eq!(key.action, "orders.view");
    assert_eq!(key.scope, Some(Scope::Own));
    assert_eq!(key.module(), "orders");

    let key = PermissionKey::parse("orders.view").unwrap();
    assert_eq!(key.action, "orders.view");
    assert_eq!(key.scope, None);

    let key = PermissionKey::from_str("dashboard").unwrap();
    assert_eq!(key.module(), "dashboard");
    assert!(!key.is_scoped());
}

#[test]
fn test_key_parsing_errors() {
    assert_eq!(PermissionKey::parse(""), Err(ScopeError::Empty));
    assert!(matches!(
        PermissionKey::parse(".all"),
        Err(ScopeError::MissingAction(_))
    ));
    assert!(matches!(
        PermissionKey::parse("own"),
        Err(ScopeError::MissingAction(_))
    ));
}

#[test]
fn test_key_display() {
    assert_eq!(
        PermissionKey::scoped("inventory.edit", Scope::Department).to_string(),
        "inventory.edit.department"
    );
    assert_eq!(PermissionKey::unscoped("reports.view").to_string(), "reports.view");
}

#[test]
fn test_scope_ordering() {
    assert!(Scope::Own < Scope::Department);
    assert!(Scope::Department < Scope::All);
    assert_eq!(Scope::from_str("department").unwrap(), Scope::Department);
    assert!(matches!(
        Scope::from_str("global"),
        Err(ScopeError::UnknownScope(_))
    ));
}

// ============================================================================
// Key Building Tests
// ============================================================================

#[test]
fn test_build_key_appends_scope() {
    let resolver = ScopeResolver::new();
    assert_eq!(
        resolver.build_permission_key("orders.view", Scope::All).to_string(),
        "orders.view.all"
    );
}

#[test]
fn test_build_key_keeps_explicit_scope() {
    let resolver = ScopeResolver::new();
    for scope in Scope::ALL {
        assert_eq!(
            resolver
                .build_permission_key("orders.view.department", scope)
                .to_string(),
            "orders.view.department"
        );
    }
}

// ============================================================================
// Scope Resolution Tests
// ============================================================================

#[test]
fn test_no_resource_uses_broadest_wildcard() {
    let resolver = ScopeResolver::new();
    let principal = Principal::new("u-1");

    assert_eq!(
        resolver.determine_scope(&principal, &perms(&["orders.view.own", "hr.view.all"]), None),
        Scope::All
    );
    assert_eq!(
        resolver.determine_scope(&principal, &perms(&["orders.view.department"]), None),
        Scope::Department
    );
    assert_eq!(
        resolver.determine_scope(&principal, &perms(&["orders.view"]), None),
        Scope::Own
    );
    assert_eq!(resolver.determine_scope(&principal, &BTreeSet::new(), None), Scope::Own);
}

#[test]
fn test_owner_wins_over_department() {
    let resolver = ScopeResolver::new();
    let principal = Principal::new("u-1").with_department("production");
    let order = AttributeResource::of_kind("order")
        .with_attribute("user_id", "u-1")
        .with_attribute("department", "sales");

    assert_eq!(
        resolver.determine_scope(&principal, &BTreeSet::new(), Some(&order)),
        Scope::Own
    );
}

#[test]
fn test_department_match() {
    let resolver = ScopeResolver::new();
    let principal = Principal::new("u-1").with_department("production");
    let order = AttributeResource::of_kind("order")
        .with_attribute("user_id", "u-2")
        .with_attribute("department", "production");

    assert_eq!(
        resolver.determine_scope(&principal, &BTreeSet::new(), Some(&order)),
        Scope::Department
    );
}

#[test]
fn test_foreign_resource_needs_all() {
    let resolver = ScopeResolver::new();
    let principal = Principal::new("u-1").with_department("production");
    let order = AttributeResource::of_kind("order")
        .with_attribute("user_id", "u-2")
        .with_attribute("department", "sales");

    assert_eq!(
        resolver.determine_scope(&principal, &perms(&["orders.view.own"]), Some(&order)),
        Scope::All
    );
}

#[test]
fn test_principal_without_department() {
    let resolver = ScopeResolver::new();
    let principal = Principal::new("u-1");
    let item = AttributeResource::of_kind("inventory_item").with_attribute("department", "production");

    assert_eq!(
        resolver.determine_scope(&principal, &BTreeSet::new(), Some(&item)),
        Scope::All
    );
}

#[test]
fn test_ownership_signal_priority() {
    // The first reported signal wins even if a later one would match
    let resource = AttributeResource::new()
        .with_attribute("created_by", "u-9")
        .with_attribute("assigned_to", "u-1");
    assert_eq!(resource.owner_id().as_deref(), Some("u-9"));

    let resolver = ScopeResolver::new();
    let principal = Principal::new("u-1");
    assert_eq!(
        resolver.determine_scope(&principal, &BTreeSet::new(), Some(&resource)),
        Scope::All
    );

    let worker_record = AttributeResource::of_kind("worker").with_attribute("worker_id", 42);
    assert_eq!(worker_record.owner_id().as_deref(), Some("42"));
}

#[test]
fn test_department_signal_priority() {
    let resource = AttributeResource::new()
        .with_attribute("owner_department", "sales")
        .with_attribute("department", "production");
    assert_eq!(resource.owning_department().as_deref(), Some("production"));

    let resource = AttributeResource::new().with_attribute("owner_department", "sales");
    assert_eq!(resource.owning_department().as_deref(), Some("sales"));
}

#[test]
fn test_custom_resource_capability() {
    struct Order {
        customer_rep: String,
    }

    impl Resource for Order {
        fn owner(&self, signal: OwnerSignal) -> Option<String> {
            (signal == OwnerSignal::AssignedTo).then(|| self.customer_rep.clone())
        }
    }

    let resolver = ScopeResolver::new();
    let order = Order { customer_rep: "u-5".to_string() };
    assert_eq!(
        resolver.determine_scope(&Principal::new("u-5"), &BTreeSet::new(), Some(&order)),
        Scope::Own
    );
}

// ============================================================================
// Statistics and Concurrency Tests
// ============================================================================

#[test]
fn test_stats() {
    let resolver = ScopeResolver::new();
    let principal = Principal::new("u-1");

    resolver.determine_scope(&principal, &BTreeSet::new(), None);
    resolver.determine_scope(&principal, &perms(&["orders.view.all"]), None);
    resolver.determine_scope(&principal, &perms(&["orders.view.all"]), None);

    let stats = resolver.stats();
    assert_eq!(stats.own, 1);
    assert_eq!(stats.all, 2);
    assert_eq!(stats.total(), 3);

    resolver.reset_stats();
    assert_eq!(resolver.stats(), ScopeStats::default());
}

#[test]
fn test_concurrent_resolution() {
    let resolver = Arc::new(ScopeResolver::new());
    let mut handles = vec![];

    for i in 0..8 {
        let resolver = Arc::clone(&resolver);
        handles.push(thread::spawn(move || {
            let principal = Principal::new(format!("u-{}", i));
            for _ in 0..100 {
                resolver.determine_scope(&principal, &BTreeSet::new(), None);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(resolver.stats().own, 800);
}
