//! Role management integration tests
//!
//! Tests for listing, creation, hierarchy moves with level cascades, cycle
//! rejection, deletion guards and permission breakdowns.

use atelier_authz::store::RoleStore;
use atelier_authz::{
    AuthzError, Condition, InMemoryRoleStore, NewRole, RoleHierarchy, RoleId, RoleManager,
    RoleUpdate,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn setup() -> (Arc<InMemoryRoleStore>, RoleManager) {
    let store = Arc::new(InMemoryRoleStore::new());
    let manager = RoleManager::new(store.clone());
    (store, manager)
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A(root) -> B -> C
async fn chain(manager: &RoleManager) -> (RoleId, RoleId, RoleId) {
    let a = manager
        .create(NewRole::new("a", "A").with_permissions(["y"]))
        .await
        .unwrap()
        .id;
    let b = manager
        .create(NewRole::new("b", "B").with_parent(a).with_permissions(["x"]))
        .await
        .unwrap()
        .id;
    let c = manager
        .create(NewRole::new("c", "C").with_parent(b))
        .await
        .unwrap()
        .id;
    (a, b, c)
}

// ============================================================================
// INHERITANCE
// ============================================================================

#[tokio::test]
async fn test_child_inherits_parent_permissions() {
    let (_, manager) = setup();
    let (a, b, _) = chain(&manager).await;

    let details = manager.show(b).await.unwrap();
    assert_eq!(details.effective_permissions, set(&["x", "y"]));
    assert_eq!(details.direct_permissions, set(&["x"]));
    assert_eq!(details.inherited_permissions, set(&["y"]));
    assert_eq!(details.child_roles_count, 1);
    assert_eq!(details.users_count, 0);

    let root = manager.show(a).await.unwrap();
    assert!(root.inherited_permissions.is_empty());
}

#[tokio::test]
async fn test_show_reports_conditions() {
    let (_, manager) = setup();
    let (a, _, _) = chain(&manager).await;
    let condition = Condition::new().with("department", "production");

    manager
        .add_permission(a, "orders.edit", Some(condition.clone()))
        .await
        .unwrap();
    let details = manager.show(a).await.unwrap();
    assert_eq!(details.conditions.get("orders.edit"), Some(&condition));

    manager.remove_permission(a, "orders.edit").await.unwrap();
    let details = manager.show(a).await.unwrap();
    assert!(details.conditions.is_empty());
    assert!(!details.direct_permissions.contains("orders.edit"));
}

// ============================================================================
// HIERARCHY MUTATION
// ============================================================================

#[tokio::test]
async fn test_cycle_rejected_and_state_unchanged() {
    let (store, manager) = setup();
    let (a, _, c) = chain(&manager).await;
    let before = store.snapshot().await.unwrap();

    let result = manager.update(a, RoleUpdate::new().parent(Some(c))).await;
    assert!(matches!(
        result,
        Err(AuthzError::CircularHierarchy { role, candidate }) if role == a && candidate == c
    ));

    let after = store.snapshot().await.unwrap();
    assert_eq!(before.version(), after.version());
    assert_eq!(before.arena(), after.arena());
}

#[tokio::test]
async fn test_self_parent_rejected() {
    let (_, manager) = setup();
    let (a, _, _) = chain(&manager).await;

    assert!(matches!(
        manager.update(a, RoleUpdate::new().parent(Some(a))).await,
        Err(AuthzError::CircularHierarchy { .. })
    ));
}

#[tokio::test]
async fn test_move_cascades_levels() {
    let (store, manager) = setup();
    let (a, b, c) = chain(&manager).await;
    let other = manager.create(NewRole::new("other", "Other")).await.unwrap().id;
    let deeper = manager
        .create(NewRole::new("deeper", "Deeper").with_parent(other))
        .await
        .unwrap()
        .id;

    // Move B (and C with it) under `deeper`
    let moved = manager
        .update(b, RoleUpdate::new().parent(Some(deeper)))
        .await
        .unwrap();
    assert_eq!(moved.hierarchy_level, 2);

    let c_role = store.get(c).await.unwrap().unwrap();
    assert_eq!(c_role.hierarchy_level, 3);

    // B no longer inherits from A
    let details = manager.show(b).await.unwrap();
    assert!(!details.effective_permissions.contains("y"));

    // Back to the root
    manager.update(b, RoleUpdate::new().parent(None)).await.unwrap();
    assert_eq!(store.get(b).await.unwrap().unwrap().hierarchy_level, 0);
    assert_eq!(store.get(c).await.unwrap().unwrap().hierarchy_level, 1);

    let snapshot = store.snapshot().await.unwrap();
    assert!(RoleHierarchy::new().verify(snapshot.arena()).is_ok());
    assert_eq!(manager.show(a).await.unwrap().child_roles_count, 0);
}

#[tokio::test]
async fn test_json_null_parent_moves_to_root() {
    let (store, manager) = setup();
    let (_, b, c) = chain(&manager).await;

    let update: RoleUpdate = serde_json::from_str(r#"{"parent_role_id": null}"#).unwrap();
    let moved = manager.update(b, update).await.unwrap();
    assert_eq!(moved.parent_role_id, None);
    assert_eq!(moved.hierarchy_level, 0);
    assert_eq!(store.get(c).await.unwrap().unwrap().hierarchy_level, 1);

    // An absent field leaves the parent alone
    let update: RoleUpdate = serde_json::from_str(r#"{"display_name": "C2"}"#).unwrap();
    let unchanged = manager.update(c, update).await.unwrap();
    assert_eq!(unchanged.parent_role_id, Some(b));
}

#[tokio::test]
async fn test_update_missing_parent() {
    let (_, manager) = setup();
    let (a, _, _) = chain(&manager).await;

    assert!(matches!(
        manager.update(a, RoleUpdate::new().parent(Some(999))).await,
        Err(AuthzError::NotFound { kind: "parent role", .. })
    ));
}

#[tokio::test]
async fn test_update_validates_fields() {
    let (_, manager) = setup();
    let (a, b, _) = chain(&manager).await;

    assert!(matches!(
        manager.update(a, RoleUpdate::new().priority(0)).await,
        Err(AuthzError::Validation(_))
    ));
    assert!(matches!(
        manager.update(a, RoleUpdate::new().name("b")).await,
        Err(AuthzError::Validation(_))
    ));
    assert!(matches!(
        manager.update(b, RoleUpdate::new().name("Not Valid")).await,
        Err(AuthzError::Validation(_))
    ));

    let renamed = manager.update(b, RoleUpdate::new().name("b2")).await.unwrap();
    assert_eq!(renamed.name, "b2");
}

#[tokio::test]
async fn test_parent_candidates() {
    let (_, manager) = setup();
    let (a, b, c) = chain(&manager).await;
    let other = manager.create(NewRole::new("other", "Other")).await.unwrap().id;

    let ids: Vec<RoleId> = manager
        .parent_candidates(c)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&a) && ids.contains(&b) && ids.contains(&other));

    // Roots have no shallower roles
    assert!(manager.parent_candidates(a).await.unwrap().is_empty());
}

// ============================================================================
// DELETION GUARDS
// ============================================================================

#[tokio::test]
async fn test_delete_guards() {
    let (_, manager) = setup();
    let (a, b, c) = chain(&manager).await;
    let admin = manager
        .create(NewRole::new("super_admin", "Administrator").system())
        .await
        .unwrap()
        .id;

    assert!(matches!(
        manager.delete(admin).await,
        Err(AuthzError::SystemRoleProtected(_))
    ));
    assert!(matches!(
        manager.delete(a).await,
        Err(AuthzError::RoleInUse { children: 1, users: 0, .. })
    ));

    manager.assign_user(c, "u-1").await.unwrap();
    assert!(matches!(
        manager.delete(c).await,
        Err(AuthzError::RoleInUse { users: 1, children: 0, .. })
    ));

    manager.revoke_user(c, "u-1").await.unwrap();
    manager.delete(c).await.unwrap();
    manager.delete(b).await.unwrap();
    manager.delete(a).await.unwrap();

    assert!(matches!(
        manager.show(a).await,
        Err(AuthzError::NotFound { .. })
    ));
    assert_eq!(manager.list().await.unwrap().roles.len(), 1);
}

// ============================================================================
// LISTING
// ============================================================================

#[tokio::test]
async fn test_list_order_and_forest() {
    let (_, manager) = setup();
    let (a, _, _) = chain(&manager).await;
    manager
        .create(NewRole::new("z_root", "Z").with_priority(90))
        .await
        .unwrap();
    manager
        .create(NewRole::new("sibling", "Sibling").with_parent(a).with_priority(10))
        .await
        .unwrap();

    let listing = manager.list().await.unwrap();
    let names: Vec<&str> = listing.roles.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["z_root", "a", "b", "sibling", "c"]);

    assert_eq!(listing.hierarchical_tree.len(), 2);
    assert_eq!(listing.hierarchical_tree[0].name, "z_root");
    let a_node = &listing.hierarchical_tree[1];
    assert_eq!(a_node.children.len(), 2);
    assert_eq!(a_node.size(), 4);

    let json = serde_json::to_value(&listing).unwrap();
    assert!(json["hierarchical_tree"].is_array());
}

#[tokio::test]
async fn test_available_permissions_grouped() {
    let (_, manager) = setup();
    let grouped = manager.available_permissions();

    assert!(grouped.contains_key("orders"));
    assert!(grouped["pos"].iter().any(|entry| entry.key == "pos.sell"));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_grants_all_land() {
    let store = Arc::new(InMemoryRoleStore::new());
    let manager = Arc::new(RoleManager::with_config(
        store.clone(),
        &atelier_authz::EngineConfig {
            max_commit_attempts: 64,
            ..Default::default()
        },
    ));
    let role = manager.create(NewRole::new("busy", "Busy")).await.unwrap().id;

    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager
                .add_permission(role, &format!("reports.r{}", i), None)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let details = manager.show(role).await.unwrap();
    assert_eq!(details.direct_permissions.len(), 16);
}
