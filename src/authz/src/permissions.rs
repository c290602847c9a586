//! Effective permission resolution
//!
//! A role's effective set is its direct grants plus, when the role is
//! inheritable and has a parent, the parent's effective set, recursively.
//! Results computed from a store snapshot are cached per role and tagged with
//! the snapshot version, so any committed change to a role or one of its
//! ancestors invalidates them.

use crate::error::{AuthzError, Result};
use crate::hierarchy::RoleHierarchy;
use crate::role::{validate_permission, Role};
use crate::store::{RoleArena, RoleSnapshot};
use crate::types::{Condition, Principal, RoleId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Set of permission keys
pub type PermissionSet = BTreeSet<String>;

/// Cached effective set with the snapshot version it was computed at
#[derive(Debug, Clone)]
struct CachedPermissions {
    version: u64,
    permissions: Arc<PermissionSet>,
}

/// Effective-set cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: usize,
    /// Lookups that had to compute
    pub misses: usize,
    /// Cached entries
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A principal's active roles and the union of their effective sets
#[derive(Debug, Clone, Default)]
pub struct PrincipalPermissions {
    /// Roles whose assignment is active, highest priority first
    pub roles: Vec<Role>,

    /// Union of the active roles' effective sets
    pub effective: PermissionSet,

    /// Effective set per active role, aligned with `roles`
    pub per_role: Vec<Arc<PermissionSet>>,
}

impl PrincipalPermissions {
    /// Highest-priority active role
    pub fn primary_role(&self) -> Option<&Role> {
        self.roles.first()
    }

    /// First active role (by priority) whose effective set holds `key`
    pub fn role_granting(&self, key: &str) -> Option<&Role> {
        self.roles
            .iter()
            .zip(&self.per_role)
            .find(|(_, set)| set.contains(key))
            .map(|(role, _)| role)
    }
}

/// Computes what roles actually grant
#[derive(Debug)]
pub struct PermissionResolver {
    hierarchy: RoleHierarchy,
    cache: Option<DashMap<RoleId, CachedPermissions>>,
    stats: DashMap<&'static str, usize>,
}

impl Default for PermissionResolver {
    fn default() -> Self {
        Self::new(RoleHierarchy::new())
    }
}

impl PermissionResolver {
    /// Resolver with caching enabled
    pub fn new(hierarchy: RoleHierarchy) -> Self {
        Self::with_cache(hierarchy, true)
    }

    /// Resolver with caching switched on or off
    pub fn with_cache(hierarchy: RoleHierarchy, enable_cache: bool) -> Self {
        Self {
            hierarchy,
            cache: enable_cache.then(DashMap::new),
            stats: DashMap::new(),
        }
    }

    /// Direct grants of a role
    pub fn direct_permissions(&self, arena: &RoleArena, role: RoleId) -> Result<PermissionSet> {
        arena
            .get(role)
            .map(|r| r.permissions.clone())
            .ok_or_else(|| AuthzError::role_not_found(role))
    }

    /// Direct grants plus inherited ones, walking up while each role on the
    /// way is inheritable
    pub fn effective_permissions(&self, arena: &RoleArena, role: RoleId) -> Result<PermissionSet> {
        let mut current = arena.get(role).ok_or_else(|| AuthzError::role_not_found(role))?;
        let mut effective = current.permissions.clone();
        let mut depth = 0;

        while current.is_inheritable {
            let Some(parent) = current.parent_role_id.and_then(|id| arena.get(id)) else {
                break;
            };
            depth += 1;
            if depth > self.hierarchy.max_depth() {
                return Err(AuthzError::HierarchyTooDeep {
                    role,
                    max_depth: self.hierarchy.max_depth(),
                });
            }
            effective.extend(parent.permissions.iter().cloned());
            current = parent;
        }

        Ok(effective)
    }

    /// Effective set computed from a snapshot, served from the cache when the
    /// cached entry was computed at the same version
    pub fn effective_cached(
        &self,
        snapshot: &RoleSnapshot,
        role: RoleId,
    ) -> Result<Arc<PermissionSet>> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(self.effective_permissions(snapshot.arena(), role)?));
        };

        if let Some(entry) = cache.get(&role) {
            if entry.version == snapshot.version() {
                self.increment_stat("hits");
                return Ok(Arc::clone(&entry.permissions));
            }
        }

        self.increment_stat("misses");
        let permissions = Arc::new(self.effective_permissions(snapshot.arena(), role)?);
        cache.insert(
            role,
            CachedPermissions {
                version: snapshot.version(),
                permissions: Arc::clone(&permissions),
            },
        );

        Ok(permissions)
    }

    /// Permissions a role holds only through inheritance
    pub fn inherited_only(&self, arena: &RoleArena, role: RoleId) -> Result<PermissionSet> {
        let direct = self.direct_permissions(arena, role)?;
        let effective = self.effective_permissions(arena, role)?;
        Ok(effective.difference(&direct).cloned().collect())
    }

    /// Active roles of a principal at `now` and the union of their effective
    /// sets. Expired assignments and assignments to missing roles contribute
    /// nothing.
    pub fn principal_permissions(
        &self,
        snapshot: &RoleSnapshot,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<PrincipalPermissions> {
        let mut roles: Vec<Role> = Vec::new();
        for assignment in &principal.assignments {
            match snapshot.arena().get(assignment.role_id) {
                Some(role) if role.assignment_active(assignment, now) => {
                    if !roles.iter().any(|r| r.id == role.id) {
                        roles.push(role.clone());
                    }
                }
                Some(_) => debug!(
                    "Skipping expired assignment of role {} for {}",
                    assignment.role_id, principal.id
                ),
                None => debug!(
                    "Skipping assignment of missing role {} for {}",
                    assignment.role_id, principal.id
                ),
            }
        }
        roles.sort_by_key(|role| (Reverse(role.priority), role.hierarchy_level, role.id));

        let mut resolved = PrincipalPermissions::default();
        for role in roles {
            let set = self.effective_cached(snapshot, role.id)?;
            resolved.effective.extend(set.iter().cloned());
            resolved.per_role.push(set);
            resolved.roles.push(role);
        }

        Ok(resolved)
    }

    /// Grant a permission directly, attaching or replacing its condition.
    /// Granting is idempotent. Returns whether the role changed.
    pub fn add_permission_with_conditions(
        &self,
        role: &mut Role,
        permission: &str,
        conditions: Option<Condition>,
    ) -> Result<bool> {
        validate_permission(permission)?;

        let mut changed = role.permissions.insert(permission.to_string());
        if let Some(conditions) = conditions.filter(|c| !c.is_empty()) {
            let previous = role.conditions.insert(permission.to_string(), conditions.clone());
            changed |= previous.as_ref() != Some(&conditions);
        }

        Ok(changed)
    }

    /// Revoke a direct grant and its condition. Returns whether the role changed.
    pub fn remove_permission(&self, role: &mut Role, permission: &str) -> bool {
        let removed = role.permissions.remove(permission);
        let had_condition = role.conditions.remove(permission).is_some();
        removed || had_condition
    }

    /// Drop every cached entry
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            debug!("Effective permission cache cleared");
        }
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            entries: self.cache.as_ref().map_or(0, DashMap::len),
        }
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::NewRole;
    use crate::types::RoleAssignment;
    use chrono::Duration;

    fn role(id: RoleId, fields: NewRole) -> Role {
        Role::from_new(id, fields, Utc::now())
    }

    fn set(items: &[&str]) -> PermissionSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_inherits_from_parent() {
        let resolver = PermissionResolver::default();
        let arena = RoleArena::from_roles([
            role(1, NewRole::new("a", "A").with_permissions(["y"])),
            role(2, NewRole::new("b", "B").with_parent(1).with_permissions(["x"])),
        ]);

        assert_eq!(resolver.effective_permissions(&arena, 2).unwrap(), set(&["x", "y"]));
        assert_eq!(resolver.inherited_only(&arena, 2).unwrap(), set(&["y"]));
        assert_eq!(resolver.direct_permissions(&arena, 2).unwrap(), set(&["x"]));
    }

    #[test]
    fn test_non_inheritable_stops_chain() {
        let resolver = PermissionResolver::default();
        let arena = RoleArena::from_roles([
            role(1, NewRole::new("a", "A").with_permissions(["top"])),
            role(2, NewRole::new("b", "B").with_parent(1).inheritable(false).with_permissions(["mid"])),
            role(3, NewRole::new("c", "C").with_parent(2).with_permissions(["leaf"])),
        ]);

        assert_eq!(resolver.effective_permissions(&arena, 2).unwrap(), set(&["mid"]));
        assert_eq!(resolver.effective_permissions(&arena, 3).unwrap(), set(&["leaf", "mid"]));
        assert!(resolver.inherited_only(&arena, 2).unwrap().is_empty());
    }

    #[test]
    fn test_missing_role() {
        let resolver = PermissionResolver::default();
        assert!(matches!(
            resolver.effective_permissions(&RoleArena::new(), 9),
            Err(AuthzError::NotFound { .. })
        ));
    }

    #[test]
    fn test_cache_is_version_tagged() {
        let resolver = PermissionResolver::default();
        let arena = RoleArena::from_roles([role(1, NewRole::new("a", "A").with_permissions(["x"]))]);
        let v1 = RoleSnapshot::new(1, arena.clone());

        resolver.effective_cached(&v1, 1).unwrap();
        resolver.effective_cached(&v1, 1).unwrap();
        assert_eq!(resolver.cache_stats().hits, 1);

        let mut changed = arena;
        let mut updated = changed.get(1).unwrap().clone();
        updated.permissions.insert("z".to_string());
        changed.insert(updated);
        let v2 = RoleSnapshot::new(2, changed);

        assert_eq!(*resolver.effective_cached(&v2, 1).unwrap(), set(&["x", "z"]));
        let stats = resolver.cache_stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_principal_permissions_skip_expired() {
        let resolver = PermissionResolver::default();
        let now = Utc::now();
        let snapshot = RoleSnapshot::new(
            1,
            RoleArena::from_roles([
                role(1, NewRole::new("clerk", "Clerk").with_permissions(["pos.sell.own"])),
                role(2, NewRole::new("lead", "Lead").with_priority(90).with_permissions(["pos.refund.all"])),
            ]),
        );
        let principal = Principal::new("u-1")
            .with_assignment(RoleAssignment::new(1).expiring_at(now - Duration::minutes(5)))
            .with_role(2)
            .with_role(7);

        let resolved = resolver.principal_permissions(&snapshot, &principal, now).unwrap();
        assert_eq!(resolved.effective, set(&["pos.refund.all"]));
        assert_eq!(resolved.primary_role().map(|r| r.name.as_str()), Some("lead"));
        assert_eq!(
            resolved.role_granting("pos.refund.all").map(|r| r.id),
            Some(2)
        );
    }

    #[test]
    fn test_add_and_remove_permission() {
        let resolver = PermissionResolver::default();
        let mut role = role(1, NewRole::new("a", "A"));
        let condition = Condition::new().with("department", "production");

        assert!(resolver
            .add_permission_with_conditions(&mut role, "orders.edit", Some(condition.clone()))
            .unwrap());
        // Idempotent
        assert!(!resolver
            .add_permission_with_conditions(&mut role, "orders.edit", Some(condition.clone()))
            .unwrap());
        assert!(!resolver
            .add_permission_with_conditions(&mut role, "orders.edit", None)
            .unwrap());
        assert_eq!(role.condition_for("orders.edit"), Some(&condition));

        assert!(resolver
            .add_permission_with_conditions(&mut role, "Orders Edit", None)
            .is_err());

        assert!(resolver.remove_permission(&mut role, "orders.edit"));
        assert!(!role.grants_directly("orders.edit"));
        assert!(role.condition_for("orders.edit").is_none());
        assert!(!resolver.remove_permission(&mut role, "orders.edit"));
    }
}
