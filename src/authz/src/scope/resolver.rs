//! Scope resolver
//!
//! Decides how broadly a permission check applies for a principal and an
//! optional concrete resource, and builds the fully-qualified key.

use std::collections::BTreeSet;
use std::sync::Arc;
use dashmap::DashMap;
use tracing::debug;

use super::types::{PermissionKey, Resource, Scope};
use crate::types::Principal;

/// Counts of resolved scopes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeStats {
    /// Resolutions to `own`
    pub own: usize,
    /// Resolutions to `department`
    pub department: usize,
    /// Resolutions to `all`
    pub all: usize,
}

impl ScopeStats {
    /// Total number of resolutions
    pub fn total(&self) -> usize {
        self.own + self.department + self.all
    }
}

/// Resolves the breadth of a permission check
///
/// # Examples
///
/// ```
/// use atelier_authz::scope::{Scope, ScopeResolver};
///
/// let resolver = ScopeResolver::new();
/// let key = resolver.build_permission_key("orders.view", Scope::Own);
/// assert_eq!(key.to_string(), "orders.view.own");
///
/// // An explicit scope is kept as-is
/// let key = resolver.build_permission_key("orders.view.all", Scope::Own);
/// assert_eq!(key.to_string(), "orders.view.all");
/// ```
#[derive(Debug, Default)]
pub struct ScopeResolver {
    stats: Arc<DashMap<Scope, usize>>,
}

impl ScopeResolver {
    /// Creates a new ScopeResolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Determines the applicable scope.
    ///
    /// Without a resource this is the broadest scope the principal holds a
    /// wildcard grant for. With a resource, ownership is checked before
    /// department, and anything else needs `all`.
    pub fn determine_scope(
        &self,
        principal: &Principal,
        effective: &BTreeSet<String>,
        resource: Option<&dyn Resource>,
    ) -> Scope {
        let scope = match resource {
            None => Self::broadest_held_scope(effective),
            Some(resource) => Self::scope_for_resource(principal, resource),
        };

        debug!(
            "Resolved scope '{}' for principal {} (resource: {})",
            scope,
            principal.id,
            resource.is_some()
        );
        *self.stats.entry(scope).or_insert(0) += 1;

        scope
    }

    /// Builds the fully-qualified key; a key that already carries an explicit
    /// scope is returned unchanged
    pub fn build_permission_key(&self, permission: &str, scope: Scope) -> PermissionKey {
        match PermissionKey::parse(permission) {
            Ok(key) if key.is_scoped() => key,
            Ok(key) => PermissionKey::scoped(key.action, scope),
            Err(_) => PermissionKey::scoped(permission, scope),
        }
    }

    /// Broadest scope among the principal's `*.<scope>` grants, `own` if none
    pub fn broadest_held_scope(effective: &BTreeSet<String>) -> Scope {
        let held = |scope: Scope| {
            let suffix = format!(".{}", scope);
            effective.iter().any(|permission| permission.ends_with(&suffix))
        };

        if held(Scope::All) {
            Scope::All
        } else if held(Scope::Department) {
            Scope::Department
        } else {
            Scope::Own
        }
    }

    fn scope_for_resource(principal: &Principal, resource: &dyn Resource) -> Scope {
        if resource.owner_id().is_some_and(|owner| owner == principal.id) {
            return Scope::Own;
        }

        match (resource.owning_department(), principal.department.as_deref()) {
            (Some(department), Some(own)) if department == own => Scope::Department,
            _ => Scope::All,
        }
    }

    /// Returns resolution statistics
    pub fn stats(&self) -> ScopeStats {
        let count = |scope| self.stats.get(&scope).map(|v| *v).unwrap_or(0);
        ScopeStats {
            own: count(Scope::Own),
            department: count(Scope::Department),
            all: count(Scope::All),
        }
    }

    /// Resets resolution statistics
    pub fn reset_stats(&self) {
        self.stats.clear();
    }
}
