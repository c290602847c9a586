//! Role management
//!
//! Every mutation follows `snapshot → validate → mutate a working arena →
//! recompute levels → commit`. Validation failures abort before anything is
//! written, and the commit is a single versioned batch, so a level cascade is
//! either fully persisted or not at all. A commit that loses an optimistic
//! race is retried against a fresh snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{PermissionCatalog, PermissionEntry};
use crate::engine::{AuthorizationEngine, EngineConfig};
use crate::error::{AuthzError, Result};
use crate::hierarchy::{RoleHierarchy, RoleNode};
use crate::permissions::{PermissionResolver, PermissionSet};
use crate::role::{validate_grants, NewRole, Role, RoleUpdate};
use crate::seed::RoleSeed;
use crate::store::{RoleArena, RoleBatch, RoleStore};
use crate::types::{Condition, PrincipalId, RoleId};

/// Every role plus the display forest
#[derive(Debug, Clone, Serialize)]
pub struct RoleListing {
    /// Roles ordered by level, then priority (highest first), then name
    pub roles: Vec<Role>,

    /// Display forest
    pub hierarchical_tree: Vec<RoleNode>,
}

/// One role with its permission breakdown
#[derive(Debug, Clone, Serialize)]
pub struct RoleDetails {
    /// Role record
    pub role: Role,

    /// Direct plus inherited grants
    pub effective_permissions: PermissionSet,

    /// Grants held only through inheritance
    pub inherited_permissions: PermissionSet,

    /// Direct grants
    pub direct_permissions: PermissionSet,

    /// Conditions on direct grants
    pub conditions: BTreeMap<String, Condition>,

    /// Assigned users
    pub users_count: usize,

    /// Direct child roles
    pub child_roles_count: usize,
}

/// Working copy of the arena for one mutation attempt
struct Mutation {
    arena: RoleArena,
    touched: BTreeSet<RoleId>,
    deleted: Vec<RoleId>,
    now: DateTime<Utc>,
}

impl Mutation {
    fn new(arena: RoleArena) -> Self {
        Self {
            arena,
            touched: BTreeSet::new(),
            deleted: Vec::new(),
            now: Utc::now(),
        }
    }

    fn role(&self, id: RoleId) -> Result<Role> {
        self.arena
            .get(id)
            .cloned()
            .ok_or_else(|| AuthzError::role_not_found(id))
    }

    fn put(&mut self, role: Role) {
        self.touched.insert(role.id);
        self.arena.insert(role);
    }

    fn delete(&mut self, id: RoleId) {
        self.arena.remove(id);
        self.touched.remove(&id);
        self.deleted.push(id);
    }

    fn recompute(&mut self, hierarchy: &RoleHierarchy, id: RoleId) -> Result<()> {
        let changed = hierarchy.recompute_levels(&mut self.arena, id)?;
        self.touched.extend(changed);
        Ok(())
    }

    fn ensure_unique_name(&self, name: &str, except: Option<RoleId>) -> Result<()> {
        match self.arena.find_by_name(name) {
            Some(existing) if Some(existing.id) != except => Err(AuthzError::Validation(
                format!("role name '{}' is already taken", name),
            )),
            _ => Ok(()),
        }
    }

    fn into_batch(self, expected_version: u64) -> RoleBatch {
        let mut batch = RoleBatch::against(expected_version);
        batch.upserts = self
            .touched
            .iter()
            .filter_map(|id| self.arena.get(*id).cloned())
            .collect();
        batch.deletes = self.deleted;
        batch
    }
}

/// Listing order: level, then priority (highest first), then name
fn listing_order(a: &Role, b: &Role) -> Ordering {
    a.hierarchy_level
        .cmp(&b.hierarchy_level)
        .then(b.priority.cmp(&a.priority))
        .then_with(|| a.name.cmp(&b.name))
}

/// Role management operations over a [`RoleStore`]
pub struct RoleManager {
    store: Arc<dyn RoleStore>,
    hierarchy: RoleHierarchy,
    permissions: Arc<PermissionResolver>,
    catalog: PermissionCatalog,
    max_commit_attempts: usize,
}

impl RoleManager {
    /// Manager with default configuration and the workshop catalog
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self::with_config(store, &EngineConfig::default())
    }

    /// Manager honoring the depth bound, cache switch and retry bound of `config`
    pub fn with_config(store: Arc<dyn RoleStore>, config: &EngineConfig) -> Self {
        let hierarchy = RoleHierarchy::with_max_depth(config.max_hierarchy_depth);
        Self {
            store,
            permissions: Arc::new(PermissionResolver::with_cache(
                hierarchy.clone(),
                config.enable_cache,
            )),
            hierarchy,
            catalog: PermissionCatalog::workshop(),
            max_commit_attempts: config.max_commit_attempts.max(1),
        }
    }

    /// Manager sharing an engine's store and effective-permission cache
    pub fn for_engine(engine: &AuthorizationEngine) -> Self {
        let mut manager = Self::with_config(engine.store(), engine.config());
        manager.permissions = engine.permission_resolver();
        manager
    }

    /// Replace the permission catalog
    pub fn with_catalog(mut self, catalog: PermissionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    async fn mutate<T>(
        &self,
        operation: &str,
        mut apply: impl FnMut(&mut Mutation) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let snapshot = self.store.snapshot().await?;
            let mut mutation = Mutation::new(snapshot.arena().clone());
            let output = apply(&mut mutation)?;

            match self.store.commit(mutation.into_batch(snapshot.version())).await {
                Ok(version) => {
                    debug!("{} committed at version {}", operation, version);
                    return Ok(output);
                }
                Err(AuthzError::Conflict { expected, actual })
                    if attempt < self.max_commit_attempts =>
                {
                    warn!(
                        "{} lost a concurrent update (version {} -> {}), retrying ({}/{})",
                        operation, expected, actual, attempt, self.max_commit_attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Every role plus the display forest
    pub async fn list(&self) -> Result<RoleListing> {
        let snapshot = self.store.snapshot().await?;
        let mut roles: Vec<Role> = snapshot.arena().roles().cloned().collect();
        roles.sort_by(listing_order);

        Ok(RoleListing {
            roles,
            hierarchical_tree: self.hierarchy.build_forest(snapshot.arena()),
        })
    }

    /// Create a role, computing its level from the parent
    pub async fn create(&self, fields: NewRole) -> Result<Role> {
        fields.validate()?;
        let id = self.store.allocate_id().await?;

        let role = self
            .mutate("create role", |m| {
                m.ensure_unique_name(&fields.name, None)?;
                if let Some(parent) = fields.parent_role_id {
                    if !m.arena.contains(parent) {
                        return Err(AuthzError::NotFound {
                            kind: "parent role",
                            id: parent.to_string(),
                        });
                    }
                }

                let now = m.now;
                m.put(Role::from_new(id, fields.clone(), now));
                m.recompute(&self.hierarchy, id)?;
                m.role(id)
            })
            .await?;

        info!(
            "Created role '{}' ({}) at level {}",
            role.name, role.id, role.hierarchy_level
        );
        Ok(role)
    }

    /// One role with its permission breakdown
    pub async fn show(&self, id: RoleId) -> Result<RoleDetails> {
        let snapshot = self.store.snapshot().await?;
        let arena = snapshot.arena();
        let role = arena
            .get(id)
            .cloned()
            .ok_or_else(|| AuthzError::role_not_found(id))?;

        let effective = self.permissions.effective_cached(&snapshot, id)?;
        let inherited = self.permissions.inherited_only(arena, id)?;

        Ok(RoleDetails {
            effective_permissions: (*effective).clone(),
            inherited_permissions: inherited,
            direct_permissions: role.permissions.clone(),
            conditions: role.conditions.clone(),
            users_count: role.users.len(),
            child_roles_count: arena.child_count(id),
            role,
        })
    }

    /// Update a role. A parent change is validated against cycles and
    /// cascades levels to every descendant.
    pub async fn update(&self, id: RoleId, changes: RoleUpdate) -> Result<Role> {
        changes.validate()?;

        let role = self
            .mutate("update role", |m| {
                let mut role = m.role(id)?;

                if let Some(name) = changes.name.as_deref().filter(|n| *n != role.name) {
                    if role.is_system_role {
                        return Err(AuthzError::SystemRoleProtected(role.name.clone()));
                    }
                    m.ensure_unique_name(name, Some(id))?;
                }

                changes.apply_fields(&mut role);
                validate_grants(&role.permissions, &role.conditions)?;

                if let Some(parent) = changes.parent_role_id {
                    self.hierarchy.validate_parent(&m.arena, id, parent)?;
                    role.parent_role_id = parent;
                }

                role.updated_at = m.now;
                m.put(role);
                m.recompute(&self.hierarchy, id)?;
                m.role(id)
            })
            .await?;

        info!("Updated role '{}' ({})", role.name, role.id);
        Ok(role)
    }

    /// Delete a role that is neither a system role nor in use
    pub async fn delete(&self, id: RoleId) -> Result<Role> {
        let role = self
            .mutate("delete role", |m| {
                let role = m.role(id)?;
                if role.is_system_role {
                    return Err(AuthzError::SystemRoleProtected(role.name));
                }

                let children = m.arena.child_count(id);
                if !role.users.is_empty() || children > 0 {
                    return Err(AuthzError::RoleInUse {
                        name: role.name,
                        users: role.users.len(),
                        children,
                    });
                }

                m.delete(id);
                Ok(role)
            })
            .await?;

        info!("Deleted role '{}' ({})", role.name, role.id);
        Ok(role)
    }

    /// Grant a permission directly, optionally with a condition
    pub async fn add_permission(
        &self,
        id: RoleId,
        permission: &str,
        conditions: Option<Condition>,
    ) -> Result<Role> {
        let role = self
            .mutate("add permission", |m| {
                let mut role = m.role(id)?;
                if self.permissions.add_permission_with_conditions(
                    &mut role,
                    permission,
                    conditions.clone(),
                )? {
                    role.updated_at = m.now;
                    m.put(role);
                }
                m.role(id)
            })
            .await?;

        info!("Granted '{}' to role '{}'", permission, role.name);
        Ok(role)
    }

    /// Revoke a direct grant and its condition
    pub async fn remove_permission(&self, id: RoleId, permission: &str) -> Result<Role> {
        let role = self
            .mutate("remove permission", |m| {
                let mut role = m.role(id)?;
                if self.permissions.remove_permission(&mut role, permission) {
                    role.updated_at = m.now;
                    m.put(role);
                }
                m.role(id)
            })
            .await?;

        info!("Revoked '{}' from role '{}'", permission, role.name);
        Ok(role)
    }

    /// Roles that may become the parent of `id`: shallower and not creating a
    /// cycle, in listing order
    pub async fn parent_candidates(&self, id: RoleId) -> Result<Vec<Role>> {
        let snapshot = self.store.snapshot().await?;
        let arena = snapshot.arena();

        let mut candidates: Vec<Role> = self
            .hierarchy
            .parent_candidates(arena, id)?
            .into_iter()
            .filter_map(|candidate| arena.get(candidate).cloned())
            .collect();
        candidates.sort_by(listing_order);
        Ok(candidates)
    }

    /// Permission catalog grouped by module
    pub fn available_permissions(&self) -> &BTreeMap<String, Vec<PermissionEntry>> {
        self.catalog.grouped()
    }

    /// Effective permission set of one role
    pub async fn effective_permissions(&self, id: RoleId) -> Result<Arc<PermissionSet>> {
        let snapshot = self.store.snapshot().await?;
        self.permissions.effective_cached(&snapshot, id)
    }

    /// Record that a principal is assigned to a role
    pub async fn assign_user(&self, id: RoleId, principal: &str) -> Result<Role> {
        let role = self
            .mutate("assign user", |m| {
                let mut role = m.role(id)?;
                if role.users.insert(principal.to_string()) {
                    role.updated_at = m.now;
                    m.put(role);
                }
                m.role(id)
            })
            .await?;

        info!("Assigned {} to role '{}'", principal, role.name);
        Ok(role)
    }

    /// Drop a principal's assignment back-reference
    pub async fn revoke_user(&self, id: RoleId, principal: &str) -> Result<Role> {
        let role = self
            .mutate("revoke user", |m| {
                let mut role = m.role(id)?;
                if role.users.remove(principal) {
                    role.updated_at = m.now;
                    m.put(role);
                }
                m.role(id)
            })
            .await?;

        info!("Revoked {} from role '{}'", principal, role.name);
        Ok(role)
    }

    /// Create seeded roles in order, resolving parents by name. Roles whose
    /// name already exists are kept as they are.
    pub async fn apply_seed(&self, seeds: Vec<RoleSeed>) -> Result<Vec<Role>> {
        let mut seeded = Vec::with_capacity(seeds.len());

        for seed in seeds {
            let existing = self.store.find_by_name(&seed.role.name).await?;
            let mut role = match existing {
                Some(existing) => {
                    debug!("Seed role '{}' already exists, keeping it", existing.name);
                    existing
                }
                None => {
                    let mut fields = seed.role;
                    fields.parent_role_id = match &seed.parent {
                        Some(parent) => Some(self.role_id_by_name(parent).await?),
                        None => None,
                    };
                    self.create(fields).await?
                }
            };

            for user in &seed.users {
                role = self.assign_user(role.id, user).await?;
            }
            seeded.push(role);
        }

        info!("Applied seed with {} roles", seeded.len());
        Ok(seeded)
    }

    async fn role_id_by_name(&self, name: &str) -> Result<RoleId> {
        self.store
            .find_by_name(name)
            .await?
            .map(|role| role.id)
            .ok_or_else(|| AuthzError::NotFound {
                kind: "parent role",
                id: name.to_string(),
            })
    }

    /// Principals assigned to a role
    pub async fn users(&self, id: RoleId) -> Result<BTreeSet<PrincipalId>> {
        self.store
            .get(id)
            .await?
            .map(|role| role.users)
            .ok_or_else(|| AuthzError::role_not_found(id))
    }
}
