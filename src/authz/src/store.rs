//! Role persistence contract and in-memory store
//!
//! Roles live in a flat, id-keyed arena with a separate children index. Stores
//! hand out immutable, versioned snapshots and accept atomic batches guarded by
//! an optimistic version check, so a level cascade is never observed
//! half-applied.

use crate::error::{AuthzError, Result};
use crate::role::Role;
use crate::types::RoleId;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Flat role collection keyed by id, plus a parent → children index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleArena {
    roles: BTreeMap<RoleId, Role>,
    children: BTreeMap<RoleId, BTreeSet<RoleId>>,
}

impl RoleArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an arena from role records
    pub fn from_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut arena = Self::new();
        for role in roles {
            arena.insert(role);
        }
        arena
    }

    /// Look up a role
    pub fn get(&self, id: RoleId) -> Option<&Role> {
        self.roles.get(&id)
    }

    /// Whether a role exists
    pub fn contains(&self, id: RoleId) -> bool {
        self.roles.contains_key(&id)
    }

    /// Look up a role by its unique name
    pub fn find_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|role| role.name == name)
    }

    /// Parent of a role, if it exists in the arena
    pub fn parent_of(&self, id: RoleId) -> Option<&Role> {
        self.get(id)?.parent_role_id.and_then(|parent| self.get(parent))
    }

    /// Direct children of a role
    pub fn children(&self, id: RoleId) -> impl Iterator<Item = RoleId> + '_ {
        self.children.get(&id).into_iter().flatten().copied()
    }

    /// Number of direct children
    pub fn child_count(&self, id: RoleId) -> usize {
        self.children.get(&id).map_or(0, BTreeSet::len)
    }

    /// All roles in id order
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    /// Number of roles
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Insert or replace a role, keeping the children index in sync
    pub fn insert(&mut self, role: Role) -> Option<Role> {
        let previous = self.remove(role.id);
        if let Some(parent) = role.parent_role_id {
            self.children.entry(parent).or_default().insert(role.id);
        }
        self.roles.insert(role.id, role);
        previous
    }

    /// Remove a role. Its children keep their (now dangling) parent edge.
    pub fn remove(&mut self, id: RoleId) -> Option<Role> {
        let role = self.roles.remove(&id)?;
        if let Some(parent) = role.parent_role_id {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.remove(&id);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
        Some(role)
    }

    /// Set a role's derived level
    pub(crate) fn set_level(&mut self, id: RoleId, level: u32) -> bool {
        match self.roles.get_mut(&id) {
            Some(role) if role.hierarchy_level != level => {
                role.hierarchy_level = level;
                true
            }
            _ => false,
        }
    }
}

/// Immutable, versioned view of every role
#[derive(Debug, Clone, Default)]
pub struct RoleSnapshot {
    version: u64,
    arena: RoleArena,
}

impl RoleSnapshot {
    /// Create a snapshot
    pub fn new(version: u64, arena: RoleArena) -> Self {
        Self { version, arena }
    }

    /// Version this snapshot was read at
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Role arena
    pub fn arena(&self) -> &RoleArena {
        &self.arena
    }
}

/// Atomic unit of work against a store
#[derive(Debug, Clone, Default)]
pub struct RoleBatch {
    /// Version the batch was computed against
    pub expected_version: u64,

    /// Roles to insert or replace
    pub upserts: Vec<Role>,

    /// Roles to delete
    pub deletes: Vec<RoleId>,
}

impl RoleBatch {
    /// Empty batch against a snapshot version
    pub fn against(expected_version: u64) -> Self {
        Self {
            expected_version,
            ..Default::default()
        }
    }

    /// Whether the batch changes nothing
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Role persistence contract
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Consistent snapshot of every role
    async fn snapshot(&self) -> Result<Arc<RoleSnapshot>>;

    /// Apply a batch atomically. Fails with `Conflict` if the store moved past
    /// `batch.expected_version`. Returns the new version.
    async fn commit(&self, batch: RoleBatch) -> Result<u64>;

    /// Reserve a fresh role id
    async fn allocate_id(&self) -> Result<RoleId>;

    /// Get a role by id
    async fn get(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.snapshot().await?.arena().get(id).cloned())
    }

    /// Get a role by name
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.snapshot().await?.arena().find_by_name(name).cloned())
    }

    /// Roles whose parent is `parent` (`None` for roots)
    async fn find_by_parent(&self, parent: Option<RoleId>) -> Result<Vec<Role>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .arena()
            .roles()
            .filter(|role| role.parent_role_id == parent)
            .cloned()
            .collect())
    }

    /// Roles whose level falls in `levels`
    async fn find_by_level_range(&self, levels: RangeInclusive<u32>) -> Result<Vec<Role>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .arena()
            .roles()
            .filter(|role| levels.contains(&role.hierarchy_level))
            .cloned()
            .collect())
    }

    /// Every role
    async fn list(&self) -> Result<Vec<Role>> {
        Ok(self.snapshot().await?.arena().roles().cloned().collect())
    }
}

/// In-memory store with copy-on-write snapshots
pub struct InMemoryRoleStore {
    current: RwLock<Arc<RoleSnapshot>>,
    next_id: AtomicU64,
}

impl InMemoryRoleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RoleSnapshot::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a store pre-populated with role records, taken as-is
    pub fn with_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        let arena = RoleArena::from_roles(roles);
        let next_id = arena.roles().map(|role| role.id).max().unwrap_or(0) + 1;

        Self {
            current: RwLock::new(Arc::new(RoleSnapshot::new(1, arena))),
            next_id: AtomicU64::new(next_id),
        }
    }
}

impl Default for InMemoryRoleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn snapshot(&self) -> Result<Arc<RoleSnapshot>> {
        Ok(Arc::clone(&*self.current.read().await))
    }

    async fn commit(&self, batch: RoleBatch) -> Result<u64> {
        let mut current = self.current.write().await;

        if current.version != batch.expected_version {
            return Err(AuthzError::Conflict {
                expected: batch.expected_version,
                actual: current.version,
            });
        }

        if batch.is_empty() {
            return Ok(current.version);
        }

        let mut arena = current.arena.clone();
        for id in &batch.deletes {
            arena.remove(*id);
        }
        for role in batch.upserts {
            arena.insert(role);
        }

        let version = current.version + 1;
        debug!(
            "Committed role batch: version {} -> {} ({} deletes)",
            current.version,
            version,
            batch.deletes.len()
        );
        *current = Arc::new(RoleSnapshot::new(version, arena));

        Ok(version)
    }

    async fn allocate_id(&self) -> Result<RoleId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::NewRole;
    use chrono::Utc;

    fn role(id: RoleId, name: &str, parent: Option<RoleId>) -> Role {
        let mut fields = NewRole::new(name, name);
        fields.parent_role_id = parent;
        Role::from_new(id, fields, Utc::now())
    }

    #[test]
    fn test_arena_children_index() {
        let mut arena = RoleArena::from_roles([
            role(1, "owner", None),
            role(2, "manager", Some(1)),
            role(3, "worker", Some(2)),
        ]);

        assert_eq!(arena.children(1).collect::<Vec<_>>(), vec![2]);
        assert_eq!(arena.child_count(2), 1);
        assert_eq!(arena.parent_of(3).map(|r| r.id), Some(2));

        // Re-parenting moves the index entry
        arena.insert(role(3, "worker", Some(1)));
        assert_eq!(arena.children(1).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(arena.child_count(2), 0);

        arena.remove(2);
        assert_eq!(arena.children(1).collect::<Vec<_>>(), vec![3]);
        assert_eq!(arena.find_by_name("worker").map(|r| r.id), Some(3));
    }

    #[tokio::test]
    async fn test_commit_bumps_version() {
        let store = InMemoryRoleStore::new();
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.version(), 0);

        let id = store.allocate_id().await.unwrap();
        let mut batch = RoleBatch::against(0);
        batch.upserts.push(role(id, "owner", None));

        assert_eq!(store.commit(batch).await.unwrap(), 1);
        assert!(store.get(id).await.unwrap().is_some());

        // The old snapshot is untouched
        assert!(snapshot.arena().is_empty());
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts() {
        let store = InMemoryRoleStore::with_roles([role(1, "owner", None)]);

        let mut first = RoleBatch::against(1);
        first.upserts.push(role(2, "manager", Some(1)));
        store.commit(first).await.unwrap();

        let mut stale = RoleBatch::against(1);
        stale.deletes.push(1);
        let result = store.commit(stale).await;

        assert!(matches!(
            result,
            Err(AuthzError::Conflict { expected: 1, actual: 2 })
        ));
        assert!(store.get(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_queries() {
        let mut worker = role(3, "worker", Some(2));
        worker.hierarchy_level = 2;
        let mut manager = role(2, "manager", Some(1));
        manager.hierarchy_level = 1;
        let store = InMemoryRoleStore::with_roles([role(1, "owner", None), manager, worker]);

        assert_eq!(store.find_by_name("manager").await.unwrap().map(|r| r.id), Some(2));
        assert_eq!(store.find_by_parent(None).await.unwrap().len(), 1);
        assert_eq!(store.find_by_parent(Some(2)).await.unwrap()[0].id, 3);
        assert_eq!(store.find_by_level_range(1..=2).await.unwrap().len(), 2);
        assert_eq!(store.list().await.unwrap().len(), 3);
        assert_eq!(store.allocate_id().await.unwrap(), 4);
    }
}
