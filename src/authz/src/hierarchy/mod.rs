//! Role hierarchy maintenance
//!
//! Keeps the parent/child forest consistent: parentability checks with cycle
//! rejection, derived level recomputation cascading to every descendant, and
//! forest assembly for display.
//!
//! All traversals run over a [`RoleArena`] (flat id-keyed storage plus a
//! children index) and are bounded by `max_depth`; exceeding the bound is a
//! structural error rather than an endless walk.
//!
//! # Example
//!
//! ```rust
//! use atelier_authz::hierarchy::RoleHierarchy;
//! use atelier_authz::role::{NewRole, Role};
//! use atelier_authz::store::RoleArena;
//! use chrono::Utc;
//!
//! let now = Utc::now();
//! let mut arena = RoleArena::from_roles([
//!     Role::from_new(1, NewRole::new("owner", "Owner"), now),
//!     Role::from_new(2, NewRole::new("manager", "Manager").with_parent(1), now),
//! ]);
//!
//! let hierarchy = RoleHierarchy::new();
//! hierarchy.recompute_levels(&mut arena, 2).unwrap();
//! assert_eq!(arena.get(2).unwrap().hierarchy_level, 1);
//!
//! // The owner cannot be moved under its own child
//! assert!(!hierarchy.can_become_parent(&arena, 1, 2).unwrap());
//! ```


use crate::error::{AuthzError, Result};
use crate::store::RoleArena;
use crate::types::RoleId;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Default bound on parent-chain length
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Display node of the role forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleNode {
    /// Role id
    pub id: RoleId,
    /// Machine-readable name
    pub name: String,
    /// Display name
    pub display_name: String,
    /// Derived level
    pub hierarchy_level: u32,
    /// Listing priority
    pub priority: u8,
    /// Deletion-protected
    pub is_system_role: bool,
    /// Child nodes, highest priority first
    pub children: Vec<RoleNode>,
}

impl RoleNode {
    /// Number of nodes in this subtree, including this one
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(RoleNode::size).sum::<usize>()
    }
}

/// Parent/child forest operations
#[derive(Debug, Clone)]
pub struct RoleHierarchy {
    max_depth: usize,
}

impl Default for RoleHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleHierarchy {
    /// Hierarchy with the default depth bound
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Hierarchy with a custom depth bound
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Configured depth bound
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Ancestors of a role, nearest first. A parent edge pointing at a
    /// missing role ends the chain.
    pub fn ancestors(&self, arena: &RoleArena, role: RoleId) -> Result<Vec<RoleId>> {
        let mut chain = Vec::new();
        let mut current = arena.get(role).and_then(|r| r.parent_role_id);

        while let Some(id) = current {
            let Some(parent) = arena.get(id) else {
                break;
            };
            if chain.len() >= self.max_depth {
                return Err(self.too_deep(role));
            }
            chain.push(id);
            current = parent.parent_role_id;
        }

        Ok(chain)
    }

    /// Descendants of a role in breadth-first order
    pub fn descendants(&self, arena: &RoleArena, role: RoleId) -> Result<Vec<RoleId>> {
        let mut order = Vec::new();
        let mut seen = HashSet::from([role]);
        let mut queue: VecDeque<(RoleId, usize)> = VecDeque::from([(role, 0)]);

        while let Some((current, depth)) = queue.pop_front() {
            for child in arena.children(current) {
                if !seen.insert(child) {
                    continue;
                }
                if depth + 1 > self.max_depth {
                    return Err(self.too_deep(role));
                }
                order.push(child);
                queue.push_back((child, depth + 1));
            }
        }

        Ok(order)
    }

    /// Whether `candidate` may become the parent of `role`: never itself,
    /// never one of its own descendants
    pub fn can_become_parent(
        &self,
        arena: &RoleArena,
        role: RoleId,
        candidate: RoleId,
    ) -> Result<bool> {
        if candidate == role {
            return Ok(false);
        }
        Ok(!self.ancestors(arena, candidate)?.contains(&role))
    }

    /// Validate a proposed parent edge
    pub fn validate_parent(
        &self,
        arena: &RoleArena,
        role: RoleId,
        candidate: Option<RoleId>,
    ) -> Result<()> {
        let Some(candidate) = candidate else {
            return Ok(());
        };

        if !arena.contains(candidate) {
            return Err(AuthzError::NotFound {
                kind: "parent role",
                id: candidate.to_string(),
            });
        }

        if !self.can_become_parent(arena, role, candidate)? {
            debug!("Rejected parent {} for role {}: cycle", candidate, role);
            return Err(AuthzError::CircularHierarchy { role, candidate });
        }

        Ok(())
    }

    /// Level a role would get under `parent`: 0 without one, including a
    /// parent missing from the arena
    pub fn level_under(&self, arena: &RoleArena, parent: Option<RoleId>) -> u32 {
        parent
            .and_then(|id| arena.get(id))
            .map_or(0, |p| p.hierarchy_level + 1)
    }

    /// Recompute the level of `role` from its parent, then of every
    /// descendant. Returns the ids whose level changed.
    pub fn recompute_levels(&self, arena: &mut RoleArena, role: RoleId) -> Result<Vec<RoleId>> {
        let Some(parent) = arena.get(role).map(|r| r.parent_role_id) else {
            return Err(AuthzError::role_not_found(role));
        };

        let level = self.level_under(arena, parent);
        self.check_level(role, level)?;

        let mut changed = Vec::new();
        if arena.set_level(role, level) {
            changed.push(role);
        }

        for id in self.descendants(arena, role)? {
            let parent = arena.get(id).and_then(|r| r.parent_role_id);
            let level = self.level_under(arena, parent);
            self.check_level(id, level)?;
            if arena.set_level(id, level) {
                changed.push(id);
            }
        }

        if !changed.is_empty() {
            debug!("Recomputed levels for {} roles under {}", changed.len(), role);
        }

        Ok(changed)
    }

    /// Roles eligible as a new parent: strictly shallower and not a cycle
    pub fn parent_candidates(&self, arena: &RoleArena, role: RoleId) -> Result<Vec<RoleId>> {
        let Some(level) = arena.get(role).map(|r| r.hierarchy_level) else {
            return Err(AuthzError::role_not_found(role));
        };

        let mut candidates = Vec::new();
        for candidate in arena.roles().filter(|c| c.hierarchy_level < level) {
            if self.can_become_parent(arena, role, candidate.id)? {
                candidates.push(candidate.id);
            }
        }
        Ok(candidates)
    }

    /// Assemble the display forest. Roots are roles without a parent or whose
    /// parent is missing; siblings are ordered by priority (highest first),
    /// then name.
    pub fn build_forest(&self, arena: &RoleArena) -> Vec<RoleNode> {
        let mut roots: Vec<RoleId> = arena
            .roles()
            .filter(|role| role.parent_role_id.map_or(true, |p| !arena.contains(p)))
            .map(|role| role.id)
            .collect();
        self.sort_siblings(arena, &mut roots);

        roots
            .into_iter()
            .filter_map(|id| self.build_node(arena, id, 0))
            .collect()
    }

    /// Check every structural invariant: finite acyclic chains and levels
    /// consistent with them
    pub fn verify(&self, arena: &RoleArena) -> Result<()> {
        for role in arena.roles() {
            let mut seen = HashSet::from([role.id]);
            for ancestor in self.ancestors(arena, role.id)? {
                if !seen.insert(ancestor) {
                    return Err(AuthzError::CircularHierarchy {
                        role: role.id,
                        candidate: ancestor,
                    });
                }
            }

            let expected = self.level_under(arena, role.parent_role_id);
            if role.hierarchy_level != expected {
                return Err(AuthzError::Validation(format!(
                    "role {} has level {}, expected {}",
                    role.id, role.hierarchy_level, expected
                )));
            }
        }
        Ok(())
    }

    fn build_node(&self, arena: &RoleArena, id: RoleId, depth: usize) -> Option<RoleNode> {
        let role = arena.get(id)?;

        let children = if depth >= self.max_depth {
            warn!("Forest truncated below role {}: depth bound reached", id);
            Vec::new()
        } else {
            let mut ids: Vec<RoleId> = arena.children(id).collect();
            self.sort_siblings(arena, &mut ids);
            ids.into_iter()
                .filter_map(|child| self.build_node(arena, child, depth + 1))
                .collect()
        };

        Some(RoleNode {
            id: role.id,
            name: role.name.clone(),
            display_name: role.display_name.clone(),
            hierarchy_level: role.hierarchy_level,
            priority: role.priority,
            is_system_role: role.is_system_role,
            children,
        })
    }

    fn sort_siblings(&self, arena: &RoleArena, ids: &mut [RoleId]) {
        ids.sort_by_key(|id| {
            arena
                .get(*id)
                .map(|role| (Reverse(role.priority), role.name.clone()))
        });
    }

    fn check_level(&self, role: RoleId, level: u32) -> Result<()> {
        if level as usize > self.max_depth {
            return Err(self.too_deep(role));
        }
        Ok(())
    }

    fn too_deep(&self, role: RoleId) -> AuthzError {
        AuthzError::HierarchyTooDeep {
            role,
            max_depth: self.max_depth,
        }
    }
}
