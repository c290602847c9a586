//! Role records and their mutation payloads

use crate::error::{AuthzError, Result};
use crate::types::{Condition, PrincipalId, RoleAssignment, RoleId};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Machine-readable role names: lowercase snake case
static ROLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("role name pattern"));

/// Permission keys: dot-separated lowercase segments
static PERMISSION_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)*$").expect("permission key pattern")
});

/// Lowest allowed priority
pub const MIN_PRIORITY: u8 = 1;

/// Highest allowed priority
pub const MAX_PRIORITY: u8 = 100;

/// Role record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique role identifier
    pub id: RoleId,

    /// Unique machine-readable name (e.g., "production_manager")
    pub name: String,

    /// Name shown to people
    pub display_name: String,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Parent edge, owned by the hierarchy
    #[serde(default)]
    pub parent_role_id: Option<RoleId>,

    /// Depth in the hierarchy, derived from the parent chain
    pub hierarchy_level: u32,

    /// Listing tie-break, 1-100
    pub priority: u8,

    /// Direct permission grants
    #[serde(default)]
    pub permissions: BTreeSet<String>,

    /// Conditions attached to direct grants
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,

    /// Whether children inherit this role's effective permissions
    pub is_inheritable: bool,

    /// Deletion-protected
    pub is_system_role: bool,

    /// Assignments to this role stop contributing after this instant
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Back-references to assigned users
    #[serde(default)]
    pub users: BTreeSet<PrincipalId>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Build a role record from create fields. The level is provisional until
    /// the hierarchy recomputes it.
    pub fn from_new(id: RoleId, fields: NewRole, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: fields.name,
            display_name: fields.display_name,
            description: fields.description,
            parent_role_id: fields.parent_role_id,
            hierarchy_level: 0,
            priority: fields.priority,
            permissions: fields.permissions,
            conditions: fields.conditions,
            is_inheritable: fields.is_inheritable,
            is_system_role: fields.is_system_role,
            expires_at: fields.expires_at,
            users: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the role record has passed its expiry
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether an assignment to this role contributes permissions at `now`
    pub fn assignment_active(&self, assignment: &RoleAssignment, now: DateTime<Utc>) -> bool {
        assignment.role_id == self.id && assignment.is_active_at(now) && !self.is_expired_at(now)
    }

    /// Whether `permission` is granted directly
    pub fn grants_directly(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Condition attached to a direct grant
    pub fn condition_for(&self, permission: &str) -> Option<&Condition> {
        self.conditions.get(permission)
    }
}

/// Fields accepted when creating a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    /// Unique machine-readable name
    pub name: String,

    /// Name shown to people
    pub display_name: String,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Parent role
    #[serde(default)]
    pub parent_role_id: Option<RoleId>,

    /// Listing tie-break, 1-100
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Direct permission grants
    #[serde(default)]
    pub permissions: BTreeSet<String>,

    /// Conditions attached to direct grants
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,

    /// Whether children inherit this role's permissions
    #[serde(default = "default_inheritable")]
    pub is_inheritable: bool,

    /// Deletion-protected
    #[serde(default)]
    pub is_system_role: bool,

    /// Role expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u8 {
    50
}

fn default_inheritable() -> bool {
    true
}

impl NewRole {
    /// Create fields with defaults: root, inheritable, priority 50
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: None,
            parent_role_id: None,
            priority: default_priority(),
            permissions: BTreeSet::new(),
            conditions: BTreeMap::new(),
            is_inheritable: true,
            is_system_role: false,
            expires_at: None,
        }
    }

    /// Set the parent role
    pub fn with_parent(mut self, parent: RoleId) -> Self {
        self.parent_role_id = Some(parent);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Add direct grants
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Add a conditional direct grant
    pub fn with_condition(mut self, permission: impl Into<String>, condition: Condition) -> Self {
        let permission = permission.into();
        self.permissions.insert(permission.clone());
        self.conditions.insert(permission, condition);
        self
    }

    /// Set inheritability
    pub fn inheritable(mut self, is_inheritable: bool) -> Self {
        self.is_inheritable = is_inheritable;
        self
    }

    /// Mark as a system role
    pub fn system(mut self) -> Self {
        self.is_system_role = true;
        self
    }

    /// Set the role expiry
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Validate field formats
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_display_name(&self.display_name)?;
        validate_priority(self.priority)?;
        validate_grants(&self.permissions, &self.conditions)
    }
}

/// Fields accepted when updating a role; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUpdate {
    /// New name
    #[serde(default)]
    pub name: Option<String>,

    /// New display name
    #[serde(default)]
    pub display_name: Option<String>,

    /// New description (`Some(None)` clears it)
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    /// New parent (`Some(None)` makes the role a root)
    #[serde(default, deserialize_with = "double_option")]
    pub parent_role_id: Option<Option<RoleId>>,

    /// New priority
    #[serde(default)]
    pub priority: Option<u8>,

    /// Replacement set of direct grants
    #[serde(default)]
    pub permissions: Option<BTreeSet<String>>,

    /// Replacement conditions
    #[serde(default)]
    pub conditions: Option<BTreeMap<String, Condition>>,

    /// New inheritability
    #[serde(default)]
    pub is_inheritable: Option<bool>,

    /// New expiry (`Some(None)` clears it)
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

impl RoleUpdate {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Move under a new parent, or to the root with `None`
    pub fn parent(mut self, parent: Option<RoleId>) -> Self {
        self.parent_role_id = Some(parent);
        self
    }

    /// Rename
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Change the display name
    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Change the priority
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Replace direct grants
    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = Some(permissions.into_iter().map(Into::into).collect());
        self
    }

    /// Change inheritability
    pub fn inheritable(mut self, is_inheritable: bool) -> Self {
        self.is_inheritable = Some(is_inheritable);
        self
    }

    /// Validate the fields that are present
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(display_name) = &self.display_name {
            validate_display_name(display_name)?;
        }
        if let Some(priority) = self.priority {
            validate_priority(priority)?;
        }
        if let Some(permissions) = &self.permissions {
            for permission in permissions {
                validate_permission(permission)?;
            }
        }
        Ok(())
    }

    /// Apply non-structural fields to a role. The parent edge is left to the
    /// hierarchy.
    pub fn apply_fields(&self, role: &mut Role) {
        if let Some(name) = &self.name {
            role.name = name.clone();
        }
        if let Some(display_name) = &self.display_name {
            role.display_name = display_name.clone();
        }
        if let Some(description) = &self.description {
            role.description = description.clone();
        }
        if let Some(priority) = self.priority {
            role.priority = priority;
        }
        if let Some(permissions) = &self.permissions {
            role.permissions = permissions.clone();
            role.conditions.retain(|permission, _| permissions.contains(permission));
        }
        if let Some(conditions) = &self.conditions {
            role.conditions = conditions.clone();
        }
        if let Some(is_inheritable) = self.is_inheritable {
            role.is_inheritable = is_inheritable;
        }
        if let Some(expires_at) = self.expires_at {
            role.expires_at = expires_at;
        }
    }
}

/// Reads a present field (including `null`) as `Some`, so an absent field
/// stays `None` while `null` clears the value
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Validate a machine-readable role name
pub fn validate_name(name: &str) -> Result<()> {
    if ROLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(AuthzError::Validation(format!(
            "role name '{}' must be lowercase snake case, at most 64 characters",
            name
        )))
    }
}

fn validate_display_name(display_name: &str) -> Result<()> {
    let trimmed = display_name.trim();
    if trimmed.is_empty() || trimmed.len() > 255 {
        return Err(AuthzError::Validation(
            "display name must be 1-255 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_priority(priority: u8) -> Result<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(AuthzError::Validation(format!(
            "priority {} outside {}-{}",
            priority, MIN_PRIORITY, MAX_PRIORITY
        )));
    }
    Ok(())
}

/// Validate a permission key's format
pub fn validate_permission(permission: &str) -> Result<()> {
    if PERMISSION_KEY.is_match(permission) {
        Ok(())
    } else {
        Err(AuthzError::Validation(format!(
            "malformed permission key '{}'",
            permission
        )))
    }
}

pub(crate) fn validate_grants(
    permissions: &BTreeSet<String>,
    conditions: &BTreeMap<String, Condition>,
) -> Result<()> {
    for permission in permissions {
        validate_permission(permission)?;
    }
    for permission in conditions.keys() {
        if !permissions.contains(permission) {
            return Err(AuthzError::Validation(format!(
                "condition given for '{}' which is not granted",
                permission
            )));
        }
    }
    Ok(())
}
