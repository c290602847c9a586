//! Error types for the authorization core

use crate::types::RoleId;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Diagnostic payload carried by a permission denial.
///
/// Serializes to the body callers return with HTTP 403.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialBody {
    /// Human-readable message
    pub message: String,

    /// Fully-qualified permission key that was required
    pub required_permission: String,

    /// Every permission the principal effectively holds
    pub user_permissions: BTreeSet<String>,

    /// Principal's primary role name
    pub user_role: Option<String>,

    /// Principal's department
    pub user_department: Option<String>,
}

/// Authorization core errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed request fields
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Proposed parent would create a cycle in the role hierarchy
    #[error("Role {role} cannot take {candidate} as parent: circular hierarchy")]
    CircularHierarchy {
        /// Role being re-parented
        role: RoleId,
        /// Rejected parent
        candidate: RoleId,
    },

    /// A parent chain exceeded the configured depth bound
    #[error("Hierarchy traversal from role {role} exceeded max depth {max_depth}")]
    HierarchyTooDeep {
        /// Role the traversal started from
        role: RoleId,
        /// Configured bound
        max_depth: usize,
    },

    /// System roles are deletion-protected
    #[error("Role '{0}' is a system role and is protected")]
    SystemRoleProtected(String),

    /// Role still has users or child roles
    #[error("Role '{name}' is in use ({users} users, {children} child roles)")]
    RoleInUse {
        /// Role name
        name: String,
        /// Assigned user count
        users: usize,
        /// Child role count
        children: usize,
    },

    /// Entity not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind ("role", "parent role", ...)
        kind: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Normal deny outcome surfaced as an error for callers using `?`
    #[error("{}", .0.message)]
    PermissionDenied(Box<DenialBody>),

    /// No authenticated principal
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Persistence or resource-loader failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Optimistic version check failed on commit
    #[error("Concurrent modification: expected version {expected}, found {actual}")]
    Conflict {
        /// Version the batch was computed against
        expected: u64,
        /// Version currently persisted
        actual: u64,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Shorthand for a missing role
    pub fn role_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "role",
            id: id.to_string(),
        }
    }

    /// Whether the caller can correct the request and retry.
    ///
    /// Infrastructure failures are not recoverable by the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::StoreUnavailable(_) | Self::Io(_) | Self::Serialization(_)
        )
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
