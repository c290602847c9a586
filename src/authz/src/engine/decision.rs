//! Authorization decision types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{AuthzError, DenialBody, Result};

/// Authorization decision with diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision ID
    pub id: String,

    /// Whether the request is allowed
    pub allowed: bool,

    /// Permission as requested by the caller
    pub permission: String,

    /// Fully-qualified key the check resolved to
    pub key: String,

    /// Every permission the principal effectively holds
    pub effective: BTreeSet<String>,

    /// Principal's primary (highest-priority active) role
    pub role: Option<String>,

    /// Principal's department
    pub department: Option<String>,

    /// Role that granted the permission
    pub matched_role: Option<String>,

    /// Reason for the decision
    pub reason: DecisionReason,

    /// Decision timestamp
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    fn new(allowed: bool, permission: &str, key: String, reason: DecisionReason) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            allowed,
            permission: permission.to_string(),
            key,
            effective: BTreeSet::new(),
            role: None,
            department: None,
            matched_role: None,
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Create an allow decision
    pub fn allow(permission: &str, key: impl Into<String>, reason: DecisionReason) -> Self {
        let mut decision = Self::new(true, permission, key.into(), reason);
        decision.matched_role = match &decision.reason {
            DecisionReason::Granted { role } | DecisionReason::ConditionalGrant { role } => {
                Some(role.clone())
            }
            DecisionReason::AdminBypass { role } => Some(role.clone()),
            _ => None,
        };
        decision
    }

    /// Create a deny decision for a permission the principal does not hold
    pub fn deny(permission: &str, key: impl Into<String>) -> Self {
        Self::new(false, permission, key.into(), DecisionReason::MissingPermission)
    }

    /// Create a deny decision for a check that failed on infrastructure.
    ///
    /// Every fallible step (snapshot, role resolution, resource load) runs
    /// before scope resolution, so no scope is known here: `key` is the
    /// permission exactly as requested, and a denial body built from this
    /// decision reports it unscoped.
    pub fn fail_closed(permission: &str, error: &AuthzError) -> Self {
        Self::new(
            false,
            permission,
            permission.to_string(),
            DecisionReason::InfrastructureError {
                error: error.to_string(),
            },
        )
    }

    /// Attach diagnostics for denial rendering
    pub fn with_diagnostics(
        mut self,
        effective: BTreeSet<String>,
        role: Option<String>,
        department: Option<String>,
    ) -> Self {
        self.effective = effective;
        self.role = role;
        self.department = department;
        self
    }

    /// Whether the deny came from an infrastructure failure
    pub fn is_fail_closed(&self) -> bool {
        matches!(self.reason, DecisionReason::InfrastructureError { .. })
    }

    /// Body callers render with a 403
    pub fn denial_body(&self) -> DenialBody {
        DenialBody {
            message: format!("Permission denied: requires '{}'", self.key),
            required_permission: self.key.clone(),
            user_permissions: self.effective.clone(),
            user_role: self.role.clone(),
            user_department: self.department.clone(),
        }
    }

    /// Turn a denial into `AuthzError::PermissionDenied` for `?` propagation
    pub fn require(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(AuthzError::PermissionDenied(Box::new(self.denial_body())))
        }
    }
}

/// Reason for authorization decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DecisionReason {
    /// Principal holds the administrator role
    AdminBypass { role: String },

    /// Resolved key is in the principal's effective set
    Granted { role: String },

    /// Direct grant whose condition held against the resource
    ConditionalGrant { role: String },

    /// Principal lacks the resolved key
    MissingPermission,

    /// Error during evaluation, converted to a deny
    InfrastructureError { error: String },
}
