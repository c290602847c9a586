//! Core authorization types

use crate::scope::{Resource, ResourceLoader};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Unique role identifier
pub type RoleId = u64;

/// Unique principal identifier, as issued by the identity provider
pub type PrincipalId = String;

/// A principal's assignment to one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Assigned role
    pub role_id: RoleId,

    /// Assignment stops contributing permissions after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    /// Create a non-expiring assignment
    pub fn new(role_id: RoleId) -> Self {
        Self {
            role_id,
            expires_at: None,
        }
    }

    /// Set the assignment expiry
    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the assignment still contributes at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Authenticated principal supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier
    pub id: PrincipalId,

    /// Department the principal works in
    #[serde(default)]
    pub department: Option<String>,

    /// Role assignments, possibly including expired ones
    #[serde(default)]
    pub assignments: Vec<RoleAssignment>,

    /// Inactive principals are treated as unauthenticated
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Principal {
    /// Create an active principal with no roles
    pub fn new(id: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            department: None,
            assignments: Vec::new(),
            is_active: true,
        }
    }

    /// Set the principal's department
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    /// Add a non-expiring role assignment
    pub fn with_role(self, role_id: RoleId) -> Self {
        self.with_assignment(RoleAssignment::new(role_id))
    }

    /// Add a role assignment
    pub fn with_assignment(mut self, assignment: RoleAssignment) -> Self {
        self.assignments.push(assignment);
        self
    }

    /// Mark the principal inactive
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Key/value constraint narrowing when a direct grant applies.
///
/// Holds when the resource reports every key with an equal value. An array
/// expected value matches when the reported value equals any element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition(pub BTreeMap<String, Value>);

impl Condition {
    /// Create an empty condition
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key/value constraint
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Whether there are no constraints
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluate against a resource. Without a resource a condition never holds.
    pub fn evaluate(&self, resource: Option<&dyn Resource>) -> bool {
        let Some(resource) = resource else {
            return false;
        };

        self.0.iter().all(|(key, expected)| {
            let Some(actual) = resource.attribute(key) else {
                return false;
            };
            match expected {
                Value::Array(options) => options.iter().any(|option| *option == actual),
                other => *other == actual,
            }
        })
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Condition {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Explicit per-request context passed into every check
#[derive(Clone)]
pub struct RequestContext {
    /// Authenticated principal, if any
    pub principal: Option<Principal>,

    /// Evaluation instant for assignment expiry
    pub now: DateTime<Utc>,

    /// Route parameters handed to the resource loader
    pub params: HashMap<String, String>,

    /// Loader for the concrete resource being authorized against
    pub resource_loader: Option<Arc<dyn ResourceLoader>>,
}

impl RequestContext {
    /// Context for an authenticated principal, evaluated now
    pub fn new(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            now: Utc::now(),
            params: HashMap::new(),
            resource_loader: None,
        }
    }

    /// Context with no principal
    pub fn anonymous() -> Self {
        Self {
            principal: None,
            now: Utc::now(),
            params: HashMap::new(),
            resource_loader: None,
        }
    }

    /// Evaluate at a fixed instant
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Add a route parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Attach a resource loader
    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.resource_loader = Some(loader);
        self
    }

    /// Attach an already-loaded resource
    pub fn with_resource(self, resource: Arc<dyn Resource>) -> Self {
        self.with_loader(Arc::new(crate::scope::StaticResource::new(resource)))
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("principal", &self.principal)
            .field("now", &self.now)
            .field("params", &self.params)
            .field("resource_loader", &self.resource_loader.is_some())
            .finish()
    }
}
