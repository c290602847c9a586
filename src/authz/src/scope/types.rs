//! Scope, permission key and resource capability definitions
//!
//! Provides the `Scope` breadth qualifier, the structured `PermissionKey`
//! with its canonical serialization, and the explicit capability traits a
//! resource implements to report ownership and department.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Result;
use crate::types::PrincipalId;

/// Result type for scope parsing
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

/// Errors that can occur while parsing scopes and keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// Empty string provided
    Empty,
    /// Unknown scope name
    UnknownScope(String),
    /// Key has a scope suffix but no action
    MissingAction(String),
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Permission key cannot be empty"),
            Self::UnknownScope(s) => write!(f, "Unknown scope: {}", s),
            Self::MissingAction(s) => write!(f, "Permission key has no action: {}", s),
        }
    }
}

impl std::error::Error for ScopeError {}

/// Breadth of a permission check.
///
/// Ordered from narrowest to broadest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Resources the principal owns
    Own,
    /// Resources in the principal's department
    Department,
    /// Any resource
    All,
}

impl Scope {
    /// Every scope, narrowest first
    pub const ALL: [Scope; 3] = [Scope::Own, Scope::Department, Scope::All];

    /// Canonical suffix string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Own => "own",
            Self::Department => "department",
            Self::All => "all",
        }
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> ScopeResult<Self> {
        match s {
            "own" => Ok(Self::Own),
            "department" => Ok(Self::Department),
            "all" => Ok(Self::All),
            "" => Err(ScopeError::Empty),
            other => Err(ScopeError::UnknownScope(other.to_string())),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured permission key: an action plus an optional explicit scope.
///
/// `orders.view` parses to `{action: "orders.view", scope: None}` and
/// `orders.view.own` to `{action: "orders.view", scope: Some(Own)}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionKey {
    /// Action, optionally prefixed by a module segment (`orders.view`)
    pub action: String,

    /// Explicit scope suffix
    pub scope: Option<Scope>,
}

impl PermissionKey {
    /// Parse a raw permission string, splitting off a trailing scope segment
    pub fn parse(raw: &str) -> ScopeResult<Self> {
        if raw.is_empty() {
            return Err(ScopeError::Empty);
        }

        match raw.rsplit_once('.') {
            Some((action, tail)) => match tail.parse::<Scope>() {
                Ok(_) if action.is_empty() => Err(ScopeError::MissingAction(raw.to_string())),
                Ok(scope) => Ok(Self::scoped(action, scope)),
                Err(_) => Ok(Self::unscoped(raw)),
            },
            None => match raw.parse::<Scope>() {
                Ok(_) => Err(ScopeError::MissingAction(raw.to_string())),
                Err(_) => Ok(Self::unscoped(raw)),
            },
        }
    }

    /// Key with an explicit scope
    pub fn scoped(action: impl Into<String>, scope: Scope) -> Self {
        Self {
            action: action.into(),
            scope: Some(scope),
        }
    }

    /// Key without a scope
    pub fn unscoped(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            scope: None,
        }
    }

    /// Leading module segment (`orders` for `orders.view.own`)
    pub fn module(&self) -> &str {
        self.action
            .split_once('.')
            .map_or(self.action.as_str(), |(module, _)| module)
    }

    /// Whether the key carries an explicit scope
    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Some(scope) => write!(f, "{}.{}", self.action, scope),
            None => f.write_str(&self.action),
        }
    }
}

impl FromStr for PermissionKey {
    type Err = ScopeError;

    fn from_str(s: &str) -> ScopeResult<Self> {
        Self::parse(s)
    }
}

/// Signals a resource may report as its owner, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerSignal {
    /// Explicit owner
    Owner,
    /// Record creator
    CreatedBy,
    /// Assignee
    AssignedTo,
    /// Worker the record belongs to
    Worker,
}

impl OwnerSignal {
    /// Attribute key `AttributeResource` reads for this signal
    pub fn attribute_key(&self) -> &'static str {
        match self {
            Self::Owner => "user_id",
            Self::CreatedBy => "created_by",
            Self::AssignedTo => "assigned_to",
            Self::Worker => "worker_id",
        }
    }
}

/// Ownership signals in priority order; the first one reported wins
pub const OWNERSHIP_SIGNALS: [OwnerSignal; 4] = [
    OwnerSignal::Owner,
    OwnerSignal::CreatedBy,
    OwnerSignal::AssignedTo,
    OwnerSignal::Worker,
];

/// Signals a resource may report as its department, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepartmentSignal {
    /// Department recorded on the resource itself
    Department,
    /// Department of the resource's owner
    OwnerDepartment,
}

impl DepartmentSignal {
    /// Attribute key `AttributeResource` reads for this signal
    pub fn attribute_key(&self) -> &'static str {
        match self {
            Self::Department => "department",
            Self::OwnerDepartment => "owner_department",
        }
    }
}

/// Department signals in priority order; the first one reported wins
pub const DEPARTMENT_SIGNALS: [DepartmentSignal; 2] =
    [DepartmentSignal::Department, DepartmentSignal::OwnerDepartment];

/// Capability interface of a concrete resource (order, worker, inventory item, client)
pub trait Resource: Send + Sync {
    /// Owner reported for one signal
    fn owner(&self, _signal: OwnerSignal) -> Option<PrincipalId> {
        None
    }

    /// Department reported for one signal
    fn department(&self, _signal: DepartmentSignal) -> Option<String> {
        None
    }

    /// Attribute used to evaluate grant conditions
    fn attribute(&self, _key: &str) -> Option<Value> {
        None
    }

    /// Owner id from the first ownership signal the resource reports
    fn owner_id(&self) -> Option<PrincipalId> {
        OWNERSHIP_SIGNALS
            .iter()
            .find_map(|signal| self.owner(*signal))
    }

    /// Department from the first department signal the resource reports
    fn owning_department(&self) -> Option<String> {
        DEPARTMENT_SIGNALS
            .iter()
            .find_map(|signal| self.department(*signal))
    }
}

/// Resource backed by a plain attribute map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeResource {
    /// Resource kind (order, worker, ...)
    #[serde(default)]
    pub kind: Option<String>,

    /// Attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl AttributeResource {
    /// Create an empty resource
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty resource of a kind
    pub fn of_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn string_attribute(&self, key: &str) -> Option<String> {
        match self.attributes.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl Resource for AttributeResource {
    fn owner(&self, signal: OwnerSignal) -> Option<PrincipalId> {
        self.string_attribute(signal.attribute_key())
    }

    fn department(&self, signal: DepartmentSignal) -> Option<String> {
        self.string_attribute(signal.attribute_key())
    }

    fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.get(key).cloned()
    }
}

/// Fetches the concrete resource a request targets
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Load the resource for the given route parameters; `None` when the
    /// request has no concrete target
    async fn load(&self, params: &HashMap<String, String>) -> Result<Option<Arc<dyn Resource>>>;
}

/// Loader that always yields one pre-loaded resource
pub struct StaticResource {
    resource: Arc<dyn Resource>,
}

impl StaticResource {
    /// Wrap a loaded resource
    pub fn new(resource: Arc<dyn Resource>) -> Self {
        Self { resource }
    }
}

#[async_trait]
impl ResourceLoader for StaticResource {
    async fn load(&self, _params: &HashMap<String, String>) -> Result<Option<Arc<dyn Resource>>> {
        Ok(Some(Arc::clone(&self.resource)))
    }
}

/// Loader backed by a synchronous closure
pub struct FnLoader<F>(pub F);

#[async_trait]
impl<F> ResourceLoader for FnLoader<F>
where
    F: Fn(&HashMap<String, String>) -> Result<Option<Arc<dyn Resource>>> + Send + Sync,
{
    async fn load(&self, params: &HashMap<String, String>) -> Result<Option<Arc<dyn Resource>>> {
        (self.0)(params)
    }
}
