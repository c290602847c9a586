//! Role seed files
//!
//! Seeds describe roles by name, with parents referenced by name, so a file
//! can be written before any ids exist.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Result;
use crate::role::NewRole;
use crate::types::PrincipalId;

/// One role to seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSeed {
    /// Create fields; `parent_role_id` is ignored in favor of `parent`
    #[serde(flatten)]
    pub role: NewRole,

    /// Parent role name; must be seeded earlier or already exist
    #[serde(default)]
    pub parent: Option<String>,

    /// Principals assigned to the role
    #[serde(default)]
    pub users: BTreeSet<PrincipalId>,
}

impl RoleSeed {
    /// Seed a root role
    pub fn new(role: NewRole) -> Self {
        Self {
            role,
            parent: None,
            users: BTreeSet::new(),
        }
    }

    /// Place under a parent, by name
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Assign a principal
    pub fn with_user(mut self, principal: impl Into<PrincipalId>) -> Self {
        self.users.insert(principal.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    Wrapped { roles: Vec<RoleSeed> },
    Bare(Vec<RoleSeed>),
}

/// Parse seeds from JSON: either an array of roles or `{"roles": [...]}`
pub fn parse_seed(json: &str) -> Result<Vec<RoleSeed>> {
    let file: SeedFile = serde_json::from_str(json)?;
    Ok(match file {
        SeedFile::Wrapped { roles } | SeedFile::Bare(roles) => roles,
    })
}

/// Read seeds from a JSON file
pub fn read_seed_file(path: impl AsRef<Path>) -> Result<Vec<RoleSeed>> {
    let json = std::fs::read_to_string(path)?;
    parse_seed(&json)
}
