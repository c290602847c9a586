//! Static registry of permission keys for the workshop ERP modules

use serde::Serialize;
use std::collections::BTreeMap;

use crate::role::NewRole;
use crate::scope::{PermissionKey, Scope};
use crate::seed::RoleSeed;

/// `(action, label, scoped)`; scoped actions are registered once per scope
const WORKSHOP_PERMISSIONS: &[(&str, &str, bool)] = &[
    ("orders.view", "View orders", true),
    ("orders.create", "Create orders", false),
    ("orders.edit", "Edit orders", true),
    ("orders.delete", "Delete orders", true),
    ("production.view", "View production batches", true),
    ("production.manage", "Plan and update production", true),
    ("production.assign", "Assign workers to production", false),
    ("pos.sell", "Sell at the point of sale", false),
    ("pos.refund", "Issue refunds", true),
    ("pos.close_register", "Close the cash register", false),
    ("loyalty.view", "View loyalty balances", false),
    ("loyalty.adjust", "Adjust loyalty points", false),
    ("inventory.view", "View inventory", true),
    ("inventory.adjust", "Adjust stock levels", true),
    ("clients.view", "View clients", true),
    ("clients.edit", "Edit clients", true),
    ("workers.view", "View workers", true),
    ("workers.edit", "Edit workers", true),
    ("hr.view", "View HR records", true),
    ("hr.salaries", "Manage salaries", false),
    ("reports.view", "View reports", true),
    ("reports.export", "Export reports", false),
    ("roles.view", "View roles", false),
    ("roles.manage", "Manage roles and permissions", false),
];

/// One registered permission key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionEntry {
    /// Full key, scope included
    pub key: String,

    /// Leading module segment
    pub module: String,

    /// Label shown to people
    pub label: String,

    /// Scope suffix, if any
    pub scope: Option<Scope>,
}

/// Read-only registry of valid permission keys grouped by module
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct PermissionCatalog {
    modules: BTreeMap<String, Vec<PermissionEntry>>,
}

impl PermissionCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog for the workshop ERP modules
    pub fn workshop() -> Self {
        let mut catalog = Self::new();
        for (action, label, scoped) in WORKSHOP_PERMISSIONS {
            catalog.register(action, label, *scoped);
        }
        catalog
    }

    /// Register an action, with one key per scope if `scoped`
    pub fn register(&mut self, action: &str, label: &str, scoped: bool) -> &mut Self {
        let keys: Vec<PermissionKey> = if scoped {
            Scope::ALL
                .iter()
                .map(|scope| PermissionKey::scoped(action, *scope))
                .collect()
        } else {
            vec![PermissionKey::unscoped(action)]
        };

        for key in keys {
            let label = match key.scope {
                Some(scope) => format!("{} ({})", label, scope),
                None => label.to_string(),
            };
            let entry = PermissionEntry {
                key: key.to_string(),
                module: key.module().to_string(),
                label,
                scope: key.scope,
            };
            let entries = self.modules.entry(entry.module.clone()).or_default();
            if !entries.iter().any(|e| e.key == entry.key) {
                entries.push(entry);
            }
        }
        self
    }

    /// Entries grouped by module
    pub fn grouped(&self) -> &BTreeMap<String, Vec<PermissionEntry>> {
        &self.modules
    }

    /// Module names
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Every registered key
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.modules
            .values()
            .flatten()
            .map(|entry| entry.key.as_str())
    }

    /// Whether a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.keys().any(|k| k == key)
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.modules.values().map(Vec::len).sum()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Seeded system roles: `worker` at the root, `manager` inheriting from it,
/// and the administrator role
pub fn default_roles() -> Vec<RoleSeed> {
    vec![
        RoleSeed::new(
            NewRole::new("super_admin", "Administrator")
                .with_description("Unrestricted access")
                .with_priority(100)
                .with_permissions(["roles.view", "roles.manage"])
                .system(),
        ),
        RoleSeed::new(
            NewRole::new("worker", "Workshop worker")
                .with_priority(30)
                .with_permissions([
                    "orders.view.own",
                    "orders.edit.own",
                    "production.view.department",
                    "inventory.view.all",
                    "pos.sell",
                ])
                .system(),
        ),
        RoleSeed::new(
            NewRole::new("manager", "Workshop manager")
                .with_priority(80)
                .with_permissions([
                    "orders.view.all",
                    "orders.create",
                    "orders.edit.department",
                    "production.manage.department",
                    "production.assign",
                    "pos.refund.department",
                    "clients.view.all",
                    "workers.view.department",
                    "reports.view.department",
                    "roles.view",
                ])
                .system(),
        )
        .with_parent("worker"),
    ]
}
