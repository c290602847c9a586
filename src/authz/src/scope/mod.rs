//! Scope resolution module
//!
//! Resolves the breadth (`own`/`department`/`all`) of a permission check from
//! the principal and the concrete resource, and builds structured permission
//! keys with one canonical serialization.
//!
//! # Examples
//!
//! ```
//! use atelier_authz::scope::{AttributeResource, PermissionKey, Scope, ScopeResolver};
//! use atelier_authz::Principal;
//! use std::collections::BTreeSet;
//!
//! let resolver = ScopeResolver::new();
//! let principal = Principal::new("u-1").with_department("production");
//! let order = AttributeResource::of_kind("order").with_attribute("user_id", "u-1");
//!
//! let scope = resolver.determine_scope(&principal, &BTreeSet::new(), Some(&order));
//! assert_eq!(scope, Scope::Own);
//! assert_eq!(PermissionKey::parse("orders.view.own").unwrap().scope, Some(Scope::Own));
//! ```

mod types;
mod resolver;

#[cfg(test)]
mod tests;

pub use types::{
    AttributeResource, DepartmentSignal, FnLoader, OwnerSignal, PermissionKey, Resource,
    ResourceLoader, Scope, ScopeError, ScopeResult, StaticResource, DEPARTMENT_SIGNALS,
    OWNERSHIP_SIGNALS,
};
pub use resolver::{ScopeResolver, ScopeStats};
