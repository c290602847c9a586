//! # Atelier Authorization Core
//!
//! Hierarchical, scoped role authorization for the Atelier workshop ERP.
//!
//! ## Features
//!
//! - **Role hierarchy** with permission inheritance and cycle-safe mutation
//! - **Scoped permissions** (`own`/`department`/`all`) resolved per request
//!   from the concrete resource being accessed
//! - **Conditional grants** narrowed by resource attributes
//! - **Fail-closed checks**: infrastructure errors always become denials
//! - **Versioned snapshots** so level cascades are never observed half-applied
//! - **Audit sinks and metrics** for every decision
//!
//! ## Example
//!
//! ```rust
//! use atelier_authz::scope::AttributeResource;
//! use atelier_authz::{
//!     AuthorizationEngine, EngineConfig, InMemoryRoleStore, NewRole, Principal,
//!     RequestContext, RoleManager,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AuthorizationEngine::new(
//!         Arc::new(InMemoryRoleStore::new()),
//!         EngineConfig::default(),
//!     );
//!     let roles = RoleManager::for_engine(&engine);
//!
//!     let worker = roles
//!         .create(NewRole::new("worker", "Worker").with_permissions(["orders.view.own"]))
//!         .await?;
//!
//!     let principal = Principal::new("u-17")
//!         .with_department("production")
//!         .with_role(worker.id);
//!     let order = AttributeResource::of_kind("order").with_attribute("user_id", "u-17");
//!     let ctx = RequestContext::new(principal).with_resource(Arc::new(order));
//!
//!     let decision = engine.check(&ctx, "orders.view").await?;
//!     assert!(decision.allowed);
//!     assert_eq!(decision.key, "orders.view.own");
//!
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod manager;
pub mod permissions;
pub mod response;
pub mod role;
pub mod scope;
pub mod seed;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use catalog::{default_roles, PermissionCatalog};
pub use engine::{AuthorizationEngine, Decision, DecisionReason, EngineConfig};
pub use error::{AuthzError, DenialBody, Result};
pub use hierarchy::{RoleHierarchy, RoleNode};
pub use manager::{RoleDetails, RoleListing, RoleManager};
pub use permissions::PermissionResolver;
pub use role::{NewRole, Role, RoleUpdate};
pub use scope::{PermissionKey, Resource, ResourceLoader, Scope, ScopeResolver};
pub use seed::RoleSeed;
pub use store::{InMemoryRoleStore, RoleStore};
pub use types::{Condition, Principal, PrincipalId, RequestContext, RoleAssignment, RoleId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
