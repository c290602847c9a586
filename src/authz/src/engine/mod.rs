//! Authorization engine
//!
//! Single entry point for every permission check. Orchestrates effective
//! permission resolution, scope resolution and conditional grants, with the
//! administrator bypass, fail-closed error handling, audit logging and
//! metrics.

pub mod audit;
pub mod decision;
pub mod metrics;

pub use audit::{AuditEntry, AuditSink, AuditStats, InMemoryAuditSink, TracingAuditSink};
pub use decision::{Decision, DecisionReason};
pub use metrics::{EngineMetrics, MetricsCollector};

use crate::error::{AuthzError, Result};
use crate::hierarchy::{RoleHierarchy, DEFAULT_MAX_DEPTH};
use crate::permissions::{CacheStats, PermissionResolver, PrincipalPermissions};
use crate::role::Role;
use crate::scope::{ScopeResolver, ScopeStats};
use crate::store::RoleStore;
use crate::types::{Principal, RequestContext};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the administrator role
    pub admin_role: String,

    /// Allow administrators every check without scope or resource checks
    pub admin_bypass: bool,

    /// Bound on hierarchy traversals
    pub max_hierarchy_depth: usize,

    /// Cache effective permission sets per role
    pub enable_cache: bool,

    /// Bound on backing-store and resource-loader calls
    pub store_timeout: Option<Duration>,

    /// Optimistic commit attempts for role mutations
    pub max_commit_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            admin_role: "super_admin".to_string(),
            admin_bypass: true,
            max_hierarchy_depth: DEFAULT_MAX_DEPTH,
            enable_cache: true,
            store_timeout: None,
            max_commit_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment, falling back to defaults
    ///
    /// - `AUTHZ_ADMIN_ROLE`
    /// - `AUTHZ_ADMIN_BYPASS`
    /// - `AUTHZ_MAX_HIERARCHY_DEPTH`
    /// - `AUTHZ_ENABLE_CACHE`
    /// - `AUTHZ_STORE_TIMEOUT_MS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            admin_role: lookup("AUTHZ_ADMIN_ROLE")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.admin_role),
            admin_bypass: lookup("AUTHZ_ADMIN_BYPASS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.admin_bypass),
            max_hierarchy_depth: lookup("AUTHZ_MAX_HIERARCHY_DEPTH")
                .and_then(|s| s.parse().ok())
                .filter(|depth| *depth > 0)
                .unwrap_or(defaults.max_hierarchy_depth),
            enable_cache: lookup("AUTHZ_ENABLE_CACHE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.enable_cache),
            store_timeout: lookup("AUTHZ_STORE_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .or(defaults.store_timeout),
            max_commit_attempts: defaults.max_commit_attempts,
        }
    }
}

/// Main authorization engine
///
/// # Pipeline
///
/// ```text
/// RequestContext → RoleStore snapshot → active roles → admin bypass?
///                → ResourceLoader → ScopeResolver → PermissionKey
///                → effective set / conditional grant → Decision
///                                                   ↓         ↓
///                                              [Audit]   [Metrics]
/// ```
pub struct AuthorizationEngine {
    store: Arc<dyn RoleStore>,
    permissions: Arc<PermissionResolver>,
    scope_resolver: Arc<ScopeResolver>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    metrics: Arc<MetricsCollector>,
    config: EngineConfig,
}

impl AuthorizationEngine {
    /// Create an engine over a role store
    pub fn new(store: Arc<dyn RoleStore>, config: EngineConfig) -> Self {
        let hierarchy = RoleHierarchy::with_max_depth(config.max_hierarchy_depth);
        let permissions = Arc::new(PermissionResolver::with_cache(hierarchy, config.enable_cache));

        info!(
            "AuthorizationEngine initialized with admin_role={}, admin_bypass={}, cache={}",
            config.admin_role, config.admin_bypass, config.enable_cache
        );

        Self {
            store,
            permissions,
            scope_resolver: Arc::new(ScopeResolver::new()),
            audit_sink: None,
            metrics: Arc::new(MetricsCollector::new()),
            config,
        }
    }

    /// Send every decision to an audit sink
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Check one permission.
    ///
    /// Fails only with [`AuthzError::Unauthenticated`]. Any other failure while
    /// computing the decision becomes a denial reported to the audit sink.
    pub async fn check(&self, ctx: &RequestContext, permission: &str) -> Result<Decision> {
        let start = Instant::now();

        let principal = match ctx.principal.as_ref() {
            Some(principal) if principal.is_active => principal,
            _ => {
                debug!("Rejecting check for '{}': no active principal", permission);
                self.metrics.record_unauthenticated().await;
                return Err(AuthzError::Unauthenticated);
            }
        };

        debug!(
            "Authorization check: principal={}, permission={}",
            principal.id, permission
        );

        let decision = match self.evaluate(ctx, principal, permission).await {
            Ok(decision) => decision,
            Err(err) => {
                error!(
                    "Check of '{}' for {} failed, denying: {}",
                    permission, principal.id, err
                );
                self.metrics.record_fail_closed().await;
                Decision::fail_closed(permission, &err).with_diagnostics(
                    BTreeSet::new(),
                    None,
                    principal.department.clone(),
                )
            }
        };

        Ok(self.finalize(principal, decision, start).await)
    }

    /// Check one permission and turn a denial into
    /// [`AuthzError::PermissionDenied`]
    pub async fn require(&self, ctx: &RequestContext, permission: &str) -> Result<Decision> {
        self.check(ctx, permission).await?.require()
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        permission: &str,
    ) -> Result<Decision> {
        let snapshot = self.bounded("role store", self.store.snapshot()).await?;
        let resolved = self
            .permissions
            .principal_permissions(&snapshot, principal, ctx.now)?;
        let primary_role = resolved.primary_role().map(|role| role.name.clone());
        let department = principal.department.clone();

        if let Some(admin) = self.admin_role(&resolved) {
            warn!(
                "Administrator bypass: {} allowed '{}' via role '{}'",
                principal.id, permission, admin.name
            );
            self.metrics.record_admin_bypass().await;
            let reason = DecisionReason::AdminBypass {
                role: admin.name.clone(),
            };
            return Ok(Decision::allow(permission, permission, reason).with_diagnostics(
                resolved.effective,
                primary_role,
                department,
            ));
        }

        let loaded = match &ctx.resource_loader {
            Some(loader) => {
                self.bounded("resource loader", loader.load(&ctx.params))
                    .await?
            }
            None => None,
        };
        let resource = loaded.as_deref();

        let scope = self
            .scope_resolver
            .determine_scope(principal, &resolved.effective, resource);
        let key = self
            .scope_resolver
            .build_permission_key(permission, scope)
            .to_string();

        let decision = if let Some(role) = resolved.role_granting(&key) {
            let reason = DecisionReason::Granted {
                role: role.name.clone(),
            };
            Decision::allow(permission, key, reason)
        } else if let Some(role) = Self::conditional_grant(&resolved, permission, resource) {
            let reason = DecisionReason::ConditionalGrant {
                role: role.name.clone(),
            };
            Decision::allow(permission, key, reason)
        } else {
            Decision::deny(permission, key)
        };

        Ok(decision.with_diagnostics(resolved.effective, primary_role, department))
    }

    fn admin_role<'a>(&self, resolved: &'a PrincipalPermissions) -> Option<&'a Role> {
        if !self.config.admin_bypass {
            return None;
        }
        resolved
            .roles
            .iter()
            .find(|role| role.name == self.config.admin_role)
    }

    /// First active role granting `permission` directly with a condition that
    /// holds against the resource
    fn conditional_grant<'a>(
        resolved: &'a PrincipalPermissions,
        permission: &str,
        resource: Option<&dyn crate::scope::Resource>,
    ) -> Option<&'a Role> {
        resolved.roles.iter().find(|role| {
            role.grants_directly(permission)
                && role
                    .condition_for(permission)
                    .is_some_and(|condition| condition.evaluate(resource))
        })
    }

    async fn bounded<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.store_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                AuthzError::StoreUnavailable(format!("{} timed out after {:?}", what, limit))
            })?,
            None => call.await,
        }
    }

    async fn finalize(&self, principal: &Principal, decision: Decision, start: Instant) -> Decision {
        let latency = start.elapsed();

        self.metrics.record_latency(latency).await;
        self.metrics.record_decision(decision.allowed).await;

        debug!(
            "Decision: {} '{}' for {} ({:?})",
            if decision.allowed { "ALLOW" } else { "DENY" },
            decision.key,
            principal.id,
            latency
        );

        if let Some(sink) = &self.audit_sink {
            let entry = AuditEntry::from_decision(Some(&principal.id), &decision, latency);
            if let Err(e) = sink.record(entry).await {
                warn!("Audit sink failed for decision {}: {}", decision.id, e);
            }
        }

        decision
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared permission resolver, for role management against the same cache
    pub fn permission_resolver(&self) -> Arc<PermissionResolver> {
        Arc::clone(&self.permissions)
    }

    /// Underlying role store
    pub fn store(&self) -> Arc<dyn RoleStore> {
        Arc::clone(&self.store)
    }

    /// Drop cached effective permission sets
    pub fn invalidate_cache(&self) {
        self.permissions.clear_cache();
        info!("Effective permission cache invalidated");
    }

    /// Get engine metrics
    pub async fn metrics(&self) -> EngineMetrics {
        self.metrics
            .get_metrics()
            .await
            .with_cache_stats(&self.permissions.cache_stats())
    }

    /// Metrics in Prometheus text format
    pub async fn export_prometheus(&self) -> String {
        self.metrics
            .export_prometheus(&self.permissions.cache_stats())
            .await
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.permissions.cache_stats()
    }

    /// Get scope resolution statistics
    pub fn scope_stats(&self) -> ScopeStats {
        self.scope_resolver.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::NewRole;
    use crate::store::InMemoryRoleStore;
    use chrono::Utc;

    fn engine(config: EngineConfig) -> AuthorizationEngine {
        let now = Utc::now();
        let store = InMemoryRoleStore::with_roles([
            Role::from_new(1, NewRole::new("super_admin", "Administrator").system(), now),
            Role::from_new(
                2,
                NewRole::new("worker", "Worker").with_permissions(["orders.view.own"]),
                now,
            ),
        ]);
        AuthorizationEngine::new(Arc::new(store), config)
    }

    #[test]
    fn test_config_from_lookup() {
        let config = EngineConfig::from_lookup(|key| match key {
            "AUTHZ_ADMIN_ROLE" => Some("owner".to_string()),
            "AUTHZ_ADMIN_BYPASS" => Some("false".to_string()),
            "AUTHZ_MAX_HIERARCHY_DEPTH" => Some("not-a-number".to_string()),
            "AUTHZ_STORE_TIMEOUT_MS" => Some("250".to_string()),
            _ => None,
        });

        assert_eq!(config.admin_role, "owner");
        assert!(!config.admin_bypass);
        assert_eq!(config.max_hierarchy_depth, DEFAULT_MAX_DEPTH);
        assert!(config.enable_cache);
        assert_eq!(config.store_timeout, Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_admin_bypass() {
        let engine = engine(EngineConfig::default());
        let ctx = RequestContext::new(Principal::new("root").with_role(1));

        let decision = engine.check(&ctx, "hr.salaries.edit").await.unwrap();
        assert!(decision.allowed);
        assert!(matches!(decision.reason, DecisionReason::AdminBypass { .. }));
        assert_eq!(engine.metrics().await.admin_bypasses, 1);
    }

    #[tokio::test]
    async fn test_admin_bypass_disabled() {
        let config = EngineConfig {
            admin_bypass: false,
            ..Default::default()
        };
        let engine = engine(config);
        let ctx = RequestContext::new(Principal::new("root").with_role(1));

        let decision = engine.check(&ctx, "hr.salaries.edit").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::MissingPermission);
    }

    #[tokio::test]
    async fn test_unauthenticated() {
        let engine = engine(EngineConfig::default());

        assert!(matches!(
            engine.check(&RequestContext::anonymous(), "orders.view").await,
            Err(AuthzError::Unauthenticated)
        ));

        let inactive = RequestContext::new(Principal::new("gone").with_role(2).deactivated());
        assert!(matches!(
            engine.check(&inactive, "orders.view").await,
            Err(AuthzError::Unauthenticated)
        ));
        assert_eq!(engine.metrics().await.unauthenticated, 2);
    }

    #[tokio::test]
    async fn test_prometheus_reports_cache() {
        let engine = engine(EngineConfig::default());
        let ctx = RequestContext::new(Principal::new("u-1").with_role(2));

        engine.check(&ctx, "orders.view").await.unwrap();
        engine.check(&ctx, "orders.view").await.unwrap();

        let prometheus = engine.export_prometheus().await;
        assert!(prometheus.contains("authz_checks_total 2"));
        assert!(prometheus.contains("authz_cache_hits_total 1"));
        assert!(prometheus.contains("authz_cache_misses_total 1"));
        assert!(prometheus.contains("authz_cache_entries 1"));
    }

    #[tokio::test]
    async fn test_wildcard_scope_without_resource() {
        let engine = engine(EngineConfig::default());
        let ctx = RequestContext::new(Principal::new("u-1").with_role(2));

        let decision = engine.check(&ctx, "orders.view").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.key, "orders.view.own");
        assert_eq!(decision.matched_role.as_deref(), Some("worker"));
        assert_eq!(decision.role.as_deref(), Some("worker"));
    }
}
