//! # Role seed inspector
//!
//! Loads roles from a JSON seed file (or the built-in default roles), prints
//! the role listing with its hierarchy and effective permissions, and can run
//! a single authorization check against the result.
//!
//! ## Usage
//!
//! ```text
//! authz-roles [SEED.json] [--check ROLE PERMISSION] [--principal ID]
//!             [--department DEPT] [--attr KEY=VALUE]...
//! authz-roles --help
//! ```
//!
//! ## Configuration
//!
//! Environment variables:
//! - `RUST_LOG` - Log level (default: info)
//! - `AUTHZ_SEED` - Seed file, when none is given on the command line
//! - `AUTHZ_ADMIN_ROLE`, `AUTHZ_ADMIN_BYPASS`, `AUTHZ_MAX_HIERARCHY_DEPTH`,
//!   `AUTHZ_ENABLE_CACHE`, `AUTHZ_STORE_TIMEOUT_MS` - engine configuration

use anyhow::{bail, Context};
use atelier_authz::engine::TracingAuditSink;
use atelier_authz::scope::AttributeResource;
use atelier_authz::seed::read_seed_file;
use atelier_authz::{
    default_roles, AuthorizationEngine, EngineConfig, InMemoryRoleStore, Principal,
    RequestContext, RoleManager,
};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Atelier role inspector
#[derive(Debug, Parser)]
#[command(name = "authz-roles")]
#[command(about = "Inspect seeded roles and run an authorization check")]
#[command(version)]
struct Args {
    /// JSON seed file (default roles when omitted)
    #[arg(env = "AUTHZ_SEED")]
    seed: Option<PathBuf>,

    /// Check PERMISSION for a principal holding ROLE
    #[arg(long, num_args = 2, value_names = ["ROLE", "PERMISSION"])]
    check: Option<Vec<String>>,

    /// Principal id used for the check
    #[arg(long, requires = "check")]
    principal: Option<String>,

    /// Principal department used for the check
    #[arg(long, requires = "check")]
    department: Option<String>,

    /// Resource attribute for the check (repeatable)
    #[arg(long = "attr", value_name = "KEY=VALUE", value_parser = parse_attribute, requires = "check")]
    attributes: Vec<(String, String)>,
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("malformed attribute '{}', expected KEY=VALUE", raw)),
    }
}

/// Role with its effective permissions, as printed
#[derive(Debug, Serialize)]
struct RoleReport {
    name: String,
    hierarchy_level: u32,
    effective_permissions: BTreeSet<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Atelier role inspector v{}", atelier_authz::VERSION);

    let args = Args::parse();
    let config = EngineConfig::from_env();

    let engine = AuthorizationEngine::new(Arc::new(InMemoryRoleStore::new()), config)
        .with_audit_sink(Arc::new(TracingAuditSink));
    let manager = RoleManager::for_engine(&engine);

    let seeds = match &args.seed {
        Some(path) => {
            read_seed_file(path).with_context(|| format!("reading seed file {}", path.display()))?
        }
        None => {
            info!("No seed file given, using default roles");
            default_roles()
        }
    };
    manager.apply_seed(seeds).await.context("applying seed")?;

    let listing = manager.list().await?;
    let mut reports = Vec::with_capacity(listing.roles.len());
    for role in &listing.roles {
        reports.push(RoleReport {
            name: role.name.clone(),
            hierarchy_level: role.hierarchy_level,
            effective_permissions: (*manager.effective_permissions(role.id).await?).clone(),
        });
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "roles": reports,
            "hierarchical_tree": listing.hierarchical_tree,
        }))?
    );

    let Some([role_name, permission]) = args.check.as_deref() else {
        return Ok(());
    };

    let role = listing
        .roles
        .iter()
        .find(|role| &role.name == role_name)
        .with_context(|| format!("no role named '{}'", role_name))?;

    let mut principal = Principal::new(args.principal.unwrap_or_else(|| "cli".to_string()))
        .with_role(role.id);
    principal.department = args.department;

    let mut ctx = RequestContext::new(principal);
    if !args.attributes.is_empty() {
        let resource = args
            .attributes
            .into_iter()
            .fold(AttributeResource::new(), |resource, (key, value)| {
                resource.with_attribute(key, value)
            });
        ctx = ctx.with_resource(Arc::new(resource));
    }

    let decision = engine.check(&ctx, permission).await?;
    println!("{}", serde_json::to_string_pretty(&decision)?);

    if !decision.allowed {
        bail!("denied: requires '{}'", decision.key);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("authz-roles").chain(raw.iter().copied()))
    }

    #[test]
    fn test_parse_check() {
        let parsed = args(&[
            "seed.json",
            "--check",
            "worker",
            "orders.view",
            "--attr",
            "user_id=u-1",
            "--department",
            "production",
        ])
        .unwrap();

        assert_eq!(parsed.seed, Some(PathBuf::from("seed.json")));
        assert_eq!(
            parsed.check.as_deref(),
            Some(&["worker".to_string(), "orders.view".to_string()][..])
        );
        assert_eq!(parsed.attributes, vec![("user_id".to_string(), "u-1".to_string())]);
        assert_eq!(parsed.department.as_deref(), Some("production"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(args(&["--check", "worker"]).is_err());
        assert!(args(&["--check", "worker", "orders.view", "--attr", "novalue"]).is_err());
        assert!(args(&["a.json", "b.json"]).is_err());
        assert!(args(&["--verbose"]).is_err());
        // Check-only options need --check
        assert!(args(&["--principal", "u-1"]).is_err());
    }

    #[test]
    fn test_command_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
