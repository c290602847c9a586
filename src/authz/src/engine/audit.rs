//! Audit logging for authorization decisions
//!
//! Every decision, including fail-closed denials and the error behind them, is
//! handed to an [`AuditSink`]. Sink failures are logged by the engine and never
//! change a decision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use super::decision::{Decision, DecisionReason};
use crate::error::Result;

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID
    pub id: String,

    /// Decision this entry records
    pub decision_id: String,

    /// Principal who made the request
    pub principal_id: Option<String>,

    /// Permission as requested
    pub permission: String,

    /// Fully-qualified key
    pub key: String,

    /// Decision result (allow/deny)
    pub allowed: bool,

    /// Decision reason
    pub reason: DecisionReason,

    /// Underlying infrastructure error, for fail-closed denials
    pub error: Option<String>,

    /// Request latency in microseconds
    pub latency_us: u64,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Build an entry from a decision
    pub fn from_decision(principal_id: Option<&str>, decision: &Decision, latency: Duration) -> Self {
        let error = match &decision.reason {
            DecisionReason::InfrastructureError { error } => Some(error.clone()),
            _ => None,
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            decision_id: decision.id.clone(),
            principal_id: principal_id.map(str::to_string),
            permission: decision.permission.clone(),
            key: decision.key.clone(),
            allowed: decision.allowed,
            reason: decision.reason.clone(),
            error,
            latency_us: latency.as_micros() as u64,
            timestamp: decision.timestamp,
        }
    }
}

/// Receives every authorization decision
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one decision
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// Aggregate counts over buffered entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Buffered entries
    pub total: usize,
    /// Allowed decisions
    pub allowed: usize,
    /// Denied decisions
    pub denied: usize,
    /// Fail-closed denials
    pub errors: usize,
}

/// Bounded in-memory audit buffer
pub struct InMemoryAuditSink {
    buffer: Arc<RwLock<VecDeque<AuditEntry>>>,
    capacity: usize,
}

impl InMemoryAuditSink {
    /// Create a sink keeping the last 10,000 entries
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Create a sink keeping the last `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(10_000)))),
            capacity: capacity.max(1),
        }
    }

    /// Buffered entries, oldest first
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.buffer.read().await.iter().cloned().collect()
    }

    /// Query audit logs by principal, newest first
    pub async fn query_by_principal(&self, principal_id: &str, limit: usize) -> Vec<AuditEntry> {
        self.buffer
            .read()
            .await
            .iter()
            .rev()
            .filter(|entry| entry.principal_id.as_deref() == Some(principal_id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Denials in the buffer, newest first
    pub async fn denials(&self, limit: usize) -> Vec<AuditEntry> {
        self.buffer
            .read()
            .await
            .iter()
            .rev()
            .filter(|entry| !entry.allowed)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Get audit statistics
    pub async fn stats(&self) -> AuditStats {
        let buffer = self.buffer.read().await;
        let allowed = buffer.iter().filter(|e| e.allowed).count();
        AuditStats {
            total: buffer.len(),
            allowed,
            denied: buffer.len() - allowed,
            errors: buffer.iter().filter(|e| e.error.is_some()).count(),
        }
    }

    /// Drop every buffered entry
    pub async fn clear(&self) {
        self.buffer.write().await.clear();
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry);
        Ok(())
    }
}

/// Sink emitting one structured `tracing` event per decision
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        info!(
            target: "authz::audit",
            decision_id = %entry.decision_id,
            principal = entry.principal_id.as_deref().unwrap_or("-"),
            permission = %entry.permission,
            key = %entry.key,
            allowed = entry.allowed,
            error = entry.error.as_deref().unwrap_or(""),
            latency_us = entry.latency_us,
            "authorization decision"
        );
        Ok(())
    }
}
