//! High-level audit pipeline
//!
//! The two narrow interfaces the surrounding backend calls: record an
//! operation result, and query/report on recorded operations. Wires the
//! store, rule engine, and notification bus together with the ordering
//! and error-isolation guarantees the components individually promise.

use crate::bus::{Notification, NotificationBus};
use crate::config::SecurityConfig;
use crate::error::Result;
use crate::redact::Redactor;
use crate::report::{Report, ReportFilter, ReportGenerator};
use crate::rules::SecurityRuleEngine;
use crate::store::AuditLogStore;
use crate::types::{AuditEntry, RecordId, SecurityEvent};
use chrono::Duration;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

const NOTIFICATION_MIRROR: &str = "notifications.jsonl";

/// The outcome of one completed operation, as reported by a collaborator
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub user: String,
    pub operation: String,
    pub resource: Option<String>,
    pub query: Option<String>,
    pub success: bool,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
}

impl OperationOutcome {
    pub fn new(user: impl Into<String>, operation: impl Into<String>, success: bool) -> Self {
        Self {
            user: user.into(),
            operation: operation.into(),
            resource: None,
            query: None,
            success,
            client_address: None,
            client_agent: None,
        }
    }

    /// Outcome with no caller-supplied identity
    pub fn anonymous(operation: impl Into<String>, success: bool) -> Self {
        Self::new("unknown", operation, success)
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_client_address(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }

    pub fn with_client_agent(mut self, agent: impl Into<String>) -> Self {
        self.client_agent = Some(agent.into());
        self
    }
}

/// Audit-and-security-monitoring core: append, evaluate, notify, report.
pub struct AuditPipeline {
    store: Arc<AuditLogStore>,
    bus: Arc<NotificationBus>,
    engine: RwLock<SecurityRuleEngine>,
    redactor: Redactor,
    reports: ReportGenerator,
}

impl AuditPipeline {
    /// Open the pipeline rooted at `dir`, with the audit log and the
    /// notification mirror stored alongside each other.
    pub async fn open(dir: impl AsRef<Path>, config: SecurityConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let store = Arc::new(AuditLogStore::open(dir).await?);
        let bus = Arc::new(NotificationBus::with_mirror(dir.join(NOTIFICATION_MIRROR)));
        Ok(Self {
            reports: ReportGenerator::new(store.clone()),
            store,
            bus,
            engine: RwLock::new(SecurityRuleEngine::new(config)),
            redactor: Redactor::default(),
        })
    }

    /// The underlying store (read paths and pruning policy live here)
    pub fn store(&self) -> &Arc<AuditLogStore> {
        &self.store
    }

    /// The notification bus, for subscribing alert consumers
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// Record one completed operation.
    ///
    /// The append happens first and its id is returned regardless of
    /// what downstream evaluation does. Rule evaluation and notification
    /// fan-out run after the append succeeds; their failures are logged
    /// and never surface to the caller. An append failure is surfaced to
    /// the direct caller only — the audited operation itself must not be
    /// rolled back because of it.
    pub async fn record_operation(&self, outcome: OperationOutcome) -> Result<RecordId> {
        let mut entry = AuditEntry::new(
            if outcome.user.is_empty() {
                "unknown".to_string()
            } else {
                outcome.user
            },
            outcome.operation,
            outcome.success,
        );
        entry.resource = outcome.resource;
        entry.query = outcome.query.map(|q| self.redactor.redact(&q));
        entry.client_address = outcome.client_address;
        entry.client_agent = outcome.client_agent;

        let id = self.store.record(entry.clone()).await.map_err(|e| {
            tracing::error!(error = %e, "Audit append failed; audited operation unaffected");
            e
        })?;

        let events = {
            let engine = self.engine.read().await;
            match engine.evaluate(&self.store, &entry).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(error = %e, "Rule evaluation failed after append");
                    Vec::new()
                }
            }
        };

        for event in events {
            tracing::warn!(
                kind = event.kind.as_str(),
                severity = event.severity.as_str(),
                "Security event: {}",
                event.message
            );
            if let Err(e) = self.store.record_event(event.clone()).await {
                tracing::warn!(error = %e, "Failed to persist security event");
            }
            self.bus
                .publish(Notification::from_security_event(&event))
                .await;
        }

        Ok(id)
    }

    /// Restricted-operation rule in pre-check mode: refuse the action
    /// with `RestrictedOperation` before it runs.
    pub async fn precheck_operation(
        &self,
        user: &str,
        operation: &str,
        query: Option<&str>,
    ) -> Result<()> {
        self.engine.read().await.precheck(user, operation, query)
    }

    /// Generate a statistical report (read-only).
    pub async fn report(&self, filter: &ReportFilter) -> Result<Report> {
        self.reports.generate(filter).await
    }

    /// On-demand suspicious-activity scan over the trailing window
    /// (read-only).
    pub async fn suspicious_activity(&self, window: Duration) -> Result<Vec<SecurityEvent>> {
        let engine = self.engine.read().await;
        engine.scan(&self.store, window).await
    }

    /// Drop records past the configured retention.
    pub async fn prune(&self) -> Result<u64> {
        let retention_days = self.engine.read().await.config().audit_retention_days;
        self.store.prune(retention_days).await
    }

    /// Explicitly reload configuration from a JSON file, rebuilding the
    /// engine's compiled rule tables. The only reload path — config is
    /// never re-read implicitly.
    pub async fn reload_config(&self, path: impl AsRef<Path>) {
        let config = SecurityConfig::load(path);
        *self.engine.write().await = SecurityRuleEngine::new(config);
        tracing::info!("Security config reloaded");
    }

    /// Replace the configuration directly (embedding callers that manage
    /// their own config source).
    pub async fn set_config(&self, config: SecurityConfig) {
        *self.engine.write().await = SecurityRuleEngine::new(config);
    }
}
