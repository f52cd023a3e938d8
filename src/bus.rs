//! Typed publish/subscribe notification fan-out
//!
//! Decouples security-event producers from consumers. Dispatch is
//! synchronous and in registration order; each handler runs behind its
//! own fault boundary — a failing handler is logged and never prevents
//! the remaining handlers from running or propagates to the publisher.
//!
//! The bus owns an in-memory registry of published notifications
//! (process-lifetime state) plus an optional append-only JSONL mirror
//! used for post-hoc export/import.

use crate::error::Result;
use crate::types::SecurityEvent;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Reserved subscription type matching every notification
pub const WILDCARD: &str = "*";

/// Standard notification types
pub const DATABASE_ALERT: &str = "DATABASE_ALERT";
pub const SECURITY_ALERT: &str = "SECURITY_ALERT";
pub const PERFORMANCE_ALERT: &str = "PERFORMANCE_ALERT";
pub const SYSTEM_ALERT: &str = "SYSTEM_ALERT";

/// A notification delivered through the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique identifier (ntf-<uuid>)
    pub id: String,

    /// Category string (e.g. "SECURITY_ALERT")
    #[serde(rename = "type")]
    pub kind: String,

    /// Human-readable message
    pub message: String,

    /// Open attribute mapping; includes `category` and `severity` when
    /// derived from a security event
    #[serde(default)]
    pub details: HashMap<String, String>,

    /// When the notification was created (UTC)
    pub timestamp: DateTime<Utc>,

    /// Read flag — the only mutable field after creation
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// Create a notification with a fresh id and current timestamp
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: format!("ntf-{}", uuid::Uuid::new_v4()),
            kind: kind.into(),
            message: message.into(),
            details: HashMap::new(),
            timestamp: Utc::now(),
            read: false,
        }
    }

    /// Add a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Build a SECURITY_ALERT notification from a rule-engine event
    pub fn from_security_event(event: &SecurityEvent) -> Self {
        let mut notification = Self::new(SECURITY_ALERT, event.message.clone())
            .with_detail("category", event.kind.as_str())
            .with_detail("severity", event.severity.as_str());
        if let Some(user) = &event.subject_user {
            notification = notification.with_detail("user", user);
        }
        if let Some(address) = &event.subject_address {
            notification = notification.with_detail("address", address);
        }
        notification
    }

    /// Severity recorded in the details, if any
    pub fn severity(&self) -> Option<&str> {
        self.details.get("severity").map(String::as_str)
    }
}

/// Receives published notifications.
///
/// `id` is the handler's identity for unsubscription; handlers with the
/// same id are interchangeable for removal. Returning an error is the
/// per-handler fault boundary — the bus logs it and moves on.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Identity used for removal
    fn id(&self) -> &str;

    /// Handle one notification
    async fn handle(&self, notification: &Notification) -> Result<()>;
}

/// Filter for listing registry notifications
#[derive(Debug, Default, Clone)]
pub struct NotificationFilter {
    /// Only this notification type
    pub kind: Option<String>,
    /// Only unread notifications
    pub unread_only: bool,
    /// Maximum results (newest first)
    pub limit: Option<usize>,
}

/// In-memory publish/subscribe notification bus
pub struct NotificationBus {
    /// type → handlers in registration order
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn NotificationHandler>>>>,
    /// Published notifications, insertion order
    registry: RwLock<Vec<Notification>>,
    /// Optional append-only JSONL mirror
    mirror_path: Option<PathBuf>,
}

impl NotificationBus {
    /// Create a bus without a mirror log
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            registry: RwLock::new(Vec::new()),
            mirror_path: None,
        }
    }

    /// Create a bus that mirrors every published notification to a
    /// JSONL file. Mirror write failures are logged, never fatal.
    pub fn with_mirror(path: impl Into<PathBuf>) -> Self {
        Self {
            mirror_path: Some(path.into()),
            ..Self::new()
        }
    }

    /// Register a handler for a notification type (or `WILDCARD`).
    ///
    /// Registration order is dispatch order. Subscribing the same
    /// handler twice registers it twice — deduplication is the
    /// caller's responsibility.
    pub async fn subscribe(&self, kind: &str, handler: Arc<dyn NotificationHandler>) {
        let mut subs = self.subscribers.write().await;
        subs.entry(kind.to_string()).or_default().push(handler);
    }

    /// Remove every registration of `handler_id` under `kind`.
    /// Returns false when nothing was registered under that identity.
    pub async fn unsubscribe(&self, kind: &str, handler_id: &str) -> bool {
        let mut subs = self.subscribers.write().await;
        let Some(handlers) = subs.get_mut(kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| h.id() != handler_id);
        let removed = handlers.len() < before;
        if handlers.is_empty() {
            subs.remove(kind);
        }
        removed
    }

    /// Number of registrations for a type (wildcard not included)
    pub async fn subscriber_count(&self, kind: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Publish a notification.
    ///
    /// Records to the registry and the mirror, then invokes handlers for
    /// the notification's type followed by wildcard handlers, in
    /// registration order. Handler failures are caught and logged.
    pub async fn publish(&self, notification: Notification) {
        self.registry.write().await.push(notification.clone());
        self.mirror(&notification).await;

        let handlers: Vec<Arc<dyn NotificationHandler>> = {
            let subs = self.subscribers.read().await;
            subs.get(&notification.kind)
                .into_iter()
                .chain(subs.get(WILDCARD))
                .flatten()
                .cloned()
                .collect()
        };

        for handler in handlers {
            if let Err(e) = handler.handle(&notification).await {
                tracing::warn!(
                    handler = handler.id(),
                    notification = %notification.id,
                    error = %e,
                    "Notification handler failed"
                );
            }
        }
    }

    async fn mirror(&self, notification: &Notification) {
        let Some(path) = &self.mirror_path else {
            return;
        };
        let result: Result<()> = async {
            let mut line = serde_json::to_string(notification)?;
            line.push('\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Notification mirror write failed");
        }
    }

    /// List registry notifications, newest first.
    pub async fn list(&self, filter: &NotificationFilter) -> Vec<Notification> {
        let registry = self.registry.read().await;
        let mut matches: Vec<Notification> = registry
            .iter()
            .rev()
            .filter(|n| {
                filter.kind.as_ref().map_or(true, |k| n.kind == *k)
                    && (!filter.unread_only || !n.read)
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        matches
    }

    /// Mark one notification read. False when the id is unknown.
    pub async fn mark_read(&self, id: &str) -> bool {
        let mut registry = self.registry.write().await;
        match registry.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    /// Mark every notification read; returns how many changed.
    pub async fn mark_all_read(&self) -> usize {
        let mut registry = self.registry.write().await;
        let mut changed = 0;
        for n in registry.iter_mut().filter(|n| !n.read) {
            n.read = true;
            changed += 1;
        }
        changed
    }

    /// Delete one notification. False when the id is unknown.
    pub async fn delete(&self, id: &str) -> bool {
        let mut registry = self.registry.write().await;
        let before = registry.len();
        registry.retain(|n| n.id != id);
        registry.len() < before
    }

    /// Drop notifications older than `days`; returns how many were removed.
    pub async fn purge_older_than(&self, days: u32) -> usize {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let mut registry = self.registry.write().await;
        let before = registry.len();
        registry.retain(|n| n.timestamp >= cutoff);
        before - registry.len()
    }

    /// Export the registry as a JSON array.
    pub async fn export_json(&self) -> Result<String> {
        let registry = self.registry.read().await;
        Ok(serde_json::to_string_pretty(&*registry)?)
    }

    /// Export the registry as CSV with header
    /// `id,type,message,timestamp,read,category,severity`.
    pub async fn export_csv(&self) -> String {
        let registry = self.registry.read().await;
        let mut out = String::from("id,type,message,timestamp,read,category,severity\n");
        for n in registry.iter() {
            let row = [
                n.id.as_str(),
                n.kind.as_str(),
                n.message.as_str(),
                &n.timestamp.to_rfc3339(),
                if n.read { "true" } else { "false" },
                n.details.get("category").map_or("", String::as_str),
                n.details.get("severity").map_or("", String::as_str),
            ]
            .iter()
            .map(|field| csv_field(field))
            .collect::<Vec<_>>()
            .join(",");
            out.push_str(&row);
            out.push('\n');
        }
        out
    }

    /// Import notifications from a JSON array, assigning fresh ids so
    /// imports never collide with existing entries. Returns the count.
    pub async fn import_json(&self, json: &str) -> Result<usize> {
        let imported: Vec<Notification> = serde_json::from_str(json)?;
        let count = imported.len();
        let mut registry = self.registry.write().await;
        for mut n in imported {
            n.id = format!("ntf-{}", uuid::Uuid::new_v4());
            registry.push(n);
        }
        Ok(count)
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
