//! Core record types for the audit log
//!
//! All types use camelCase JSON serialization for wire compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a record appended to the audit log.
///
/// Monotonically increasing per store, seeded from the existing record
/// count when the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable record of one completed operation attempt
///
/// Once appended, an entry is never mutated or reordered relative to
/// other entries from the same writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// When the operation completed (UTC)
    pub timestamp: DateTime<Utc>,

    /// Caller-supplied identity, `"unknown"` when absent
    #[serde(default = "default_user")]
    pub user: String,

    /// Free-form operation tag (e.g. "CREATE_TABLE", "LOGIN")
    pub operation: String,

    /// Object name acted upon, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Sanitized statement text, passwords redacted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Whether the operation succeeded
    pub success: bool,

    /// Network address of the client, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,

    /// Client software identifier, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_agent: Option<String>,
}

fn default_user() -> String {
    "unknown".to_string()
}

impl AuditEntry {
    /// Create an entry stamped with the current time
    pub fn new(user: impl Into<String>, operation: impl Into<String>, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            user: user.into(),
            operation: operation.into(),
            resource: None,
            query: None,
            success,
            client_address: None,
            client_agent: None,
        }
    }

    /// Set the resource name
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Set the sanitized statement text
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the client address
    pub fn with_client_address(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }

    /// Set the client agent string
    pub fn with_client_agent(mut self, agent: impl Into<String>) -> Self {
        self.client_agent = Some(agent.into());
        self
    }

    /// Override the timestamp (backfill/import paths)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Severity of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Wire/display name, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed taxonomy of security event kinds
///
/// Severities per kind come from a default table overridable through
/// `SecurityConfig::severity_overrides`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Failed login-class attempts for one user exceeded the threshold
    MultipleFailedLogins,
    /// A flagged resource was touched, regardless of outcome
    SensitiveResourceAccess,
    /// Activity outside configured business hours
    UnusualTimeAccess,
    /// One user exceeded the operation-rate threshold
    HighFrequencyOperations,
    /// One client address exceeded the operation-rate threshold
    HighFrequencyActor,
    /// A restricted operation or statement token was observed
    RestrictedOperation,
}

impl SecurityEventKind {
    /// Wire/display name, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::MultipleFailedLogins => "multiple_failed_logins",
            SecurityEventKind::SensitiveResourceAccess => "sensitive_resource_access",
            SecurityEventKind::UnusualTimeAccess => "unusual_time_access",
            SecurityEventKind::HighFrequencyOperations => "high_frequency_operations",
            SecurityEventKind::HighFrequencyActor => "high_frequency_actor",
            SecurityEventKind::RestrictedOperation => "restricted_operation",
        }
    }
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What triggered a security event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Evidence {
    /// The single entry that tripped the rule
    Entry { entry: Box<AuditEntry> },
    /// Aggregate count over a window
    Count { count: u64 },
}

/// Derived record emitted when a rule's condition is met
///
/// Created by the rule engine, persisted in the same append log as
/// audit entries (tagged distinctly), never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    /// When the event was emitted (UTC)
    pub timestamp: DateTime<Utc>,

    /// Which rule fired
    pub kind: SecurityEventKind,

    /// User the event is about, if user-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_user: Option<String>,

    /// Client address the event is about, if address-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_address: Option<String>,

    /// Severity assigned from config
    pub severity: Severity,

    /// Human-readable description
    pub message: String,

    /// Triggering entry or aggregate count
    pub evidence: Evidence,
}

impl SecurityEvent {
    /// Create an event stamped with the current time
    pub fn new(
        kind: SecurityEventKind,
        severity: Severity,
        message: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            subject_user: None,
            subject_address: None,
            severity,
            message: message.into(),
            evidence,
        }
    }

    /// Scope the event to a user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.subject_user = Some(user.into());
        self
    }

    /// Scope the event to a client address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.subject_address = Some(address.into());
        self
    }
}

/// One line of the shared append-only log
///
/// Audit entries and security events share the same file, discriminated
/// by the `record` tag. Every line is self-contained so a truncated or
/// corrupted trailing line never invalidates prior lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "camelCase")]
pub enum LogRecord {
    Audit(AuditEntry),
    Security(SecurityEvent),
}

impl LogRecord {
    /// Timestamp of the wrapped record
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LogRecord::Audit(entry) => entry.timestamp,
            LogRecord::Security(event) => event.timestamp,
        }
    }
}
