//! Security monitoring configuration
//!
//! `SecurityConfig` is loaded once at startup from a JSON file; a missing
//! or unparseable file falls back to the documented defaults with a
//! warning and never blocks startup. Reload is an explicit operation
//! (`AuditPipeline::reload_config`), never implicit.

use crate::types::{SecurityEventKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Tunable thresholds and rule tables for the security rule engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Resource names flagged for mandatory access logging (case-insensitive)
    pub sensitive_resources: Vec<String>,

    /// Maximum tolerated failed login-class attempts per user within the
    /// window; the attempt pushing the count past this triggers an event
    pub max_failed_attempts: u32,

    /// Window for counting failed login-class attempts (seconds)
    pub failed_attempt_window_secs: u64,

    /// Maximum tolerated operations per user (or address, in batch scans)
    /// within the high-frequency window
    pub high_frequency_threshold: u32,

    /// Window for high-frequency counting (seconds)
    pub high_frequency_window_secs: u64,

    /// Records older than this are dropped by `prune`
    pub audit_retention_days: u32,

    /// Operation tags treated as login-class (case-insensitive)
    pub login_operations: Vec<String>,

    /// Operation tags exempt from the restricted-operation rule
    pub allowed_operations: Vec<String>,

    /// Operation tags / statement tokens refused in pre-check mode and
    /// flagged in post-hoc evaluation (case-insensitive)
    pub restricted_operations: Vec<String>,

    /// Start of business hours, local hour of day (inclusive)
    pub business_hours_start: u32,

    /// End of business hours, local hour of day (exclusive)
    pub business_hours_end: u32,

    /// Per-kind severity overrides, keyed by the kind's wire name
    /// (e.g. `"unusual_time_access": "medium"`)
    pub severity_overrides: HashMap<String, Severity>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            sensitive_resources: Vec::new(),
            max_failed_attempts: 5,
            failed_attempt_window_secs: 300,
            high_frequency_threshold: 50,
            high_frequency_window_secs: 600,
            audit_retention_days: 90,
            login_operations: vec!["LOGIN".to_string()],
            allowed_operations: Vec::new(),
            restricted_operations: vec![
                "DROP_DATABASE".to_string(),
                "DROP_USER".to_string(),
                "TRUNCATE".to_string(),
                "GRANT_ALL".to_string(),
                "SHUTDOWN".to_string(),
            ],
            business_hours_start: 6,
            business_hours_end: 22,
            severity_overrides: HashMap::new(),
        }
    }
}

impl SecurityConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file or parse failure logs a warning and returns the
    /// defaults — configuration problems never block startup.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Security config not readable, using defaults"
                );
                return Self::default();
            }
        };
        match Self::from_json(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Security config loaded");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Security config invalid, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse configuration from a JSON string.
    ///
    /// Missing fields take their defaults; zero-width windows and
    /// thresholds are normalized back to defaults with a warning.
    pub fn from_json(content: &str) -> crate::error::Result<Self> {
        let config: SecurityConfig = serde_json::from_str(content)
            .map_err(|e| crate::error::AuditError::Config(format!("invalid config: {}", e)))?;
        Ok(config.normalized())
    }

    /// Replace obviously-broken values with the documented defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.failed_attempt_window_secs == 0 {
            tracing::warn!("failedAttemptWindowSecs is 0, falling back to default");
            self.failed_attempt_window_secs = defaults.failed_attempt_window_secs;
        }
        if self.high_frequency_window_secs == 0 {
            tracing::warn!("highFrequencyWindowSecs is 0, falling back to default");
            self.high_frequency_window_secs = defaults.high_frequency_window_secs;
        }
        if self.high_frequency_threshold == 0 {
            tracing::warn!("highFrequencyThreshold is 0, falling back to default");
            self.high_frequency_threshold = defaults.high_frequency_threshold;
        }
        if self.business_hours_start >= 24 || self.business_hours_end > 24 {
            tracing::warn!("business hours out of range, falling back to defaults");
            self.business_hours_start = defaults.business_hours_start;
            self.business_hours_end = defaults.business_hours_end;
        }
        self
    }

    /// Severity for an event kind: the configured override if present,
    /// otherwise the fixed default table.
    pub fn severity_for(&self, kind: SecurityEventKind) -> Severity {
        self.severity_overrides
            .get(kind.as_str())
            .copied()
            .unwrap_or_else(|| default_severity(kind))
    }
}

/// Default severity per event kind
pub fn default_severity(kind: SecurityEventKind) -> Severity {
    match kind {
        SecurityEventKind::MultipleFailedLogins => Severity::High,
        SecurityEventKind::SensitiveResourceAccess => Severity::High,
        SecurityEventKind::UnusualTimeAccess => Severity::Low,
        SecurityEventKind::HighFrequencyOperations => Severity::Medium,
        SecurityEventKind::HighFrequencyActor => Severity::Medium,
        SecurityEventKind::RestrictedOperation => Severity::High,
    }
}
