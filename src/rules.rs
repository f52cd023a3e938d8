//! Security rule evaluation
//!
//! Stateless heuristics over the audit log. `evaluate` runs after each
//! append and emits zero or more security events; `precheck` runs the
//! restricted-operation rule before an action proceeds and can abort it;
//! `scan` is the batch form over a time window, grouping by user and by
//! client address.
//!
//! The threshold boundary is consistent everywhere: a threshold is the
//! maximum tolerated count, and the entry pushing the count strictly
//! past it triggers.

use crate::config::SecurityConfig;
use crate::error::{AuditError, Result};
use crate::store::AuditLogStore;
use crate::types::{AuditEntry, Evidence, SecurityEvent, SecurityEventKind};
use chrono::{Duration, Local, Timelike, Utc};
use std::collections::{HashMap, HashSet};

/// Lowercased lookup tables, compiled once per config
struct CompiledRules {
    sensitive: HashSet<String>,
    restricted: HashSet<String>,
    allowed: HashSet<String>,
    logins: HashSet<String>,
}

impl CompiledRules {
    fn new(config: &SecurityConfig) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect();
        Self {
            sensitive: lower(&config.sensitive_resources),
            restricted: lower(&config.restricted_operations),
            allowed: lower(&config.allowed_operations),
            logins: lower(&config.login_operations),
        }
    }
}

/// Evaluates the fixed rule taxonomy against the store and config.
///
/// Read-only against the store; safe to run concurrently for unrelated
/// entries. Deterministic given the same store contents and config.
pub struct SecurityRuleEngine {
    config: SecurityConfig,
    compiled: CompiledRules,
}

impl SecurityRuleEngine {
    pub fn new(config: SecurityConfig) -> Self {
        let compiled = CompiledRules::new(&config);
        Self { config, compiled }
    }

    /// The active configuration
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Evaluate one freshly appended entry against all rules.
    pub async fn evaluate(
        &self,
        store: &AuditLogStore,
        entry: &AuditEntry,
    ) -> Result<Vec<SecurityEvent>> {
        let mut events = Vec::new();

        // Repeated failures: failed login-class entries for this user
        // within the window, including the entry just appended.
        if !entry.success && self.is_login_operation(&entry.operation) {
            let window = Duration::seconds(self.config.failed_attempt_window_secs as i64);
            let failures = store
                .count_matching(window, |e| {
                    e.user == entry.user && !e.success && self.is_login_operation(&e.operation)
                })
                .await?;
            if failures > self.config.max_failed_attempts as u64 {
                let kind = SecurityEventKind::MultipleFailedLogins;
                events.push(
                    SecurityEvent::new(
                        kind,
                        self.config.severity_for(kind),
                        format!(
                            "user '{}' has {} failed login attempts within {}s",
                            entry.user, failures, self.config.failed_attempt_window_secs
                        ),
                        Evidence::Count { count: failures },
                    )
                    .with_user(&entry.user),
                );
            }
        }

        // Sensitive resource: fires regardless of success
        if let Some(resource) = &entry.resource {
            if self.compiled.sensitive.contains(&resource.to_lowercase()) {
                let kind = SecurityEventKind::SensitiveResourceAccess;
                events.push(
                    SecurityEvent::new(
                        kind,
                        self.config.severity_for(kind),
                        format!(
                            "user '{}' accessed sensitive resource '{}' ({})",
                            entry.user,
                            resource,
                            if entry.success { "succeeded" } else { "failed" }
                        ),
                        Evidence::Entry {
                            entry: Box::new(entry.clone()),
                        },
                    )
                    .with_user(&entry.user),
                );
            }
        }

        // Unusual time: local hour outside business hours
        let hour = entry.timestamp.with_timezone(&Local).hour();
        if self.is_unusual_hour(hour) {
            let kind = SecurityEventKind::UnusualTimeAccess;
            events.push(
                SecurityEvent::new(
                    kind,
                    self.config.severity_for(kind),
                    format!(
                        "user '{}' performed {} at hour {:02} (outside {:02}:00-{:02}:00)",
                        entry.user,
                        entry.operation,
                        hour,
                        self.config.business_hours_start,
                        self.config.business_hours_end
                    ),
                    Evidence::Entry {
                        entry: Box::new(entry.clone()),
                    },
                )
                .with_user(&entry.user),
            );
        }

        // High-frequency actor: all operations for this user in the window
        let window = Duration::seconds(self.config.high_frequency_window_secs as i64);
        let rate = store
            .count_matching(window, |e| e.user == entry.user)
            .await?;
        if rate > self.config.high_frequency_threshold as u64 {
            let kind = SecurityEventKind::HighFrequencyOperations;
            events.push(
                SecurityEvent::new(
                    kind,
                    self.config.severity_for(kind),
                    format!(
                        "user '{}' issued {} operations within {}s",
                        entry.user, rate, self.config.high_frequency_window_secs
                    ),
                    Evidence::Count { count: rate },
                )
                .with_user(&entry.user),
            );
        }

        // Restricted operation, post-hoc form
        if let Some(token) = self.restricted_token(&entry.operation, entry.query.as_deref()) {
            let kind = SecurityEventKind::RestrictedOperation;
            events.push(
                SecurityEvent::new(
                    kind,
                    self.config.severity_for(kind),
                    format!(
                        "user '{}' executed restricted operation '{}' (matched '{}')",
                        entry.user, entry.operation, token
                    ),
                    Evidence::Entry {
                        entry: Box::new(entry.clone()),
                    },
                )
                .with_user(&entry.user),
            );
        }

        Ok(events)
    }

    /// Restricted-operation rule in pre-check mode.
    ///
    /// Returns `RestrictedOperation` to abort the action instead of
    /// emitting an event. Callers invoke this before the operation
    /// proceeds; post-hoc audit calls go through `evaluate`.
    pub fn precheck(&self, user: &str, operation: &str, query: Option<&str>) -> Result<()> {
        if let Some(token) = self.restricted_token(operation, query) {
            return Err(AuditError::RestrictedOperation {
                user: user.to_string(),
                operation: operation.to_string(),
                token,
            });
        }
        Ok(())
    }

    /// Batch scan over the trailing `window`: repeated failures and
    /// high-frequency activity in aggregate per user, plus the
    /// address-level high-frequency variant.
    pub async fn scan(&self, store: &AuditLogStore, window: Duration) -> Result<Vec<SecurityEvent>> {
        let cutoff = Utc::now() - window;
        let entries = store.entries_since(cutoff).await?;
        let window_secs = window.num_seconds();

        let mut per_user: HashMap<&str, (u64, u64)> = HashMap::new(); // (total, failed logins)
        let mut per_address: HashMap<&str, u64> = HashMap::new();
        for entry in &entries {
            let counters = per_user.entry(entry.user.as_str()).or_default();
            counters.0 += 1;
            if !entry.success && self.is_login_operation(&entry.operation) {
                counters.1 += 1;
            }
            if let Some(address) = &entry.client_address {
                *per_address.entry(address.as_str()).or_default() += 1;
            }
        }

        // Sorted for deterministic output ordering
        let mut users: Vec<_> = per_user.into_iter().collect();
        users.sort_by_key(|(user, _)| user.to_string());
        let mut addresses: Vec<_> = per_address.into_iter().collect();
        addresses.sort_by_key(|(address, _)| address.to_string());

        let mut events = Vec::new();
        for (user, (total, failed_logins)) in users {
            if failed_logins > self.config.max_failed_attempts as u64 {
                let kind = SecurityEventKind::MultipleFailedLogins;
                events.push(
                    SecurityEvent::new(
                        kind,
                        self.config.severity_for(kind),
                        format!(
                            "user '{}' has {} failed login attempts within {}s",
                            user, failed_logins, window_secs
                        ),
                        Evidence::Count {
                            count: failed_logins,
                        },
                    )
                    .with_user(user),
                );
            }
            if total > self.config.high_frequency_threshold as u64 {
                let kind = SecurityEventKind::HighFrequencyOperations;
                events.push(
                    SecurityEvent::new(
                        kind,
                        self.config.severity_for(kind),
                        format!(
                            "user '{}' issued {} operations within {}s",
                            user, total, window_secs
                        ),
                        Evidence::Count { count: total },
                    )
                    .with_user(user),
                );
            }
        }
        for (address, total) in addresses {
            if total > self.config.high_frequency_threshold as u64 {
                let kind = SecurityEventKind::HighFrequencyActor;
                events.push(
                    SecurityEvent::new(
                        kind,
                        self.config.severity_for(kind),
                        format!(
                            "address '{}' issued {} operations within {}s",
                            address, total, window_secs
                        ),
                        Evidence::Count { count: total },
                    )
                    .with_address(address),
                );
            }
        }

        Ok(events)
    }

    fn is_login_operation(&self, operation: &str) -> bool {
        self.compiled.logins.contains(&operation.to_lowercase())
    }

    fn is_unusual_hour(&self, hour: u32) -> bool {
        hour < self.config.business_hours_start || hour >= self.config.business_hours_end
    }

    /// Find a restricted token in the operation tag or statement text.
    ///
    /// The operation tag is matched exactly; statement text gets a
    /// best-effort token scan (single tokens and adjacent pairs joined
    /// with `_`, so "DROP DATABASE x" matches "DROP_DATABASE"). This is
    /// a heuristic, not a SQL parser — obfuscated statements can evade it.
    fn restricted_token(&self, operation: &str, query: Option<&str>) -> Option<String> {
        let op_lower = operation.to_lowercase();
        if self.compiled.allowed.contains(&op_lower) {
            return None;
        }
        if self.compiled.restricted.contains(&op_lower) {
            return Some(operation.to_string());
        }

        let query = query?;
        let tokens: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();
        for token in &tokens {
            if self.compiled.restricted.contains(token) {
                return Some(token.clone());
            }
        }
        for pair in tokens.windows(2) {
            let joined = format!("{}_{}", pair[0], pair[1]);
            if self.compiled.restricted.contains(&joined) {
                return Some(joined);
            }
        }
        None
    }
}
