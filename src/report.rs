//! Read-only aggregation over the audit log for human consumption

use crate::error::{AuditError, Result};
use crate::store::{AuditLogStore, QueryFilter};
use crate::types::AuditEntry;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Entries shown in the report's recent-activity section
const RECENT_LIMIT: usize = 20;
/// Rows kept in the per-user and per-operation breakdowns
const BREAKDOWN_LIMIT: usize = 10;

/// Filter for report generation. The time range defaults to the
/// trailing 24 hours when unset.
#[derive(Debug, Default, Clone)]
pub struct ReportFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub user: Option<String>,
    pub operation: Option<String>,
    pub success: Option<bool>,
}

/// Activity totals for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub user: String,
    pub total: u64,
    pub failures: u64,
}

/// Activity totals for one operation tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationActivity {
    pub operation: String,
    pub total: u64,
    pub failures: u64,
}

/// Aggregated audit statistics for a time range
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub total: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percentage with two decimals; 0.0 for an empty range (never NaN)
    pub success_rate: f64,
    /// One-line outcome, explicit for the zero-entries case
    pub summary: String,
    /// Top users by total activity, descending
    pub by_user: Vec<UserActivity>,
    /// Top operations by total activity, descending
    pub by_operation: Vec<OperationActivity>,
    /// Most recent entries, newest first, for display
    pub recent: Vec<AuditEntry>,
}

impl Report {
    /// Render as plain text for terminal or log consumption
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Audit report {} — {}\n{}\n",
            self.since.format("%Y-%m-%d %H:%M:%S"),
            self.until.format("%Y-%m-%d %H:%M:%S"),
            self.summary
        ));
        if self.total == 0 {
            return out;
        }
        out.push_str("\nTop users:\n");
        for u in &self.by_user {
            out.push_str(&format!(
                "  {:<24} {:>6} ops, {} failed\n",
                u.user, u.total, u.failures
            ));
        }
        out.push_str("\nTop operations:\n");
        for o in &self.by_operation {
            out.push_str(&format!(
                "  {:<24} {:>6} ops, {} failed\n",
                o.operation, o.total, o.failures
            ));
        }
        out.push_str("\nRecent activity:\n");
        for e in &self.recent {
            out.push_str(&format!(
                "  {} {:<16} {:<20} {}\n",
                e.timestamp.format("%H:%M:%S"),
                e.user,
                e.operation,
                if e.success { "ok" } else { "FAILED" }
            ));
        }
        out
    }
}

/// Generates reports from the audit log store
pub struct ReportGenerator {
    store: Arc<AuditLogStore>,
}

impl ReportGenerator {
    pub fn new(store: Arc<AuditLogStore>) -> Self {
        Self { store }
    }

    /// Aggregate entries matching `filter` into a report.
    ///
    /// The zero-entries case yields an explicit "no entries in range"
    /// summary with a 0.0 success rate rather than dividing by zero.
    pub async fn generate(&self, filter: &ReportFilter) -> Result<Report> {
        let until = filter.until.unwrap_or_else(Utc::now);
        let since = filter.since.unwrap_or(until - Duration::hours(24));
        if since > until {
            return Err(AuditError::Validation(format!(
                "since ({}) is after until ({})",
                since, until
            )));
        }

        let entries = self
            .store
            .query(&QueryFilter {
                since: Some(since),
                until: Some(until),
                user: filter.user.clone(),
                operation: filter.operation.clone(),
                success: filter.success,
                limit: None,
                descending: false,
            })
            .await?;

        let generated_at = Utc::now();
        if entries.is_empty() {
            return Ok(Report {
                generated_at,
                since,
                until,
                total: 0,
                success_count: 0,
                failure_count: 0,
                success_rate: 0.0,
                summary: "no entries in range".to_string(),
                by_user: Vec::new(),
                by_operation: Vec::new(),
                recent: Vec::new(),
            });
        }

        let total = entries.len() as u64;
        let success_count = entries.iter().filter(|e| e.success).count() as u64;
        let failure_count = total - success_count;
        let success_rate = round2(success_count as f64 * 100.0 / total as f64);

        let mut per_user: HashMap<&str, (u64, u64)> = HashMap::new();
        let mut per_operation: HashMap<&str, (u64, u64)> = HashMap::new();
        for entry in &entries {
            let u = per_user.entry(entry.user.as_str()).or_default();
            u.0 += 1;
            let o = per_operation.entry(entry.operation.as_str()).or_default();
            o.0 += 1;
            if !entry.success {
                u.1 += 1;
                o.1 += 1;
            }
        }

        let by_user = top_n(per_user)
            .into_iter()
            .map(|(user, (total, failures))| UserActivity {
                user: user.to_string(),
                total,
                failures,
            })
            .collect();
        let by_operation = top_n(per_operation)
            .into_iter()
            .map(|(operation, (total, failures))| OperationActivity {
                operation: operation.to_string(),
                total,
                failures,
            })
            .collect();

        // Newest first for display
        let recent: Vec<AuditEntry> = entries
            .iter()
            .rev()
            .take(RECENT_LIMIT)
            .cloned()
            .collect();

        Ok(Report {
            generated_at,
            since,
            until,
            total,
            success_count,
            failure_count,
            success_rate,
            summary: format!(
                "{} operations, {} succeeded, {} failed ({}% success)",
                total, success_count, failure_count, success_rate
            ),
            by_user,
            by_operation,
            recent,
        })
    }
}

/// Sort descending by total (name ascending on ties) and keep the top 10
fn top_n(map: HashMap<&str, (u64, u64)>) -> Vec<(&str, (u64, u64))> {
    let mut rows: Vec<_> = map.into_iter().collect();
    rows.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.0.cmp(b.0)));
    rows.truncate(BREAKDOWN_LIMIT);
    rows
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
