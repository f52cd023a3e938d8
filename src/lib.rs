//! # dbguard
//!
//! Embedded audit logging and security monitoring core for database
//! administration backends.
//!
//! ## Overview
//!
//! Every administrative or data operation the backend performs is
//! recorded as an immutable audit entry, continuously scanned for
//! suspicious patterns, and made available through ad-hoc reports and a
//! publish/subscribe notification channel. Surrounding concerns (SQL
//! generation, connection lifecycle, authentication) stay outside; they
//! call in through two narrow interfaces — record an operation result,
//! and query/report on recorded operations.
//!
//! ## Quick Start
//!
//! ```rust
//! use dbguard::{AuditPipeline, OperationOutcome, SecurityConfig};
//!
//! # async fn example() -> dbguard::Result<()> {
//! let dir = std::env::temp_dir().join("dbguard-quickstart");
//! let pipeline = AuditPipeline::open(&dir, SecurityConfig::default()).await?;
//!
//! // Record a completed operation; triggered rules publish notifications
//! let id = pipeline
//!     .record_operation(
//!         OperationOutcome::new("alice", "CREATE_TABLE", true).with_resource("orders"),
//!     )
//!     .await?;
//! println!("recorded as {}", id);
//!
//! // Ad-hoc inspection
//! let report = pipeline.report(&Default::default()).await?;
//! println!("{}", report.render());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **AuditLogStore** — append-only, durable JSONL record of audit
//!   entries and security events, with filtered retrieval
//! - **SecurityRuleEngine** — fixed rule taxonomy evaluated per entry
//!   and in batch over time windows
//! - **NotificationBus** — in-memory typed publish/subscribe fan-out
//!   with per-handler fault isolation and a JSONL mirror
//! - **ReportGenerator** — read-only statistical aggregation
//! - **AuditPipeline** — the facade wiring the four together

pub mod bus;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod redact;
pub mod report;
pub mod rules;
pub mod store;
pub mod types;

// Re-export core types
pub use bus::{
    Notification, NotificationBus, NotificationFilter, NotificationHandler, DATABASE_ALERT,
    PERFORMANCE_ALERT, SECURITY_ALERT, SYSTEM_ALERT, WILDCARD,
};
pub use config::SecurityConfig;
pub use error::{AuditError, Result};
pub use pipeline::{AuditPipeline, OperationOutcome};
pub use redact::Redactor;
pub use report::{OperationActivity, Report, ReportFilter, ReportGenerator, UserActivity};
pub use rules::SecurityRuleEngine;
pub use store::{AuditLogStore, QueryFilter};
pub use types::{
    AuditEntry, Evidence, LogRecord, RecordId, SecurityEvent, SecurityEventKind, Severity,
};
