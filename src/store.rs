//! Append-only JSONL audit log store
//!
//! Audit entries and security events share one newline-delimited file,
//! `audit.jsonl`, inside the store directory. Appends are serialized
//! behind an internal write lock (single-writer discipline); reads take
//! no lock and observe either the pre- or post-append state — a
//! partially flushed trailing line parses as malformed and is skipped.
//! `prune` is the only mutation besides append and rewrites the file
//! atomically (temp file + rename) while holding the write lock.

use crate::error::{AuditError, Result};
use crate::types::{AuditEntry, LogRecord, RecordId, SecurityEvent};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

const LOG_FILE: &str = "audit.jsonl";

/// Filter for querying audit entries
#[derive(Debug, Default, Clone)]
pub struct QueryFilter {
    /// Earliest timestamp, inclusive
    pub since: Option<DateTime<Utc>>,
    /// Latest timestamp, inclusive
    pub until: Option<DateTime<Utc>>,
    /// Exact user match
    pub user: Option<String>,
    /// Exact operation tag match
    pub operation: Option<String>,
    /// Match on outcome
    pub success: Option<bool>,
    /// Tail-N: keep only the most recent N matching entries
    pub limit: Option<usize>,
    /// Return newest-first for display (default is timestamp ascending)
    pub descending: bool,
}

impl QueryFilter {
    /// Reject malformed filters before touching storage
    pub fn validate(&self) -> Result<()> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(AuditError::Validation(format!(
                    "since ({}) is after until ({})",
                    since, until
                )));
            }
        }
        Ok(())
    }

    /// Check if an entry matches this filter
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        if let Some(ref user) = self.user {
            if entry.user != *user {
                return false;
            }
        }
        if let Some(ref operation) = self.operation {
            if entry.operation != *operation {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        true
    }
}

/// Durable, ordered, queryable record of audit entries and security events
pub struct AuditLogStore {
    path: PathBuf,
    /// Serializes appends; held exclusively for the whole of `prune`
    write_lock: Mutex<()>,
    /// Next record id, seeded from the line count at open
    seq: AtomicU64,
    /// Malformed lines skipped across all reads
    skipped: AtomicU64,
}

impl AuditLogStore {
    /// Open (or create) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await.map_err(|e| {
            AuditError::Storage(format!(
                "failed to create audit directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        let path = dir.join(LOG_FILE);
        let existing = count_lines(&path).await?;
        tracing::info!(
            path = %path.display(),
            records = existing,
            "Audit log store opened"
        );
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            seq: AtomicU64::new(existing),
            skipped: AtomicU64::new(0),
        })
    }

    /// Path of the backing log file
    pub fn log_path(&self) -> &Path {
        &self.path
    }

    /// Append an audit entry. Never blocks on downstream rule evaluation
    /// or notification — callers invoke those after the append returns.
    pub async fn record(&self, entry: AuditEntry) -> Result<RecordId> {
        self.append(&LogRecord::Audit(entry)).await
    }

    /// Append a security event to the same log, tagged distinctly.
    pub async fn record_event(&self, event: SecurityEvent) -> Result<RecordId> {
        self.append(&LogRecord::Security(event)).await
    }

    async fn append(&self, record: &LogRecord) -> Result<RecordId> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                AuditError::Storage(format!(
                    "failed to open audit log {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        file.write_all(line.as_bytes()).await.map_err(|e| {
            AuditError::Storage(format!(
                "failed to append to audit log {}: {}",
                self.path.display(),
                e
            ))
        })?;
        file.flush().await.map_err(|e| {
            AuditError::Storage(format!(
                "failed to flush audit log {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(RecordId(self.seq.fetch_add(1, Ordering::SeqCst) + 1))
    }

    /// Query audit entries.
    ///
    /// Results are ordered by timestamp ascending, ties resolved by
    /// insertion order; `descending` reverses for display. `limit` has
    /// tail-N semantics: the most recent N matches, not an arbitrary N.
    pub async fn query(&self, filter: &QueryFilter) -> Result<Vec<AuditEntry>> {
        filter.validate()?;

        let mut matches: Vec<AuditEntry> = self
            .read_records()
            .await?
            .into_iter()
            .filter_map(|record| match record {
                LogRecord::Audit(entry) if filter.matches(&entry) => Some(entry),
                _ => None,
            })
            .collect();

        // Stable sort keeps insertion order for equal timestamps
        matches.sort_by_key(|e| e.timestamp);

        if let Some(limit) = filter.limit {
            if matches.len() > limit {
                matches.drain(..matches.len() - limit);
            }
        }
        if filter.descending {
            matches.reverse();
        }
        Ok(matches)
    }

    /// Count entries in the trailing `window` that satisfy `pred`.
    ///
    /// Only in-window entries are handed to the predicate, keeping
    /// frequency rules bounded by the window rather than total history.
    /// Never returns more than `query` over the same window and predicate.
    pub async fn count_matching<F>(&self, window: Duration, pred: F) -> Result<u64>
    where
        F: Fn(&AuditEntry) -> bool,
    {
        let cutoff = Utc::now() - window;
        let count = self
            .read_records()
            .await?
            .into_iter()
            .filter(|record| match record {
                LogRecord::Audit(entry) => entry.timestamp >= cutoff && pred(entry),
                LogRecord::Security(_) => false,
            })
            .count();
        Ok(count as u64)
    }

    /// Audit entries with timestamp at or after `cutoff`, insertion order.
    pub async fn entries_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_records()
            .await?
            .into_iter()
            .filter_map(|record| match record {
                LogRecord::Audit(entry) if entry.timestamp >= cutoff => Some(entry),
                _ => None,
            })
            .collect())
    }

    /// Security events with timestamp at or after `cutoff`, insertion order.
    pub async fn security_events_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>> {
        Ok(self
            .read_records()
            .await?
            .into_iter()
            .filter_map(|record| match record {
                LogRecord::Security(event) if event.timestamp >= cutoff => Some(event),
                _ => None,
            })
            .collect())
    }

    /// Drop records older than `retention_days`.
    ///
    /// Rewrites the log to a temp file and renames it over the original,
    /// holding the write lock for the whole operation so no append can
    /// interleave. A failure leaves the pre-prune file untouched.
    /// Returns the number of lines removed (expired plus malformed).
    pub async fn prune(&self, retention_days: u32) -> Result<u64> {
        let _guard = self.write_lock.lock().await;

        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AuditError::Storage(format!(
                    "failed to read audit log {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let mut kept = String::with_capacity(content.len());
        let mut total = 0u64;
        let mut retained = 0u64;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            total += 1;
            match serde_json::from_str::<LogRecord>(line) {
                Ok(record) if record.timestamp() >= cutoff => {
                    kept.push_str(line);
                    kept.push('\n');
                    retained += 1;
                }
                Ok(_) => {}
                Err(_) => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let removed = total - retained;
        if removed == 0 {
            return Ok(0);
        }

        let tmp_path = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp_path, kept).await.map_err(|e| {
            AuditError::Storage(format!(
                "failed to write pruned log {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            AuditError::Storage(format!(
                "failed to replace audit log {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(removed, retained, "Audit log pruned");
        Ok(removed)
    }

    /// Malformed lines skipped across all reads of this store
    pub fn skipped_lines(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Read every parseable record. Malformed lines are skipped, counted,
    /// and logged — never a hard failure. A missing file is an empty store.
    async fn read_records(&self) -> Result<Vec<LogRecord>> {
        let file = match fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AuditError::Storage(format!(
                    "failed to read audit log {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Skipping malformed audit log line");
                }
            }
        }
        Ok(records)
    }
}

async fn count_lines(path: &Path) -> Result<u64> {
    let file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(AuditError::Storage(format!(
                "failed to open audit log {}: {}",
                path.display(),
                e
            )))
        }
    };
    let mut lines = BufReader::new(file).lines();
    let mut count = 0u64;
    while let Ok(Some(_)) = lines.next_line().await {
        count += 1;
    }
    Ok(count)
}
