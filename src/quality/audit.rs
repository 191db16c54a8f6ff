//! Quality-control audit trail.
//!
//! Every admission, monitoring, and result decision leaves an entry. Entries
//! are kept in memory and expired by the retention window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One quality-control decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// Loop the decision concerns
    pub loop_id: String,
    /// Decision name ("admission", "monitoring", "result")
    pub action: String,
    /// Structured decision detail
    pub details: Value,
    /// Quality score at decision time
    pub quality_score: f64,
}

#[derive(Debug)]
struct TimedEntry {
    entry: AuditEntry,
    recorded: Instant,
}

/// In-memory audit log with time-based retention.
#[derive(Debug)]
pub struct AuditTrail {
    entries: Mutex<Vec<TimedEntry>>,
    retention: Duration,
}

impl AuditTrail {
    /// Create a trail with the given retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            retention,
        }
    }

    /// Record a decision.
    pub fn record(
        &self,
        loop_id: impl Into<String>,
        action: impl Into<String>,
        details: Value,
        quality_score: f64,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            loop_id: loop_id.into(),
            action: action.into(),
            details,
            quality_score,
        };
        tracing::debug!(
            loop_id = %entry.loop_id,
            action = %entry.action,
            quality_score = entry.quality_score,
            "Recording audit entry"
        );
        self.lock().push(TimedEntry {
            entry,
            recorded: Instant::now(),
        });
    }

    /// Entries recorded for a loop, oldest first.
    pub fn entries_for(&self, loop_id: &str) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|t| t.entry.loop_id == loop_id)
            .map(|t| t.entry.clone())
            .collect()
    }

    /// Drop entries older than the retention window. Returns how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let cutoff = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|t| cutoff.duration_since(t.recorded) < self.retention);
        before - entries.len()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the trail is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TimedEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
