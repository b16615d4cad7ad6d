//! history.rs — bounded in-memory log of batches that were delivered but not marked pushed.
//!
//! Operators read it from `/api/reconciliation` to decide whether to clear the
//! listed entries by hand before the next trigger resends them.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::EntryId;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconciliationRecord {
    pub at: DateTime<Utc>,
    /// `threshold`, `schedule:<task>` or `manual:<task>`.
    pub trigger: String,
    pub channel_id: String,
    pub entry_ids: Vec<EntryId>,
    pub error: String,
}

#[derive(Debug)]
pub struct ReconciliationLog {
    inner: Mutex<Vec<ReconciliationRecord>>,
    cap: usize,
}

impl ReconciliationLog {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, rec: ReconciliationRecord) {
        // A poisoned lock only means another writer panicked mid-push; the Vec is still valid.
        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.push(rec);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Most recent `n` records, oldest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<ReconciliationRecord> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReconciliationLog {
    fn default() -> Self {
        Self::with_capacity(200)
    }
}
