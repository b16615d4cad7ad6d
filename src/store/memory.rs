// src/store/memory.rs
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{ItemStore, WindowQuery};
use crate::error::StoreError;
use crate::model::{normalize_category, CategoryFilter, EntryId, NewsItem, ReadingWindowEntry};

/// Thread-safe in-memory reading window.
///
/// All operations run under one mutex, which gives `list_unpushed` a consistent
/// snapshot and makes `mark_pushed` all-or-nothing.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by id, so iteration order is append order.
    entries: BTreeMap<EntryId, ReadingWindowEntry>,
    next_id: u64,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append with an explicit timestamp (backfills and deterministic tests).
    pub fn append_at(&self, item: NewsItem, added_at: DateTime<Utc>) -> Result<EntryId, StoreError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = EntryId(inner.next_id);
        let category = normalize_category(&item.category);
        inner.entries.insert(
            id,
            ReadingWindowEntry {
                id,
                item,
                category,
                added_at,
                pushed: false,
                pushed_at: None,
            },
        );
        Ok(id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("reading window mutex poisoned".into()))
    }
}

#[async_trait::async_trait]
impl ItemStore for InMemoryItemStore {
    async fn append_to_window(&self, item: NewsItem) -> Result<EntryId, StoreError> {
        self.append_at(item, Utc::now())
    }

    async fn list_unpushed(
        &self,
        filter: &CategoryFilter,
    ) -> Result<Vec<ReadingWindowEntry>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<ReadingWindowEntry> = inner
            .entries
            .values()
            .filter(|e| !e.pushed && filter.matches(&e.category))
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.added_at, e.id));
        Ok(out)
    }

    async fn count_unpushed(&self) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        Ok(inner.entries.values().filter(|e| !e.pushed).count())
    }

    async fn mark_pushed(&self, ids: &[EntryId], at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;

        // Validate the whole set first; mutate only when every id can transition.
        for id in ids {
            match inner.entries.get(id) {
                None => return Err(StoreError::NotFound(*id)),
                Some(e) if e.pushed => return Err(StoreError::AlreadyPushed(*id)),
                Some(_) => {}
            }
        }
        for id in ids {
            if let Some(e) = inner.entries.get_mut(id) {
                e.pushed = true;
                e.pushed_at = Some(at);
            }
        }
        Ok(())
    }

    async fn clear_pushed(&self) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.pushed);
        Ok(before - inner.entries.len())
    }

    async fn remove(&self, id: EntryId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .entries
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn get(&self, id: EntryId) -> Result<Option<ReadingWindowEntry>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.entries.get(&id).cloned())
    }

    async fn list(&self, query: &WindowQuery) -> Result<Vec<ReadingWindowEntry>, StoreError> {
        let inner = self.lock()?;
        let category = query.category.as_deref().map(normalize_category);
        let mut rows: Vec<&ReadingWindowEntry> = inner
            .entries
            .values()
            .filter(|e| query.pushed.accepts(e.pushed))
            .filter(|e| category.as_deref().map_or(true, |c| c == e.category))
            .collect();
        rows.sort_by_key(|e| std::cmp::Reverse((e.added_at, e.id)));
        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn count_total(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.entries.len())
    }
}
