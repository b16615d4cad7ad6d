// src/store/mod.rs
//! Reading-window repository.
//!
//! The composer only talks to [`ItemStore`]; the in-memory implementation backs the
//! service and the tests, a database-backed one can slot in behind the same trait.

pub mod memory;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::StoreError;
use crate::model::{CategoryFilter, EntryId, NewsItem, ReadingWindowEntry};

pub use memory::InMemoryItemStore;

/// Pushed-state filter used by the reading-window listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushedFilter {
    #[default]
    All,
    Yes,
    No,
}

impl PushedFilter {
    fn accepts(self, pushed: bool) -> bool {
        match self {
            PushedFilter::All => true,
            PushedFilter::Yes => pushed,
            PushedFilter::No => !pushed,
        }
    }
}

/// UI listing query (newest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowQuery {
    pub category: Option<String>,
    pub pushed: PushedFilter,
    pub limit: usize,
    pub offset: usize,
}

impl Default for WindowQuery {
    fn default() -> Self {
        Self {
            category: None,
            pushed: PushedFilter::All,
            limit: 50,
            offset: 0,
        }
    }
}

#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    /// Add a producer item to the window as an unpushed entry.
    async fn append_to_window(&self, item: NewsItem) -> Result<EntryId, StoreError>;

    /// Unpushed entries matching `filter`, oldest first. The result is a snapshot.
    async fn list_unpushed(
        &self,
        filter: &CategoryFilter,
    ) -> Result<Vec<ReadingWindowEntry>, StoreError>;

    async fn count_unpushed(&self) -> Result<usize, StoreError>;

    /// Flip every listed entry to pushed, or none of them.
    ///
    /// Fails with [`StoreError::NotFound`] / [`StoreError::AlreadyPushed`] when any id
    /// cannot make the transition; in that case nothing changes.
    async fn mark_pushed(&self, ids: &[EntryId], at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Drop every pushed entry from the window. Returns how many were removed.
    async fn clear_pushed(&self) -> Result<usize, StoreError>;

    async fn remove(&self, id: EntryId) -> Result<(), StoreError>;

    async fn get(&self, id: EntryId) -> Result<Option<ReadingWindowEntry>, StoreError>;

    async fn list(&self, query: &WindowQuery) -> Result<Vec<ReadingWindowEntry>, StoreError>;

    async fn count_total(&self) -> Result<usize, StoreError>;
}
