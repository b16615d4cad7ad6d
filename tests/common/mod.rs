// tests/common/mod.rs
// Shared doubles for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use newsdesk::error::{DeliveryError, StoreError};
use newsdesk::model::{CategoryFilter, EntryId, NewsItem, ReadingWindowEntry, TemplateRecord};
use newsdesk::notify::{Channel, ChannelKind, Dispatcher, NtfyConfig};
use newsdesk::store::{InMemoryItemStore, ItemStore, WindowQuery};

/// Renders one item id per line, so the fake dispatcher can count sends per item.
pub const ID_BODY: &str = "{{range .News}}{{.ID}}\n{{end}}";

#[derive(Debug, Clone)]
pub struct Sent {
    pub channel_id: String,
    pub subject: String,
    pub body: String,
}

impl Sent {
    pub fn item_ids(&self) -> Vec<String> {
        self.body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Records every send; can be switched to fail or to take a while.
#[derive(Default)]
pub struct FakeDispatcher {
    sends: Mutex<Vec<Sent>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        let d = Self::default();
        *d.delay.lock().unwrap() = Some(delay);
        Arc::new(d)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sends(&self) -> Vec<Sent> {
        self.sends.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }

    /// How many times each item id went out.
    pub fn per_item(&self) -> HashMap<String, usize> {
        let mut m = HashMap::new();
        for s in self.sends() {
            for id in s.item_ids() {
                *m.entry(id).or_insert(0) += 1;
            }
        }
        m
    }
}

#[async_trait::async_trait]
impl Dispatcher for FakeDispatcher {
    async fn send(&self, channel: &Channel, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.sends.lock().unwrap().push(Sent {
            channel_id: channel.id.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Delegates to the in-memory store but refuses every pushed transition.
#[derive(Default)]
pub struct MarkFailingStore {
    pub inner: InMemoryItemStore,
}

#[async_trait::async_trait]
impl ItemStore for MarkFailingStore {
    async fn append_to_window(&self, item: NewsItem) -> Result<EntryId, StoreError> {
        self.inner.append_to_window(item).await
    }
    async fn list_unpushed(&self, f: &CategoryFilter) -> Result<Vec<ReadingWindowEntry>, StoreError> {
        self.inner.list_unpushed(f).await
    }
    async fn count_unpushed(&self) -> Result<usize, StoreError> {
        self.inner.count_unpushed().await
    }
    async fn mark_pushed(&self, _ids: &[EntryId], _at: DateTime<Utc>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }
    async fn clear_pushed(&self) -> Result<usize, StoreError> {
        self.inner.clear_pushed().await
    }
    async fn remove(&self, id: EntryId) -> Result<(), StoreError> {
        self.inner.remove(id).await
    }
    async fn get(&self, id: EntryId) -> Result<Option<ReadingWindowEntry>, StoreError> {
        self.inner.get(id).await
    }
    async fn list(&self, q: &WindowQuery) -> Result<Vec<ReadingWindowEntry>, StoreError> {
        self.inner.list(q).await
    }
    async fn count_total(&self) -> Result<usize, StoreError> {
        self.inner.count_total().await
    }
}

pub fn news(id: &str, category: &str) -> NewsItem {
    NewsItem {
        id: id.to_string(),
        title: format!("Title {id}"),
        summary: format!("Summary of {id}"),
        url: format!("https://example.com/{id}"),
        source: "Hacker News".into(),
        category: category.to_string(),
        trans_title: None,
        trans_summary: None,
        author: None,
        image_url: None,
        published_at: None,
    }
}

pub fn ntfy_channel(id: &str) -> Channel {
    Channel::new(
        id,
        "phone",
        ChannelKind::Ntfy(NtfyConfig {
            server_url: "https://ntfy.sh".into(),
            topic: "news".into(),
            token: None,
            priority: None,
            markdown: true,
        }),
    )
    .expect("valid ntfy channel")
}

pub fn id_template() -> TemplateRecord {
    TemplateRecord {
        id: "ids".into(),
        name: "ids".into(),
        subject: Some("{{.Count}} items".into()),
        body: ID_BODY.into(),
        is_default: false,
        updated_at: Utc::now(),
    }
}

pub async fn append_n(store: &dyn ItemStore, prefix: &str, category: &str, n: usize) -> Vec<EntryId> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        ids.push(
            store
                .append_to_window(news(&format!("{prefix}{i}"), category))
                .await
                .unwrap(),
        );
    }
    ids
}
