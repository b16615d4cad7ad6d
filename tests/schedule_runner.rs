// tests/schedule_runner.rs
//
// Cron tasks: minute-resolution firing, category filters, run-once-per-minute,
// manual run-now.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use common::{append_n, ntfy_channel, FakeDispatcher, ID_BODY};
use newsdesk::catalog::{Catalog, ChannelDraft, TaskDraft, TemplateDraft};
use newsdesk::model::{CategoryFilter, ScheduledTask};
use newsdesk::schedule::ScheduleRunner;
use newsdesk::store::{InMemoryItemStore, ItemStore, PushedFilter, WindowQuery};
use newsdesk::BatchComposer;

struct Fixture {
    store: Arc<InMemoryItemStore>,
    dispatcher: Arc<FakeDispatcher>,
    catalog: Arc<Catalog>,
    runner: ScheduleRunner,
    channel_id: String,
    template_id: String,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryItemStore::new());
    let dispatcher = FakeDispatcher::new();
    let catalog = Arc::new(Catalog::in_memory());
    let channel_id = catalog
        .create_channel(ChannelDraft {
            name: "phone".into(),
            enabled: None,
            kind: ntfy_channel("unused").kind,
        })
        .unwrap()
        .id;
    let template_id = catalog
        .create_template(TemplateDraft {
            name: "ids".into(),
            subject: None,
            body: ID_BODY.into(),
            is_default: false,
        })
        .unwrap()
        .id;
    let composer = Arc::new(BatchComposer::new(
        store.clone(),
        dispatcher.clone(),
        Duration::from_secs(5),
    ));
    Fixture {
        runner: ScheduleRunner::new(catalog.clone(), composer),
        store,
        dispatcher,
        catalog,
        channel_id,
        template_id,
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 23, h, m, s).unwrap()
}

impl Fixture {
    fn task(&self, cron: &str, categories: CategoryFilter, enabled: bool) -> ScheduledTask {
        self.catalog
            .create_task(TaskDraft {
                name: "hourly tech".into(),
                cron_expr: cron.into(),
                channel_id: self.channel_id.clone(),
                template_id: Some(self.template_id.clone()),
                categories,
                enabled: Some(enabled),
            })
            .unwrap()
    }
}

#[tokio::test]
async fn hourly_tech_task_only_takes_tech_items() {
    let f = fixture();
    let task = f.task("0 * * * *", CategoryFilter::of(["tech"]), true);
    append_n(f.store.as_ref(), "tech-", "tech", 3).await;
    append_n(f.store.as_ref(), "trend-", "trending", 2).await;

    // half past: not due
    assert!(f.runner.tick_at(at(10, 30, 0)).await.is_empty());

    let runs = f.runner.tick_at(at(11, 0, 12)).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].task_id, task.id);
    assert_eq!(*runs[0].result.as_ref().unwrap(), 3);

    let sent = f.dispatcher.sends();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].item_ids().iter().all(|id| id.starts_with("tech-")));

    let left = f
        .store
        .list(&WindowQuery {
            pushed: PushedFilter::No,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(left.len(), 2);
    assert!(left.iter().all(|e| e.category == "trending"));

    assert_eq!(
        f.catalog.task(&task.id).unwrap().last_run_at,
        Some(at(11, 0, 0))
    );
}

#[tokio::test]
async fn a_task_fires_once_per_matching_minute() {
    let f = fixture();
    f.task("*/5 * * * *", CategoryFilter::any(), true);
    append_n(f.store.as_ref(), "n", "tech", 1).await;

    assert_eq!(f.runner.tick_at(at(9, 5, 1)).await.len(), 1);
    // a second tick inside the same minute is a no-op
    assert!(f.runner.tick_at(at(9, 5, 40)).await.is_empty());

    append_n(f.store.as_ref(), "m", "tech", 1).await;
    let runs = f.runner.tick_at(at(9, 10, 0)).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(f.dispatcher.send_count(), 2);
}

#[tokio::test]
async fn disabled_tasks_are_skipped_but_can_run_now() {
    let f = fixture();
    let task = f.task("* * * * *", CategoryFilter::any(), false);
    append_n(f.store.as_ref(), "n", "ai", 2).await;

    assert!(f.runner.tick_at(at(8, 0, 0)).await.is_empty());
    assert_eq!(f.dispatcher.send_count(), 0);

    assert_eq!(f.runner.run_now(&task.id).await.unwrap(), 2);
    assert_eq!(f.dispatcher.send_count(), 1);
    assert!(f.catalog.task(&task.id).unwrap().last_run_at.is_some());
}

#[tokio::test]
async fn empty_window_run_sends_nothing_but_advances() {
    let f = fixture();
    let task = f.task("0 8 * * *", CategoryFilter::any(), true);
    let runs = f.runner.tick_at(at(8, 0, 0)).await;
    assert_eq!(*runs[0].result.as_ref().unwrap(), 0);
    assert_eq!(f.dispatcher.send_count(), 0);
    assert_eq!(f.catalog.task(&task.id).unwrap().last_run_at, Some(at(8, 0, 0)));
}

#[tokio::test]
async fn failed_delivery_keeps_items_for_the_next_run() {
    let f = fixture();
    f.task("0 * * * *", CategoryFilter::any(), true);
    append_n(f.store.as_ref(), "n", "tech", 2).await;

    f.dispatcher.set_failing(true);
    let runs = f.runner.tick_at(at(12, 0, 0)).await;
    assert_eq!(runs[0].result.as_ref().unwrap_err().kind(), "delivery");
    assert_eq!(f.store.count_unpushed().await.unwrap(), 2);

    f.dispatcher.set_failing(false);
    let runs = f.runner.tick_at(at(13, 0, 0)).await;
    assert_eq!(*runs[0].result.as_ref().unwrap(), 2);
}

#[tokio::test]
async fn run_now_unknown_task_is_not_found() {
    let f = fixture();
    let err = f.runner.run_now("nope").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}
