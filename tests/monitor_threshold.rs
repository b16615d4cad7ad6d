// tests/monitor_threshold.rs
//
// Threshold auto-push: fires at the configured count, composes once, and suppresses
// overlapping checks while a composition is in flight.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{append_n, ntfy_channel, FakeDispatcher, ID_BODY};
use newsdesk::catalog::{Catalog, ChannelDraft, TemplateDraft};
use newsdesk::model::AutoPushConfig;
use newsdesk::monitor::{MonitorOutcome, MonitorState, ThresholdMonitor};
use newsdesk::store::{InMemoryItemStore, ItemStore};
use newsdesk::BatchComposer;

struct Fixture {
    store: Arc<InMemoryItemStore>,
    dispatcher: Arc<FakeDispatcher>,
    catalog: Arc<Catalog>,
    monitor: Arc<ThresholdMonitor>,
}

fn fixture(dispatcher: Arc<FakeDispatcher>, enabled: bool, with_channel: bool) -> Fixture {
    let store = Arc::new(InMemoryItemStore::new());
    let catalog = Arc::new(Catalog::in_memory());
    let channel_id = with_channel.then(|| {
        catalog
            .create_channel(ChannelDraft {
                name: "phone".into(),
                enabled: None,
                kind: ntfy_channel("unused").kind,
            })
            .unwrap()
            .id
    });
    let template = catalog
        .create_template(TemplateDraft {
            name: "ids".into(),
            subject: None,
            body: ID_BODY.into(),
            is_default: false,
        })
        .unwrap();
    catalog
        .set_auto_push(AutoPushConfig {
            enabled,
            threshold: 6,
            channel_id,
            template_id: Some(template.id),
        })
        .unwrap();

    let composer = Arc::new(BatchComposer::new(
        store.clone(),
        dispatcher.clone(),
        Duration::from_secs(5),
    ));
    let monitor = Arc::new(ThresholdMonitor::new(catalog.clone(), composer));
    Fixture {
        store,
        dispatcher,
        catalog,
        monitor,
    }
}

#[tokio::test]
async fn five_items_wait_sixth_fires_once() {
    let f = fixture(FakeDispatcher::new(), true, true);
    append_n(f.store.as_ref(), "n", "tech", 5).await;

    assert!(matches!(
        f.monitor.check().await,
        MonitorOutcome::BelowThreshold {
            count: 5,
            threshold: 6
        }
    ));
    assert_eq!(f.dispatcher.send_count(), 0);

    append_n(f.store.as_ref(), "m", "ai", 1).await;
    match f.monitor.check().await {
        MonitorOutcome::Composed(Ok(6)) => {}
        other => panic!("expected one 6-item composition, got {other:?}"),
    }
    assert_eq!(f.dispatcher.send_count(), 1);
    assert_eq!(f.dispatcher.sends()[0].item_ids().len(), 6);
    assert_eq!(f.store.count_unpushed().await.unwrap(), 0);
    assert_eq!(f.monitor.state(), MonitorState::Idle);

    // nothing left to push
    assert!(matches!(
        f.monitor.check().await,
        MonitorOutcome::BelowThreshold { count: 0, .. }
    ));
}

#[tokio::test]
async fn disabled_auto_push_never_fires() {
    let f = fixture(FakeDispatcher::new(), false, true);
    append_n(f.store.as_ref(), "n", "tech", 10).await;
    assert!(matches!(f.monitor.check().await, MonitorOutcome::Disabled));
    assert_eq!(f.dispatcher.send_count(), 0);
}

#[tokio::test]
async fn enabled_without_channel_skips_quietly() {
    let f = fixture(FakeDispatcher::new(), true, false);
    append_n(f.store.as_ref(), "n", "tech", 6).await;
    for _ in 0..3 {
        assert!(matches!(f.monitor.check().await, MonitorOutcome::NoChannel));
        assert_eq!(f.monitor.state(), MonitorState::Idle);
    }
    assert_eq!(f.dispatcher.send_count(), 0);
    assert_eq!(f.store.count_unpushed().await.unwrap(), 6);
    assert!(!f.monitor.status().await.unwrap().ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checks_during_a_composition_are_suppressed() {
    let f = fixture(FakeDispatcher::slow(Duration::from_millis(300)), true, true);
    append_n(f.store.as_ref(), "n", "tech", 6).await;

    let first = {
        let m = f.monitor.clone();
        tokio::spawn(async move { m.check().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.monitor.state(), MonitorState::Triggering);
    assert!(matches!(f.monitor.check().await, MonitorOutcome::Suppressed));

    assert!(matches!(first.await.unwrap(), MonitorOutcome::Composed(Ok(6))));
    assert_eq!(f.dispatcher.send_count(), 1);
    assert_eq!(f.monitor.state(), MonitorState::Idle);
}

#[tokio::test]
async fn status_reports_pending_count_and_readiness() {
    let f = fixture(FakeDispatcher::new(), true, true);
    append_n(f.store.as_ref(), "n", "tech", 6).await;
    let s = f.monitor.status().await.unwrap();
    assert_eq!(s.pending_count, 6);
    assert!(s.ready);
    assert_eq!(f.catalog.auto_push().threshold, 6);
}

#[tokio::test]
async fn background_loop_reacts_to_pokes() {
    let f = fixture(FakeDispatcher::new(), true, true);
    let handle = f.monitor.clone().spawn(Duration::from_secs(3600));

    for i in 0..6 {
        f.store
            .append_to_window(common::news(&format!("p{i}"), "tech"))
            .await
            .unwrap();
        f.monitor.poke();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while f.store.count_unpushed().await.unwrap() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "monitor never fired");
        f.monitor.poke();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.abort();

    assert_eq!(f.dispatcher.send_count(), 1);
}
