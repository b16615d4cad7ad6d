// tests/compose_flow.rs
//
// Single-trigger behavior of the batch composer:
// - empty selection is a no-op
// - render and delivery failures leave the window untouched
// - a pushed entry is never selected again
// - delivered-but-unmarked batches land in the reconciliation log

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{append_n, id_template, ntfy_channel, FakeDispatcher, MarkFailingStore};
use newsdesk::error::{ComposeError, DeliveryError, RenderError};
use newsdesk::model::{CategoryFilter, TemplateRecord};
use newsdesk::store::{InMemoryItemStore, ItemStore, PushedFilter, WindowQuery};
use newsdesk::{BatchComposer, Trigger};

fn composer(store: Arc<dyn ItemStore>, d: Arc<FakeDispatcher>) -> BatchComposer {
    BatchComposer::new(store, d, Duration::from_secs(5))
}

fn manual() -> Trigger {
    Trigger::Manual {
        task_id: "t".into(),
    }
}

#[tokio::test]
async fn empty_selection_sends_nothing() {
    let store = Arc::new(InMemoryItemStore::new());
    let d = FakeDispatcher::new();
    let c = composer(store.clone(), d.clone());

    let sent = c
        .compose_and_send(&manual(), &CategoryFilter::any(), &ntfy_channel("c1"), None)
        .await
        .unwrap();
    assert_eq!(sent, 0);
    assert_eq!(d.send_count(), 0);
    assert_eq!(store.count_total().await.unwrap(), 0);
}

#[tokio::test]
async fn pushed_entries_are_never_reselected() {
    let store = Arc::new(InMemoryItemStore::new());
    let d = FakeDispatcher::new();
    let c = composer(store.clone(), d.clone());
    append_n(store.as_ref(), "n", "tech", 3).await;

    let tpl = id_template();
    let ch = ntfy_channel("c1");
    assert_eq!(
        c.compose_and_send(&manual(), &CategoryFilter::any(), &ch, Some(&tpl))
            .await
            .unwrap(),
        3
    );
    assert_eq!(
        c.compose_and_send(&manual(), &CategoryFilter::any(), &ch, Some(&tpl))
            .await
            .unwrap(),
        0
    );
    assert_eq!(d.send_count(), 1);
    assert_eq!(d.sends()[0].subject, "3 items");
    assert_eq!(store.count_unpushed().await.unwrap(), 0);

    let pushed = store
        .list(&WindowQuery {
            pushed: PushedFilter::Yes,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pushed.len(), 3);
    assert!(pushed.iter().all(|e| e.pushed_at.is_some()));
}

#[tokio::test]
async fn render_failure_marks_nothing() {
    let store = Arc::new(InMemoryItemStore::new());
    let d = FakeDispatcher::new();
    let c = composer(store.clone(), d.clone());
    append_n(store.as_ref(), "n", "tech", 2).await;

    let bad = TemplateRecord {
        body: "{{range .News}}\n{{.Headline}}{{end}}".into(),
        ..id_template()
    };
    let err = c
        .compose_and_send(&manual(), &CategoryFilter::any(), &ntfy_channel("c1"), Some(&bad))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ComposeError::Render(RenderError::UnknownField { line: 2, .. })
    ));
    assert_eq!(d.send_count(), 0);
    assert_eq!(store.count_unpushed().await.unwrap(), 2);
}

#[tokio::test]
async fn delivery_failure_then_retry_sends_same_items() {
    let store = Arc::new(InMemoryItemStore::new());
    let d = FakeDispatcher::new();
    let c = composer(store.clone(), d.clone());
    append_n(store.as_ref(), "n", "tech", 4).await;
    let tpl = id_template();
    let ch = ntfy_channel("c1");

    d.set_failing(true);
    let err = c
        .compose_and_send(&manual(), &CategoryFilter::any(), &ch, Some(&tpl))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "delivery");
    assert_eq!(store.count_unpushed().await.unwrap(), 4);

    d.set_failing(false);
    let sent = c
        .compose_and_send(&manual(), &CategoryFilter::any(), &ch, Some(&tpl))
        .await
        .unwrap();
    assert_eq!(sent, 4);
    assert_eq!(d.sends()[0].item_ids(), vec!["n0", "n1", "n2", "n3"]);
    assert_eq!(store.count_unpushed().await.unwrap(), 0);
}

#[tokio::test]
async fn slow_dispatch_times_out_without_marking() {
    let store = Arc::new(InMemoryItemStore::new());
    let d = FakeDispatcher::slow(Duration::from_millis(300));
    let c = BatchComposer::new(store.clone(), d.clone(), Duration::from_millis(50));
    append_n(store.as_ref(), "n", "tech", 1).await;

    let err = c
        .compose_and_send(&manual(), &CategoryFilter::any(), &ntfy_channel("c1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ComposeError::Delivery(DeliveryError::Timeout(_))));
    assert_eq!(store.count_unpushed().await.unwrap(), 1);
}

#[tokio::test]
async fn mark_failure_is_recorded_for_reconciliation() {
    let store = Arc::new(MarkFailingStore::default());
    let d = FakeDispatcher::new();
    let c = composer(store.clone(), d.clone());
    let ids = append_n(store.as_ref(), "n", "tech", 2).await;

    let err = c
        .compose_and_send(&Trigger::Threshold, &CategoryFilter::any(), &ntfy_channel("c1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ComposeError::Reconciliation { delivered: 2, .. }));
    assert_eq!(d.send_count(), 1);

    let log = c.reconciliation().snapshot_last_n(10);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].entry_ids, ids);
    assert_eq!(log[0].trigger, "threshold");
    assert_eq!(log[0].channel_id, "c1");
}

#[tokio::test]
async fn builtin_digest_is_used_without_a_template() {
    let store = Arc::new(InMemoryItemStore::new());
    let d = FakeDispatcher::new();
    let c = composer(store.clone(), d.clone());
    append_n(store.as_ref(), "n", "tech", 2).await;

    c.compose_and_send(&manual(), &CategoryFilter::any(), &ntfy_channel("c1"), None)
        .await
        .unwrap();
    let sent = &d.sends()[0];
    assert_eq!(sent.subject, "News digest - 2 items");
    assert!(sent.body.contains("Title n0"));
    assert!(sent.body.contains("https://example.com/n1"));
}

#[tokio::test]
async fn builtin_digest_stays_within_ntfy_message_limit() {
    let store = Arc::new(InMemoryItemStore::new());
    let d = FakeDispatcher::new();
    let c = composer(store.clone(), d.clone());
    for i in 0..60 {
        let mut item = common::news(&format!("long{i}"), "tech");
        item.title = format!("{i:02} {}", "Markets rally as central banks signal a pause ".repeat(2));
        item.summary = "Analysts expect volatility to persist through the quarter. ".repeat(8);
        store.append_to_window(item).await.unwrap();
    }

    let sent = c
        .compose_and_send(&Trigger::Threshold, &CategoryFilter::any(), &ntfy_channel("c1"), None)
        .await
        .unwrap();
    assert_eq!(sent, 60);
    assert_eq!(store.count_unpushed().await.unwrap(), 0);

    let out = &d.sends()[0];
    assert_eq!(out.subject, "News digest - 60 items");
    assert!(out.body.len() <= 4096, "digest is {} bytes", out.body.len());
    assert!(out.body.contains("**10. 09 "));
    assert!(!out.body.contains("**11. "));
    assert!(out.body.ends_with("...and 50 more"), "{}", out.body);
}
