// src/compose.rs
//! The batch composer: the only code path that turns unpushed entries into a sent
//! message and flips them to pushed.
//!
//! Every composition runs under one process-wide lock, so two triggers can never
//! select the same unpushed entry. Delivery happens before the pushed transition:
//! a failed send leaves the window untouched, and a successful send whose
//! transition fails is logged for reconciliation instead of being retried.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::Mutex;

use crate::error::{ComposeError, DeliveryError};
use crate::history::{ReconciliationLog, ReconciliationRecord};
use crate::model::{CategoryFilter, EntryId, TemplateRecord};
use crate::notify::{Channel, Dispatcher};
use crate::store::ItemStore;
use crate::template::{self, BatchContext, Escaping};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("compose_runs_total", "Compositions started, by trigger.");
        describe_counter!(
            "compose_items_pushed_total",
            "Reading-window entries delivered and marked pushed."
        );
        describe_counter!(
            "compose_failures_total",
            "Compositions that ended in an error, by kind."
        );
        describe_gauge!(
            "reading_window_unpushed",
            "Unpushed entries after the last composition."
        );
    });
}

/// What started a composition. Used for logs, metrics and the reconciliation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Threshold,
    Schedule { task_id: String },
    Manual { task_id: String },
}

impl Trigger {
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Threshold => "threshold",
            Trigger::Schedule { .. } => "schedule",
            Trigger::Manual { .. } => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Threshold => f.write_str("threshold"),
            Trigger::Schedule { task_id } => write!(f, "schedule:{task_id}"),
            Trigger::Manual { task_id } => write!(f, "manual:{task_id}"),
        }
    }
}

pub struct BatchComposer {
    store: Arc<dyn ItemStore>,
    dispatcher: Arc<dyn Dispatcher>,
    lock: Mutex<()>,
    dispatch_timeout: Duration,
    reconciliation: ReconciliationLog,
}

impl BatchComposer {
    pub fn new(
        store: Arc<dyn ItemStore>,
        dispatcher: Arc<dyn Dispatcher>,
        dispatch_timeout: Duration,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            dispatcher,
            lock: Mutex::new(()),
            dispatch_timeout,
            reconciliation: ReconciliationLog::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn reconciliation(&self) -> &ReconciliationLog {
        &self.reconciliation
    }

    /// Select every unpushed entry matching `filter`, render it with `template` (or the
    /// channel's built-in template), send it, then mark exactly those entries pushed.
    ///
    /// Returns the number of entries delivered; `Ok(0)` means nothing matched and
    /// nothing was sent.
    pub async fn compose_and_send(
        &self,
        trigger: &Trigger,
        filter: &CategoryFilter,
        channel: &Channel,
        template: Option<&TemplateRecord>,
    ) -> Result<usize, ComposeError> {
        counter!("compose_runs_total", "trigger" => trigger.label()).increment(1);
        let res = self.compose_locked(trigger, filter, channel, template).await;
        match &res {
            Ok(0) => {}
            Ok(n) => {
                counter!("compose_items_pushed_total").increment(*n as u64);
            }
            Err(e) => {
                counter!("compose_failures_total", "kind" => e.kind()).increment(1);
            }
        }
        res
    }

    async fn compose_locked(
        &self,
        trigger: &Trigger,
        filter: &CategoryFilter,
        channel: &Channel,
        template: Option<&TemplateRecord>,
    ) -> Result<usize, ComposeError> {
        let _guard = self.lock.lock().await;

        let entries = self.store.list_unpushed(filter).await?;
        if entries.is_empty() {
            tracing::debug!(target: "compose", %trigger, filter = %filter, "nothing to push");
            return Ok(0);
        }

        let (subject_src, body_src) = match template {
            Some(t) => (
                t.subject
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(channel.kind.default_template().0),
                t.body.as_str(),
            ),
            None => channel.kind.default_template(),
        };
        let body_tpl = template::compile_with(body_src, channel.kind.escaping())?;
        let subject_tpl = template::compile_with(subject_src, Escaping::Plain)?;

        let ctx = BatchContext::from_entries(&entries, Utc::now());
        let (body, count) = template::render(&body_tpl, &ctx)?;
        let (subject, _) = template::render(&subject_tpl, &ctx)?;
        let subject = single_line(&subject);

        tracing::info!(
            target: "compose",
            %trigger,
            channel = %channel.id,
            items = count,
            "dispatching batch"
        );
        match tokio::time::timeout(
            self.dispatch_timeout,
            self.dispatcher.send(channel, &subject, &body),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(target: "compose", %trigger, channel = %channel.id, error = %e, "delivery failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(target: "compose", %trigger, channel = %channel.id, "delivery timed out");
                return Err(DeliveryError::Timeout(self.dispatch_timeout).into());
            }
        }

        let ids: Vec<EntryId> = entries.iter().map(|e| e.id).collect();
        if let Err(source) = self.store.mark_pushed(&ids, Utc::now()).await {
            tracing::error!(
                target: "compose",
                %trigger,
                channel = %channel.id,
                entries = ?ids,
                error = %source,
                "batch delivered but mark-pushed failed; entries may be resent"
            );
            self.reconciliation.push(ReconciliationRecord {
                at: Utc::now(),
                trigger: trigger.to_string(),
                channel_id: channel.id.clone(),
                entry_ids: ids,
                error: source.to_string(),
            });
            return Err(ComposeError::Reconciliation {
                delivered: count,
                source,
            });
        }

        if let Ok(left) = self.store.count_unpushed().await {
            gauge!("reading_window_unpushed").set(left as f64);
        }
        tracing::info!(target: "compose", %trigger, channel = %channel.id, items = count, "batch pushed");
        Ok(count)
    }
}

/// Subjects are header values: collapse whitespace and line breaks.
fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
