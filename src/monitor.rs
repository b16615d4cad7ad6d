// src/monitor.rs
//! Threshold auto-push.
//!
//! State machine: `IDLE -> TRIGGERING -> IDLE`. A check that finds auto-push enabled
//! with a channel set and at least `threshold` unpushed entries flips to TRIGGERING and composes with no
//! category filter. Checks that arrive while a composition is in flight are
//! suppressed. The monitor wakes on a ticker and whenever an item is appended.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::catalog::Catalog;
use crate::compose::{BatchComposer, Trigger};
use crate::error::ComposeError;
use crate::model::CategoryFilter;

const IDLE: u8 = 0;
const TRIGGERING: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Triggering,
}

/// What a single check decided.
#[derive(Debug)]
pub enum MonitorOutcome {
    Disabled,
    /// Enabled, but no channel to push to yet.
    NoChannel,
    BelowThreshold { count: usize, threshold: usize },
    /// Another composition from this monitor is in flight.
    Suppressed,
    Composed(Result<usize, ComposeError>),
}

/// Snapshot served by `/api/auto-push/status`.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub enabled: bool,
    pub threshold: usize,
    pub pending_count: usize,
    /// Enough unpushed entries to fire on the next check.
    pub ready: bool,
    pub state: MonitorState,
}

pub struct ThresholdMonitor {
    catalog: Arc<Catalog>,
    composer: Arc<BatchComposer>,
    state: AtomicU8,
    wake: Notify,
}

/// Resets the state to IDLE when the composition ends, including on panic or cancellation.
struct Release<'a>(&'a AtomicU8);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::Release);
    }
}

impl ThresholdMonitor {
    pub fn new(catalog: Arc<Catalog>, composer: Arc<BatchComposer>) -> Self {
        Self {
            catalog,
            composer,
            state: AtomicU8::new(IDLE),
            wake: Notify::new(),
        }
    }

    pub fn state(&self) -> MonitorState {
        match self.state.load(Ordering::Acquire) {
            TRIGGERING => MonitorState::Triggering,
            _ => MonitorState::Idle,
        }
    }

    /// Ask the background loop to check now (called after an append).
    pub fn poke(&self) {
        self.wake.notify_one();
    }

    pub async fn status(&self) -> Result<MonitorStatus, ComposeError> {
        let cfg = self.catalog.auto_push();
        let pending_count = self.composer.store().count_unpushed().await?;
        Ok(MonitorStatus {
            enabled: cfg.enabled,
            threshold: cfg.threshold,
            pending_count,
            ready: cfg.enabled && cfg.channel_id.is_some() && pending_count >= cfg.threshold,
            state: self.state(),
        })
    }

    /// Run one check.
    pub async fn check(&self) -> MonitorOutcome {
        if self.state.load(Ordering::Acquire) == TRIGGERING {
            return MonitorOutcome::Suppressed;
        }

        let cfg = self.catalog.auto_push();
        if !cfg.enabled {
            return MonitorOutcome::Disabled;
        }
        let Some(channel_id) = cfg.channel_id.as_deref() else {
            tracing::debug!(target: "monitor", "auto-push enabled without a channel");
            return MonitorOutcome::NoChannel;
        };

        let count = match self.composer.store().count_unpushed().await {
            Ok(n) => n,
            Err(e) => return MonitorOutcome::Composed(Err(e.into())),
        };
        if count < cfg.threshold {
            tracing::debug!(target: "monitor", count, threshold = cfg.threshold, "below threshold");
            return MonitorOutcome::BelowThreshold {
                count,
                threshold: cfg.threshold,
            };
        }

        if self
            .state
            .compare_exchange(IDLE, TRIGGERING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return MonitorOutcome::Suppressed;
        }
        let _release = Release(&self.state);

        tracing::info!(target: "monitor", count, threshold = cfg.threshold, "threshold reached");
        counter!("monitor_triggers_total").increment(1);

        let res = match self.catalog.resolve(channel_id, cfg.template_id.as_deref()) {
            Ok((channel, template)) => {
                self.composer
                    .compose_and_send(
                        &Trigger::Threshold,
                        &CategoryFilter::any(),
                        &channel,
                        template.as_ref(),
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match &res {
            Ok(sent) => tracing::info!(target: "monitor", sent, "auto-push finished"),
            Err(e) => tracing::warn!(target: "monitor", kind = e.kind(), error = %e, "auto-push failed"),
        }
        MonitorOutcome::Composed(res)
    }

    /// Background loop: checks on every tick and on every [`poke`](Self::poke).
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.wake.notified() => {}
                }
                self.check().await;
            }
        })
    }
}
