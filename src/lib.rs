// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod api;
pub mod catalog;
pub mod compose;
pub mod config;
pub mod error;
pub mod history;
pub mod jobs;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod schedule;
pub mod store;
pub mod template;

use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;

pub use crate::api::{router, AppState};
pub use crate::compose::{BatchComposer, Trigger};
pub use crate::config::AppConfig;

use crate::catalog::Catalog;
use crate::notify::{ChannelDispatcher, Dispatcher};
use crate::schedule::ScheduleCfg;
use crate::store::InMemoryItemStore;

/// Build the production state: in-memory reading window, catalog loaded from the
/// configured snapshot, SMTP/HTTP dispatcher.
pub fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let catalog = match cfg.catalog_path.as_deref() {
        Some(path) => Catalog::open(path)?,
        None => Catalog::in_memory(),
    };
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(ChannelDispatcher::new(cfg.dispatch_timeout()));
    Ok(AppState::new(
        Arc::new(InMemoryItemStore::new()),
        Arc::new(catalog),
        dispatcher,
        cfg.dispatch_timeout(),
    ))
}

/// Start the threshold monitor and the schedule runner loops.
pub fn spawn_background(state: &AppState, cfg: &AppConfig) -> Vec<JoinHandle<()>> {
    vec![
        state.monitor.clone().spawn(cfg.monitor_interval()),
        state.runner.clone().spawn(ScheduleCfg {
            tick_secs: cfg.schedule_tick_secs,
        }),
    ]
}

/// Full HTTP app: API routes plus `/metrics`.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    let metrics = crate::metrics::Metrics::init()?;
    Ok(router(state).merge(metrics.router()))
}
