//! newsdesk — binary entrypoint.
//! Loads config, starts the background triggers and serves the admin API on Shuttle.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsdesk::AppConfig;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("compose=info,monitor=info,schedule=info,notify=info,catalog=info,api=info,warn")
    });
    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may have installed a subscriber already; keep the first one.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    let cfg = AppConfig::load()?;
    init_tracing(cfg.log_json);
    tracing::info!(?cfg, "starting newsdesk");

    let state = newsdesk::build_state(&cfg)?;
    newsdesk::spawn_background(&state, &cfg);
    let router = newsdesk::app(state)?;

    Ok(router.into())
}
