// src/api.rs
//! Admin/producer HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::catalog::{Catalog, ChannelDraft, TaskDraft, TemplateDraft};
use crate::compose::BatchComposer;
use crate::error::{CatalogError, ComposeError, DeliveryError, StoreError};
use crate::jobs::JobTracker;
use crate::model::{
    AutoPushConfig, CategoryFilter, EntryId, NewsItem, ReadingWindowEntry, ScheduledTask,
};
use crate::monitor::ThresholdMonitor;
use crate::notify::Dispatcher;
use crate::schedule::{CronSchedule, ScheduleRunner};
use crate::store::{ItemStore, PushedFilter, WindowQuery};
use crate::template::{self, BatchContext, Escaping};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ItemStore>,
    pub catalog: Arc<Catalog>,
    pub composer: Arc<BatchComposer>,
    pub monitor: Arc<ThresholdMonitor>,
    pub runner: Arc<ScheduleRunner>,
    pub jobs: Arc<JobTracker>,
    dispatch_timeout: Duration,
}

impl AppState {
    /// Wire the push core around one store, one catalog and one dispatcher.
    pub fn new(
        store: Arc<dyn ItemStore>,
        catalog: Arc<Catalog>,
        dispatcher: Arc<dyn Dispatcher>,
        dispatch_timeout: Duration,
    ) -> Self {
        let composer = Arc::new(BatchComposer::new(
            store.clone(),
            dispatcher,
            dispatch_timeout,
        ));
        Self {
            monitor: Arc::new(ThresholdMonitor::new(catalog.clone(), composer.clone())),
            runner: Arc::new(ScheduleRunner::new(catalog.clone(), composer.clone())),
            jobs: Arc::new(JobTracker::new()),
            store,
            catalog,
            composer,
            dispatch_timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/reading", get(list_reading).post(append_reading))
        .route("/api/reading/clear-pushed", post(clear_pushed))
        .route("/api/reading/{id}/remove", post(remove_reading))
        .route("/api/channels", get(list_channels).post(create_channel))
        .route(
            "/api/channels/{id}",
            put(update_channel).delete(delete_channel),
        )
        .route("/api/channels/{id}/test", post(test_channel))
        .route("/api/templates", get(list_templates).post(create_template))
        .route("/api/templates/preview", post(preview_template))
        .route(
            "/api/templates/{id}",
            put(update_template).delete(delete_template),
        )
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{id}", put(update_task).delete(delete_task))
        .route("/api/tasks/{id}/run", post(run_task))
        .route("/api/jobs/{id}", get(get_job))
        .route(
            "/api/auto-push/config",
            get(get_auto_push).post(set_auto_push),
        )
        .route("/api/auto-push/status", get(auto_push_status))
        .route("/api/reconciliation", get(reconciliation))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---- errors ----

pub enum ApiError {
    Compose(ComposeError),
    Catalog(CatalogError),
    Store(StoreError),
    BadRequest(String),
}

impl From<ComposeError> for ApiError {
    fn from(e: ComposeError) -> Self {
        ApiError::Compose(e)
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        ApiError::Catalog(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<crate::error::NotFound> for ApiError {
    fn from(e: crate::error::NotFound) -> Self {
        ApiError::Compose(e.into())
    }
}

fn store_status(e: &StoreError) -> (StatusCode, &'static str) {
    match e {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        StoreError::AlreadyPushed(_) => (StatusCode::CONFLICT, "already_pushed"),
        StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Compose(e) => {
                let status = match e {
                    ComposeError::Config(_) | ComposeError::Compile(_) | ComposeError::Render(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    ComposeError::NotFound(_) => StatusCode::NOT_FOUND,
                    ComposeError::Delivery(_) => StatusCode::BAD_GATEWAY,
                    ComposeError::Store(s) => store_status(s).0,
                    ComposeError::Reconciliation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::Catalog(e) => {
                let (status, kind) = match e {
                    CatalogError::Config(_) => (StatusCode::BAD_REQUEST, "config"),
                    CatalogError::Compile(_) => (StatusCode::BAD_REQUEST, "compile"),
                    CatalogError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid"),
                    CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    CatalogError::InUse { .. } => (StatusCode::CONFLICT, "in_use"),
                };
                (status, kind, e.to_string())
            }
            ApiError::Store(e) => {
                let (status, kind) = store_status(e);
                (status, kind, e.to_string())
            }
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.clone()),
        };
        if status.is_server_error() {
            tracing::warn!(target: "api", %status, kind, %message, "request failed");
        }
        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---- reading window ----

#[derive(Deserialize)]
struct ReadingQuery {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    pushed: PushedFilter,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

#[derive(Serialize)]
struct ReadingPage {
    items: Vec<ReadingWindowEntry>,
    total: usize,
    unpushed_count: usize,
}

async fn list_reading(
    State(state): State<AppState>,
    Query(q): Query<ReadingQuery>,
) -> ApiResult<Json<ReadingPage>> {
    let query = WindowQuery {
        category: q.category.filter(|c| !c.trim().is_empty()),
        pushed: q.pushed,
        limit: q.limit.unwrap_or(50).clamp(1, 200),
        offset: q.offset,
    };
    Ok(Json(ReadingPage {
        items: state.store.list(&query).await?,
        total: state.store.count_total().await?,
        unpushed_count: state.store.count_unpushed().await?,
    }))
}

async fn append_reading(
    State(state): State<AppState>,
    Json(item): Json<NewsItem>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if item.title.trim().is_empty() || item.url.trim().is_empty() {
        return Err(ApiError::BadRequest("title and url are required".into()));
    }
    let id = state.store.append_to_window(item).await?;
    state.monitor.poke();
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn remove_reading(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.store.remove(EntryId(id)).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn clear_pushed(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.store.clear_pushed().await?;
    tracing::info!(target: "api", removed, "cleared pushed entries");
    Ok(Json(json!({ "removed": removed })))
}

// ---- channels ----

async fn list_channels(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.channels())
}

async fn create_channel(
    State(state): State<AppState>,
    Json(draft): Json<ChannelDraft>,
) -> ApiResult<impl IntoResponse> {
    let ch = state.catalog.create_channel(draft)?;
    Ok((StatusCode::CREATED, Json(ch)))
}

async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<ChannelDraft>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.update_channel(&id, draft)?))
}

async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.catalog.delete_channel(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Synchronous test send; leaves the reading window alone.
async fn test_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let channel = state.catalog.channel(&id)?;
    let dispatcher = state.composer.dispatcher();
    let res = match tokio::time::timeout(state.dispatch_timeout, dispatcher.test(&channel)).await {
        Ok(r) => r,
        Err(_) => Err(DeliveryError::Timeout(state.dispatch_timeout)),
    };
    match res {
        Ok(()) => {
            tracing::info!(target: "api", channel = %channel.id, "channel test sent");
            Ok(Json(json!({ "ok": true })))
        }
        Err(e) => {
            tracing::warn!(target: "api", channel = %channel.id, error = %e, "channel test failed");
            Err(ComposeError::from(e).into())
        }
    }
}

// ---- templates ----

async fn list_templates(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.templates())
}

async fn create_template(
    State(state): State<AppState>,
    Json(draft): Json<TemplateDraft>,
) -> ApiResult<impl IntoResponse> {
    let t = state.catalog.create_template(draft)?;
    Ok((StatusCode::CREATED, Json(t)))
}

async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<TemplateDraft>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.update_template(&id, draft)?))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.catalog.delete_template(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PreviewReq {
    #[serde(default)]
    subject: Option<String>,
    body: String,
    /// `email` (HTML escaping, the default), `ntfy` or `webhook`.
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    categories: CategoryFilter,
}

#[derive(Serialize)]
struct PreviewResp {
    subject: String,
    body: String,
    count: usize,
    /// Rendered against placeholder items because nothing matched in the window.
    sample: bool,
}

/// Render a draft against the current unpushed entries without sending or marking anything.
async fn preview_template(
    State(state): State<AppState>,
    Json(req): Json<PreviewReq>,
) -> ApiResult<Json<PreviewResp>> {
    let escaping = match req.channel_type.as_deref() {
        None | Some("email") => Escaping::Html,
        Some("ntfy") | Some("webhook") => Escaping::Plain,
        Some(other) => {
            return Err(ApiError::BadRequest(format!("unknown channel type `{other}`")))
        }
    };
    let body_tpl = template::compile_with(&req.body, escaping).map_err(ComposeError::from)?;
    let subject_tpl = template::compile_with(
        req.subject.as_deref().unwrap_or(template::defaults::EMAIL_SUBJECT),
        Escaping::Plain,
    )
    .map_err(ComposeError::from)?;

    let filter = CategoryFilter::of(req.categories.tags());
    let entries = state.store.list_unpushed(&filter).await?;
    let sample = entries.is_empty();
    let ctx = if sample {
        BatchContext::new(template::sample_items(), Utc::now())
    } else {
        BatchContext::from_entries(&entries, Utc::now())
    };

    let (body, count) = template::render(&body_tpl, &ctx).map_err(ComposeError::from)?;
    let (subject, _) = template::render(&subject_tpl, &ctx).map_err(ComposeError::from)?;
    Ok(Json(PreviewResp {
        subject,
        body,
        count,
        sample,
    }))
}

// ---- scheduled tasks ----

#[derive(Serialize)]
struct TaskView {
    #[serde(flatten)]
    task: ScheduledTask,
    /// Next firing minute (UTC); absent for disabled tasks.
    next_run_at: Option<DateTime<Utc>>,
}

async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let views: Vec<TaskView> = state
        .catalog
        .tasks()
        .into_iter()
        .map(|task| {
            let next_run_at = task
                .enabled
                .then(|| CronSchedule::parse(&task.cron_expr).ok())
                .flatten()
                .and_then(|c| c.next_after(now));
            TaskView { task, next_run_at }
        })
        .collect();
    Json(views)
}

async fn create_task(
    State(state): State<AppState>,
    Json(draft): Json<TaskDraft>,
) -> ApiResult<impl IntoResponse> {
    let t = state.catalog.create_task(draft)?;
    Ok((StatusCode::CREATED, Json(t)))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<TaskDraft>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.update_task(&id, draft)?))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.catalog.delete_task(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accept a manual run and finish it in the background; poll `/api/jobs/{id}`.
async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let task = state.catalog.task(&id)?;
    let job = state.jobs.create(&task.id);

    let runner = state.runner.clone();
    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        jobs.start(job);
        let res = runner.run_now(&task.id).await;
        jobs.finish(job, &res);
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job }))))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    state
        .jobs
        .get(id)
        .map(Json)
        .ok_or_else(|| crate::error::NotFound::new("job", id.to_string()).into())
}

// ---- auto-push ----

async fn get_auto_push(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.auto_push())
}

async fn set_auto_push(
    State(state): State<AppState>,
    Json(cfg): Json<AutoPushConfig>,
) -> ApiResult<impl IntoResponse> {
    let saved = state.catalog.set_auto_push(cfg)?;
    // a lowered threshold may already be met
    state.monitor.poke();
    Ok(Json(saved))
}

async fn auto_push_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.status().await?))
}

// ---- reconciliation ----

async fn reconciliation(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.composer.reconciliation().snapshot_last_n(100))
}
