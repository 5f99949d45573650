//! HTTP surface over the queue, session manager, and browser pool.
//!
//! The admin routes are gated twice: by a shared-secret header, and by not
//! being registered at all when the service runs in production mode.

use crate::browser_pool::BrowserPool;
use crate::extractor::CookieBag;
use crate::queue::{EnqueueOptions, Priority, ScrapeQueue, StatusTag};
use crate::session::{SessionManager, ValidationOptions};
use crate::utils::{parse_item_target, sanitize_log};
use crate::{Config, ErrorKind, ScrapeError};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<ScrapeQueue>,
    pub sessions: Arc<SessionManager>,
    pub pool: Arc<BrowserPool>,
    pub config: Arc<Config>,
    pub metrics_handle: Option<PrometheusHandle>,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(render_metrics))
        .route("/scrape/:target", post(scrape))
        .route("/sync/sessions", get(list_sessions))
        .route("/sync/sessions/:id", delete(delete_session))
        .route("/sync/sessions/:id/resume", post(resume_session))
        .route("/sync/sessions/:id/cancel-failed", post(cancel_failed))
        .route("/sync/sessions/:id/diagnose", get(diagnose_session));

    if state.config.production {
        info!("production mode: admin routes not registered");
    } else {
        router = router
            .route("/reset-pool", post(reset_pool))
            .route("/sync/queue/reset", post(reset_queue));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

pub async fn serve(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, router).await?;
    Ok(())
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ScrapeError> for ApiError {
    fn from(error: ScrapeError) -> Self {
        let status = match error.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AuthRequired => StatusCode::UNAUTHORIZED,
            ErrorKind::NotAccessible => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Cancelled => StatusCode::CONFLICT,
            ErrorKind::Network | ErrorKind::Unknown => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, error.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScrapeRequestBody {
    priority: Option<Priority>,
    status: Option<StatusTag>,
    cookies: Option<BTreeMap<String, String>>,
    session_id: Option<String>,
    user_id: Option<String>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScrapeQuery {
    wait: bool,
}

async fn scrape(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Query(query): Query<ScrapeQuery>,
    body: Option<Json<ScrapeRequestBody>>,
) -> Result<Response, ApiError> {
    let item_id = parse_item_target(&target).ok_or_else(|| {
        warn!("rejected scrape target {}", sanitize_log(&target));
        ApiError::bad_request("target must be an item id or an item URL on the target domain")
    })?;

    let body = body.map(|Json(b)| b).unwrap_or_default();
    let cookies = body.cookies.map(CookieBag);

    // Credentialed requests are validated up front so obviously broken
    // cookie bags fail fast instead of burning a scrape slot.
    if let (Some(bag), Some(session_id)) = (&cookies, &body.session_id) {
        let validation = state
            .sessions
            .is_valid(
                session_id,
                bag,
                ValidationOptions {
                    user_id: body.user_id.clone(),
                    ..Default::default()
                },
            )
            .await;
        if !validation.valid {
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                validation
                    .reason
                    .unwrap_or_else(|| "session cookies failed validation".to_string()),
            ));
        }
    }

    let options = EnqueueOptions {
        priority: body.priority.unwrap_or_default(),
        status: body.status,
        cookies,
        session_id: body.session_id,
        user_id: body.user_id,
        max_retries: body.max_retries,
    };

    let result = state.queue.enqueue(&item_id, options);

    if query.wait {
        let outcome = result
            .receiver
            .await
            .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "queue dropped the request"))?;
        let record = outcome.map_err(ApiError::from)?;
        return Ok(Json(json!({ "id": result.id, "record": record })).into_response());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": result.id,
            "deduplicated": result.deduplicated,
            "position": result.position,
        })),
    )
        .into_response())
}

async fn health(State(state): State<AppState>) -> Response {
    let pool = state.pool.get_health().await;
    let queue = state.queue.status();
    let paused_sessions = state
        .sessions
        .sessions_snapshot()
        .iter()
        .filter(|s| s.paused)
        .count();

    let healthy = pool.initialized && pool.warnings.is_empty();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "healthy": healthy,
            "pool": pool,
            "queue": queue,
            "paused_sessions": paused_sessions,
        })),
    )
        .into_response()
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "queue": state.queue.status() }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (
            StatusCode::NOT_IMPLEMENTED,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "sessions": state.sessions.sessions_snapshot() }))
}

async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    state.queue.resume_session(&session_id);
    Json(json!({ "resumed": session_id }))
}

async fn cancel_failed(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let cancelled = state.queue.cancel_failed_items(&session_id);
    Json(json!({ "session": session_id, "cancelled": cancelled }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let cancelled = state.queue.cancel_all_for_session(&session_id);
    Json(json!({ "session": session_id, "cancelled": cancelled }))
}

async fn diagnose_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let diagnosis = state.sessions.diagnose(&session_id).await;
    Json(json!({ "session": session_id, "diagnosis": diagnosis }))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or_else(|| ApiError::new(StatusCode::FORBIDDEN, "admin token not configured"))?;

    let supplied = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if supplied == expected {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}

async fn reset_pool(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;

    state.pool.close_all().await;
    state
        .pool
        .initialize()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "reset": "pool" })))
}

async fn reset_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;

    state.queue.clear();
    Ok(Json(json!({ "reset": "queue" })))
}
