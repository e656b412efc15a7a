//! HTTP endpoints of the viewer engine.
//!
//! Routes are served at the root (`/viewers`, `/subscribe`, …); the OpenAPI
//! description is published under `/swagger-ui/viewers`.

use crate::context::ViewersContext;
use crate::snapshot::ChannelViewers;
use crate::sse::{self, subscribe_sse};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use tvguide::{GuideStats, NowPlaying};
use utoipa::ToSchema;

const SERVICE_NAME: &str = "tvpulse";

/// Body of `/subscribe-webhook` and `/unsubscribe-webhook`
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct WebhookRequest {
    #[serde(default)]
    #[schema(example = "https://example.org/hooks/viewers")]
    pub url: Option<String>,
}

impl WebhookRequest {
    /// Lenient parsing: a missing or malformed body reads as `{}`.
    fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    fn url(&self) -> &str {
        self.url.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscribeResponse {
    pub ok: bool,
    pub subscribed: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnsubscribeResponse {
    pub ok: bool,
    pub unsubscribed: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub message: String,
    pub count: usize,
    pub programs: Vec<NowPlaying>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub service: String,
}

/// Database part of `/status`
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusStats {
    /// `connected`, `not_found` or `error`
    pub database: String,
    pub guide: Option<GuideStats>,
    pub stream_subscribers: usize,
    pub webhooks: usize,
    pub last_snapshot_seq: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub status: String,
    pub timestamp: String,
    pub stats: StatusStats,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Latest viewer snapshot
#[utoipa::path(
    get,
    path = "/viewers",
    responses(
        (status = 200, description = "Latest per-channel viewer counts", body = [ChannelViewers])
    ),
    tag = "viewers"
)]
pub async fn get_viewers(State(ctx): State<Arc<ViewersContext>>) -> impl IntoResponse {
    let snapshot = ctx.latest();
    (
        [(header::CONTENT_TYPE, "application/json")],
        snapshot.body().to_string(),
    )
}

/// Register a webhook receiving every snapshot
#[utoipa::path(
    post,
    path = "/subscribe-webhook",
    request_body = WebhookRequest,
    responses(
        (status = 200, description = "Webhook registered", body = SubscribeResponse),
        (status = 400, description = "Not an absolute http(s) URL", body = ErrorResponse)
    ),
    tag = "viewers"
)]
pub async fn subscribe_webhook(State(ctx): State<Arc<ViewersContext>>, body: Bytes) -> Response {
    let request = WebhookRequest::from_body(&body);
    match ctx.registry().register_webhook(request.url()) {
        Ok(url) => Json(SubscribeResponse {
            ok: true,
            subscribed: url,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Remove a webhook (unknown URLs are accepted)
#[utoipa::path(
    post,
    path = "/unsubscribe-webhook",
    request_body = WebhookRequest,
    responses(
        (status = 200, description = "Webhook removed", body = UnsubscribeResponse)
    ),
    tag = "viewers"
)]
pub async fn unsubscribe_webhook(
    State(ctx): State<Arc<ViewersContext>>,
    body: Bytes,
) -> Json<UnsubscribeResponse> {
    let request = WebhookRequest::from_body(&body);
    let url = ctx.registry().unregister_webhook(request.url());
    Json(UnsubscribeResponse {
        ok: true,
        unsubscribed: url,
    })
}

/// Programs currently airing (or next) per channel
#[utoipa::path(
    get,
    path = "/now-playing",
    responses(
        (status = 200, description = "Now-playing projection", body = [NowPlaying])
    ),
    tag = "programs"
)]
pub async fn get_now_playing(State(ctx): State<Arc<ViewersContext>>) -> Json<Vec<NowPlaying>> {
    Json(ctx.now_playing().as_ref().clone())
}

/// Force a now-playing refresh
#[utoipa::path(
    get,
    path = "/refresh",
    responses(
        (status = 200, description = "Projection after the refresh attempt", body = RefreshResponse)
    ),
    tag = "programs"
)]
pub async fn refresh_now_playing(State(ctx): State<Arc<ViewersContext>>) -> Json<RefreshResponse> {
    let (message, programs) = match ctx.refresh_programs(Local::now()).await {
        Ok(programs) => ("Now playing data refreshed", programs),
        Err(_) => (
            "Program guide unavailable, keeping previous data",
            ctx.now_playing(),
        ),
    };

    Json(RefreshResponse {
        message: message.to_string(),
        count: programs.len(),
        programs: programs.as_ref().clone(),
    })
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "service"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Local::now().to_rfc3339(),
        service: SERVICE_NAME.to_string(),
    })
}

/// Service summary and guide database statistics
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Service summary", body = StatusResponse),
        (status = 500, description = "Database could not be read", body = StatusResponse)
    ),
    tag = "service"
)]
pub async fn status(State(ctx): State<Arc<ViewersContext>>) -> Response {
    let (code, database, guide) = match ctx.programs().stats().await {
        Ok(stats) => (StatusCode::OK, "connected", Some(stats)),
        Err(tvguide::Error::DatabaseMissing(_)) => (StatusCode::OK, "not_found", None),
        Err(e) => {
            warn!(error = %e, "cannot read guide statistics");
            (StatusCode::INTERNAL_SERVER_ERROR, "error", None)
        }
    };

    let body = StatusResponse {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: if code.is_success() { "operational" } else { "error" }.to_string(),
        timestamp: Local::now().to_rfc3339(),
        stats: StatusStats {
            database: database.to_string(),
            guide,
            stream_subscribers: ctx.registry().stream_count(),
            webhooks: ctx.registry().webhooks().len(),
            last_snapshot_seq: ctx.latest().seq(),
        },
    };

    (code, Json(body)).into_response()
}

/// Router exposing every viewer and program endpoint at the root.
pub fn create_router(ctx: Arc<ViewersContext>) -> Router {
    Router::new()
        .route("/viewers", get(get_viewers))
        .route("/subscribe", get(subscribe_sse))
        .route("/subscribe-webhook", post(subscribe_webhook))
        .route("/unsubscribe-webhook", post(unsubscribe_webhook))
        .route("/now-playing", get(get_now_playing))
        .route("/refresh", get(refresh_now_playing))
        .route("/health", get(health_check))
        .route("/status", get(status))
        .with_state(ctx)
}

/// API OpenAPI du moteur d'audiences
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        get_viewers,
        sse::subscribe_sse,
        subscribe_webhook,
        unsubscribe_webhook,
        get_now_playing,
        refresh_now_playing,
        health_check,
        status,
    ),
    components(
        schemas(
            ChannelViewers,
            NowPlaying,
            GuideStats,
            WebhookRequest,
            SubscribeResponse,
            UnsubscribeResponse,
            ErrorResponse,
            RefreshResponse,
            HealthResponse,
            StatusStats,
            StatusResponse,
        )
    ),
    tags(
        (name = "viewers", description = "Live viewer counts: pull, SSE and webhooks"),
        (name = "programs", description = "Now-playing projection of the program guide"),
        (name = "service", description = "Health and status")
    )
)]
pub struct ViewersApiDoc;
