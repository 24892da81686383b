use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use coldsync_core::models::{
    EnqueueOutcome, MediaSource, PoolScanState, PoolSyncOverview, QueueStats, RestoreProgress,
    SourceStats,
};
use coldsync_core::db::{Database, QueueContext};
use coldsync_core::services::{MediaEnqueue, MediaSyncService, PoolSyncService};
use coldsync_core::ReplicationRecord;
use hmac::{Hmac, Mac};
use http::{header, HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Fixed message both tokens are MACed over before comparison.
const ADMIN_TOKEN_CONTEXT: &[u8] = b"coldsync-admin-token";

const DEFAULT_FAILED_LIMIT: usize = 50;
const MAX_FAILED_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub media: MediaSyncService,
    pub pools: PoolSyncService,
}

impl AppState {
    pub fn new(config: Arc<ApiConfig>, db: Arc<Database>, ctx: QueueContext) -> Self {
        let targets = config.sync.build_targets();
        let pools = PoolSyncService::new(
            Arc::clone(&db),
            ctx.clone(),
            targets.nas.clone(),
            config.sync.pools.clone(),
        );
        let media = MediaSyncService::new(db, ctx, targets, config.sync.local_base_dir.clone());
        Self {
            config,
            media,
            pools,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let media_routes = Router::new()
        .route("/enqueue", post(enqueue_media))
        .route("/stats", get(media_stats))
        .route("/failed", get(media_failed))
        .route("/retry-failed", post(media_retry_failed))
        .route("/records/{id}/reset", post(media_reset))
        .route("/initial-sync", post(media_initial_sync))
        .route("/restore", post(start_restore).get(restore_progress));

    let pool_routes = Router::new()
        .route("/overview", get(pool_overview))
        .route("/scan-states", get(pool_scan_states))
        .route("/scan", post(pool_scan))
        .route("/retry-failed", post(pool_retry_failed))
        .route("/failed", get(pool_failed));

    let protected_routes = Router::new()
        .nest("/media-sync", media_routes)
        .nest("/pool-sync", pool_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    restore_running: bool,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        restore_running: state.media.restore_progress().running,
    })
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.config.admin_token.as_deref() {
        let token = extract_bearer_token(request.headers())?;
        if !admin_token_matches(token, expected) {
            return Err(AppError::unauthorized("Admin token is not valid"));
        }
    }
    Ok(next.run(request).await)
}

/// Constant-time comparison of HMAC tags over both tokens.
fn admin_token_matches(presented: &str, expected: &str) -> bool {
    let (Ok(mut expected_mac), Ok(mut presented_mac)) = (
        HmacSha256::new_from_slice(expected.as_bytes()),
        HmacSha256::new_from_slice(presented.as_bytes()),
    ) else {
        return false;
    };
    expected_mac.update(ADMIN_TOKEN_CONTEXT);
    presented_mac.update(ADMIN_TOKEN_CONTEXT);
    presented_mac
        .verify_slice(&expected_mac.finalize().into_bytes())
        .is_ok()
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

async fn enqueue_media(
    State(state): State<AppState>,
    Json(request): Json<MediaEnqueue>,
) -> Result<Json<EnqueueOutcome>, AppError> {
    let outcome = state
        .media
        .enqueue_media(&request)
        .await?
        .ok_or_else(|| AppError::conflict("No durable sync target is configured"))?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
struct MediaStatsResponse {
    #[serde(flatten)]
    totals: QueueStats,
    by_source: Vec<SourceStats>,
}

async fn media_stats(State(state): State<AppState>) -> Result<Json<MediaStatsResponse>, AppError> {
    Ok(Json(MediaStatsResponse {
        totals: state.media.stats().await?,
        by_source: state.media.stats_by_source().await?,
    }))
}

#[derive(Debug, Deserialize)]
struct MediaFailedQuery {
    source: Option<String>,
    limit: Option<usize>,
}

async fn media_failed(
    State(state): State<AppState>,
    Query(query): Query<MediaFailedQuery>,
) -> Result<Json<Vec<ReplicationRecord>>, AppError> {
    let source = parse_source(query.source.as_deref())?;
    let records = state
        .media
        .recent_failed(source, failed_limit(query.limit))
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
struct MediaRetryQuery {
    source: Option<String>,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: u64,
}

async fn media_retry_failed(
    State(state): State<AppState>,
    Query(query): Query<MediaRetryQuery>,
) -> Result<Json<CountResponse>, AppError> {
    let source = parse_source(query.source.as_deref())?;
    let count = state.media.retry_all_failed(source).await?;
    Ok(Json(CountResponse { count }))
}

async fn media_reset(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ReplicationRecord>, AppError> {
    Ok(Json(state.media.reset(id).await?))
}

async fn media_initial_sync(
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, AppError> {
    let count = state.media.run_initial_sync().await?;
    Ok(Json(CountResponse { count }))
}

async fn start_restore(State(state): State<AppState>) -> Result<Response, AppError> {
    if !state.media.targets().has_durable() {
        return Err(AppError::conflict("No durable sync target is configured"));
    }
    state.media.start_restore()?;
    tracing::info!("Bulk restore started");
    Ok((StatusCode::ACCEPTED, Json(state.media.restore_progress())).into_response())
}

async fn restore_progress(State(state): State<AppState>) -> Json<RestoreProgress> {
    Json(state.media.restore_progress())
}

async fn pool_overview(State(state): State<AppState>) -> Result<Json<PoolSyncOverview>, AppError> {
    Ok(Json(state.pools.overview().await?))
}

async fn pool_scan_states(
    State(state): State<AppState>,
) -> Result<Json<Vec<PoolScanState>>, AppError> {
    Ok(Json(state.pools.scan_states().await?))
}

#[derive(Debug, Deserialize)]
struct PoolQuery {
    pool: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ScanTriggered {
    pools: Vec<String>,
}

async fn pool_scan(
    State(state): State<AppState>,
    Query(query): Query<PoolQuery>,
) -> Result<Response, AppError> {
    let pools = state.pools.trigger_scan(query.pool.as_deref())?;
    Ok((StatusCode::ACCEPTED, Json(ScanTriggered { pools })).into_response())
}

async fn pool_retry_failed(
    State(state): State<AppState>,
    Query(query): Query<PoolQuery>,
) -> Result<Json<CountResponse>, AppError> {
    let count = state.pools.retry_failed(query.pool.as_deref()).await?;
    Ok(Json(CountResponse { count }))
}

async fn pool_failed(
    State(state): State<AppState>,
    Query(query): Query<PoolQuery>,
) -> Result<Json<Vec<ReplicationRecord>>, AppError> {
    let records = state
        .pools
        .recent_failed(query.pool.as_deref(), failed_limit(query.limit))
        .await?;
    Ok(Json(records))
}

fn parse_source(source: Option<&str>) -> Result<Option<MediaSource>, AppError> {
    source
        .map(|value| {
            value
                .parse::<MediaSource>()
                .map_err(|_| AppError::bad_request(format!("Unknown media source: {value}")))
        })
        .transpose()
}

fn failed_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_FAILED_LIMIT).clamp(1, MAX_FAILED_LIMIT)
}
