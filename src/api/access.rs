use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware::from_fn,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{auth::require_staff, AppState, AuthenticatedUser, RequestMeta};
use crate::api::{required_text, Page, Pagination};
use crate::error::{AppError, Result};
use crate::models::{
    access_log::{AccessDecision, AccessLog, AccessLogFilter, AccessStats},
    device::Device,
    user::User,
};
use crate::services::{
    access_control::{self, AccessResult},
    audit,
    qr_generator::{self, AccessTokenPayload, IssuedAccessToken},
    signature,
};

/// Header carrying the key handed out by device activation.
pub const DEVICE_KEY_HEADER: &str = "x-device-key";

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    token: String,
}

#[derive(Debug, Serialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
    qr_svg: String,
}

#[derive(Debug, Deserialize)]
struct ManualEntryRequest {
    device_id: Uuid,
    user_id: Uuid,
    decision: AccessDecision,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct AccessLogQuery {
    user_id: Option<Uuid>,
    device_id: Option<Uuid>,
    decision: Option<AccessDecision>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    device_id: Option<Uuid>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    stats: AccessStats,
    grant_rate: Option<String>,
}

/// Routes authenticated by device key rather than a user bearer token.
pub fn device_router() -> Router<AppState> {
    Router::new().route("/access/validate", post(validate))
}

pub fn router() -> Router<AppState> {
    let staff = Router::new()
        .route("/access/manual", post(manual_entry))
        .route("/access/logs", get(list_logs))
        .route("/access/stats", get(stats))
        .route_layer(from_fn(require_staff));

    Router::new()
        .route("/access/token", post(issue_token))
        .route("/access/token.png", get(token_png))
        .route("/access/logs/me", get(my_logs))
        .merge(staff)
}

/// Resolves the calling device from its key. Unknown keys are rejected before
/// anything is logged.
async fn authenticate_device(state: &AppState, headers: &HeaderMap) -> Result<Device> {
    let key = headers
        .get(DEVICE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing device key".to_string()))?;

    Device::find_by_key_hash(&state.pool, &signature::sha256_hex(key))
        .await?
        .ok_or_else(|| AppError::Unauthorized("Unknown device key".to_string()))
}

async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ValidateRequest>,
) -> Result<Json<AccessResult>> {
    let device = authenticate_device(&state, &headers).await?;

    let result = access_control::validate_access(
        &state.pool,
        &device,
        &body.token,
        state.config.qr_signing_key(),
        state.config.facility_utc_offset_minutes,
        Utc::now(),
    )
    .await?;

    Ok(Json(result))
}

async fn issue_for(state: &AppState, user: &AuthenticatedUser) -> Result<IssuedAccessToken> {
    let account = User::find_by_id(&state.pool, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    if !account.is_active() {
        return Err(AppError::Forbidden("Account is not active".to_string()));
    }

    let payload = AccessTokenPayload::new(account.id, Utc::now(), state.config.qr_token_ttl_seconds)?;
    let issued = payload.sign(state.config.qr_signing_key())?;

    tracing::debug!(user_id = %account.id, expires_at = %issued.expires_at, "Access token issued");
    Ok(issued)
}

async fn issue_token(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<AccessTokenResponse>> {
    let issued = issue_for(&state, &user).await?;
    let qr_svg = qr_generator::generate_qr_svg(&issued.token)?;

    Ok(Json(AccessTokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        qr_svg,
    }))
}

async fn token_png(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse> {
    let issued = issue_for(&state, &user).await?;
    let png = qr_generator::generate_qr_png(&issued.token)?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        png,
    ))
}

/// Staff-operated entry, e.g. a member who forgot their phone.
async fn manual_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<ManualEntryRequest>,
) -> Result<(StatusCode, Json<AccessLog>)> {
    let reason = required_text("reason", &body.reason)?;

    let device = Device::find_by_id(&state.pool, body.device_id)
        .await?
        .ok_or_else(|| AppError::not_found("Device"))?;
    User::find_by_id(&state.pool, body.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let log = access_control::record_manual_entry(
        &state.pool,
        &device,
        body.user_id,
        user.user_id,
        body.decision,
        reason,
    )
    .await?;

    audit::record(
        &state.pool,
        &meta.audit(&user),
        "access.manual",
        Some(log.id),
        Some(json!({
            "device_id": device.id,
            "user_id": body.user_id,
            "decision": body.decision,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(log)))
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<AccessLogQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<AccessLog>>> {
    let filter = AccessLogFilter {
        user_id: query.user_id,
        device_id: query.device_id,
        decision: query.decision,
        from: query.from,
        to: query.to,
    };
    let logs = AccessLog::list(&state.pool, &filter, pagination.limit(), pagination.offset()).await?;

    Ok(Json(Page::new(logs, pagination)))
}

async fn my_logs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<AccessLog>>> {
    let filter = AccessLogFilter {
        user_id: Some(user.user_id),
        ..Default::default()
    };
    let logs = AccessLog::list(&state.pool, &filter, pagination.limit(), pagination.offset()).await?;

    Ok(Json(Page::new(logs, pagination)))
}

async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from >= to {
            return Err(AppError::Validation("from must be before to".to_string()));
        }
    }

    let stats = AccessLog::stats(&state.pool, query.device_id, query.from, query.to).await?;
    Ok(Json(StatsResponse {
        grant_rate: stats.grant_rate_label(),
        stats,
    }))
}
