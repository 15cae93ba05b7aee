use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{auth::require_staff, AppState, AuthenticatedUser, RequestMeta};
use crate::api::required_text;
use crate::error::{AppError, Result};
use crate::models::{
    user::User,
    user_certification::{GrantCertificationData, UserCertification},
};
use crate::services::{audit, notifier};

#[derive(Debug, Deserialize)]
struct CertificationListQuery {
    user_id: Option<Uuid>,
    #[serde(default)]
    include_revoked: bool,
}

#[derive(Debug, Deserialize)]
struct GrantRequest {
    user_id: Uuid,
    certification: String,
    expires_at: Option<DateTime<Utc>>,
}

pub fn router() -> Router<AppState> {
    let staff = Router::new()
        .route("/certifications", get(list_certifications).post(grant_certification))
        .route("/certifications/:id", delete(revoke_certification))
        .route_layer(from_fn(require_staff));

    Router::new()
        .route("/certifications/me", get(my_certifications))
        .merge(staff)
}

async fn my_certifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<UserCertification>>> {
    Ok(Json(
        UserCertification::list(&state.pool, Some(user.user_id), false).await?,
    ))
}

async fn list_certifications(
    State(state): State<AppState>,
    Query(query): Query<CertificationListQuery>,
) -> Result<Json<Vec<UserCertification>>> {
    Ok(Json(
        UserCertification::list(&state.pool, query.user_id, query.include_revoked).await?,
    ))
}

/// Grants a certification. Granting one the user already held reinstates it.
async fn grant_certification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<GrantRequest>,
) -> Result<(StatusCode, Json<UserCertification>)> {
    let certification = required_text("certification", &body.certification)?;
    if matches!(body.expires_at, Some(e) if e <= Utc::now()) {
        return Err(AppError::Validation(
            "expires_at must be in the future".to_string(),
        ));
    }

    User::find_by_id(&state.pool, body.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let granted = UserCertification::grant(
        &state.pool,
        GrantCertificationData {
            user_id: body.user_id,
            certification,
            issued_by: user.user_id,
            expires_at: body.expires_at,
        },
    )
    .await?;

    tracing::info!(
        certification_id = %granted.id,
        user_id = %granted.user_id,
        certification = %granted.certification,
        "Certification granted"
    );
    notifier::certification_granted(&state.pool, &granted).await;
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "certification.grant",
        Some(granted.id),
        Some(json!({
            "user_id": granted.user_id,
            "certification": granted.certification,
            "expires_at": granted.expires_at,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(granted)))
}

async fn revoke_certification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let existing = UserCertification::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Certification"))?;
    if existing.revoked_at.is_some() {
        return Err(AppError::Conflict(
            "Certification is already revoked".to_string(),
        ));
    }

    let revoked = UserCertification::revoke(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Certification"))?;

    tracing::info!(certification_id = %id, "Certification revoked");
    notifier::certification_revoked(&state.pool, &revoked).await;
    audit::record(&state.pool, &meta.audit(&user), "certification.revoke", Some(id), None).await;

    Ok(StatusCode::NO_CONTENT)
}
