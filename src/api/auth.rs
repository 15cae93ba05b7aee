use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::middleware::{AppState, RequestMeta};
use crate::api::{normalize_email, required_text};
use crate::error::{AppError, Result};
use crate::models::user::{CreateUserData, Role, User};
use crate::services::{
    audit::{self, AuditContext},
    password,
    sessions::{self, TokenPair},
};

pub const MAX_FAILED_LOGINS: i32 = 5;
pub const LOCKOUT_MINUTES: i64 = 15;

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    user: User,
    #[serde(flatten)]
    tokens: TokenPair,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

/// Creates a member account and opens its first session
async fn register(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let email = normalize_email(&body.email)?;
    let first_name = required_text("first_name", &body.first_name)?;
    let last_name = required_text("last_name", &body.last_name)?;
    password::validate_strength(&body.password)?;

    let password_hash = password::hash(body.password, state.config.bcrypt_cost).await?;

    let user = User::create(
        &state.pool,
        CreateUserData {
            email,
            password_hash,
            first_name,
            last_name,
            phone: body.phone,
            role: Role::Member,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "User registered");
    audit::record(
        &state.pool,
        &meta.audit_as(user.id),
        "user.register",
        Some(user.id),
        None,
    )
    .await;

    let tokens = sessions::issue(&state.pool, &state.config, &user, &meta.client_info()).await?;

    Ok((StatusCode::CREATED, Json(AuthResponse { user, tokens })))
}

/// Exchanges credentials for a token pair
async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let email = body.email.trim().to_lowercase();
    let user = User::find_by_email(&state.pool, &email)
        .await?
        .ok_or_else(invalid)?;

    let now = Utc::now();
    if user.is_locked(now) {
        tracing::warn!(user_id = %user.id, "Login attempt on locked account");
        return Err(AppError::Unauthorized(
            "Account is temporarily locked after repeated failed logins".to_string(),
        ));
    }

    if !password::verify(body.password, user.password_hash.clone()).await {
        let attempts = User::record_login_failure(
            &state.pool,
            user.id,
            MAX_FAILED_LOGINS,
            now + Duration::minutes(LOCKOUT_MINUTES),
        )
        .await?;
        tracing::warn!(user_id = %user.id, attempts = attempts, "Failed login");

        if attempts >= MAX_FAILED_LOGINS {
            audit::record(
                &state.pool,
                &AuditContext {
                    actor_id: None,
                    ip_address: meta.ip_address.clone(),
                    user_agent: meta.user_agent.clone(),
                },
                "user.lock",
                Some(user.id),
                Some(json!({ "failed_attempts": attempts })),
            )
            .await;
        }
        return Err(invalid());
    }

    if !user.is_active() {
        return Err(AppError::Forbidden("Account is not active".to_string()));
    }

    User::record_login_success(&state.pool, user.id).await?;
    audit::record(&state.pool, &meta.audit_as(user.id), "user.login", Some(user.id), None).await;

    let tokens = sessions::issue(&state.pool, &state.config, &user, &meta.client_info()).await?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(AuthResponse { user, tokens }))
}

/// Rotates a refresh token
async fn refresh(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPair>> {
    let (_, tokens) = sessions::rotate(
        &state.pool,
        &state.config,
        body.refresh_token.trim(),
        &meta.client_info(),
    )
    .await?;

    Ok(Json(tokens))
}

/// Revokes the presented refresh token
async fn logout(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<StatusCode> {
    sessions::revoke(&state.pool, body.refresh_token.trim()).await?;
    Ok(StatusCode::NO_CONTENT)
}
