use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use sqlx::PgPool;

use crate::config::Config;
use crate::models::{
    refresh_token::{CreateRefreshTokenData, RefreshToken},
    user::User,
};
use crate::services::{signature, tokens};

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Token error: {0}")]
    TokenError(#[from] tokens::TokenError),

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token was already used; all sessions have been revoked")]
    RefreshTokenReused,

    #[error("Account is not active")]
    UserInactive,
}

/// Where a session was opened from.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Opens a new session for the user.
pub async fn issue(
    pool: &PgPool,
    config: &Config,
    user: &User,
    client: &ClientInfo,
) -> Result<TokenPair, SessionError> {
    let access = tokens::issue_access_token(
        user.id,
        user.role,
        config.jwt_secret.expose_secret(),
        config.access_token_ttl_minutes,
    )?;
    let refresh = tokens::generate_refresh_token()?;

    RefreshToken::create(
        pool,
        CreateRefreshTokenData {
            user_id: user.id,
            token_hash: refresh.token_hash,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
            expires_at: Utc::now() + Duration::days(config.refresh_token_ttl_days),
        },
    )
    .await?;

    Ok(TokenPair {
        access_token: access.token,
        refresh_token: refresh.token,
        token_type: "Bearer",
        expires_in: config.access_token_ttl_minutes * 60,
    })
}

/// Exchanges a refresh token for a new pair, revoking the presented one.
///
/// A token that was already revoked signals theft: every session of its owner is revoked.
#[tracing::instrument(skip_all)]
pub async fn rotate(
    pool: &PgPool,
    config: &Config,
    raw_token: &str,
    client: &ClientInfo,
) -> Result<(User, TokenPair), SessionError> {
    let token_hash = signature::sha256_hex(raw_token);
    let stored = RefreshToken::find_by_hash(pool, &token_hash)
        .await?
        .ok_or(SessionError::InvalidRefreshToken)?;

    if stored.revoked_at.is_some() {
        let revoked = RefreshToken::revoke_all_for_user(pool, stored.user_id, None).await?;
        tracing::warn!(
            user_id = %stored.user_id,
            revoked = revoked,
            "Revoked refresh token presented again, revoking all sessions"
        );
        return Err(SessionError::RefreshTokenReused);
    }

    if !stored.is_usable(Utc::now()) {
        return Err(SessionError::InvalidRefreshToken);
    }

    let user = User::find_by_id(pool, stored.user_id)
        .await?
        .ok_or(SessionError::InvalidRefreshToken)?;
    if !user.is_active() {
        return Err(SessionError::UserInactive);
    }

    // A concurrent rotation may have revoked it between the read and here.
    if !RefreshToken::revoke(pool, stored.id, user.id).await? {
        return Err(SessionError::InvalidRefreshToken);
    }

    let pair = issue(pool, config, &user, client).await?;
    tracing::info!(user_id = %user.id, "Refresh token rotated");

    Ok((user, pair))
}

/// Revokes the presented refresh token. Unknown tokens are ignored.
pub async fn revoke(pool: &PgPool, raw_token: &str) -> Result<(), SessionError> {
    let token_hash = signature::sha256_hex(raw_token);
    if let Some(stored) = RefreshToken::find_by_hash(pool, &token_hash).await? {
        RefreshToken::revoke(pool, stored.id, stored.user_id).await?;
        tracing::info!(user_id = %stored.user_id, "Refresh token revoked");
    }
    Ok(())
}
