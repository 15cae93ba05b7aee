use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::Role;
use crate::services::signature;

const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("Token subject is not a user id")]
    BadSubject,

    #[error("Token generation failed: {0}")]
    Generation(#[from] signature::SignatureError),
}

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::BadSubject)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn issue_access_token(
    user_id: Uuid,
    role: Role,
    secret: &str,
    ttl_minutes: i64,
) -> Result<AccessToken, TokenError> {
    let now = Utc::now();
    let expires_at = now + Duration::minutes(ttl_minutes);

    let claims = Claims {
        sub: user_id.to_string(),
        role,
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(AccessToken { token, expires_at })
}

pub fn verify_access_token(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            if matches!(e.kind(), ErrorKind::ExpiredSignature) {
                TokenError::Expired
            } else {
                TokenError::Invalid(e)
            }
        })
}

/// A fresh opaque refresh token and the hash that gets persisted.
pub struct GeneratedRefreshToken {
    pub token: String,
    pub token_hash: String,
}

pub fn generate_refresh_token() -> Result<GeneratedRefreshToken, TokenError> {
    let token = signature::random_hex(REFRESH_TOKEN_BYTES)?;
    let token_hash = signature::sha256_hex(&token);
    Ok(GeneratedRefreshToken { token, token_hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let user_id = Uuid::new_v4();
        let issued = issue_access_token(user_id, Role::Staff, "secret", 15).unwrap();
        let claims = verify_access_token(&issued.token, "secret").unwrap();

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.role, Role::Staff);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issued = issue_access_token(Uuid::new_v4(), Role::Member, "secret", 15).unwrap();
        assert!(matches!(
            verify_access_token(&issued.token, "other"),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let issued = issue_access_token(Uuid::new_v4(), Role::Member, "secret", -5).unwrap();
        assert!(matches!(
            verify_access_token(&issued.token, "secret"),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_refresh_token_hash_matches() {
        let generated = generate_refresh_token().unwrap();
        assert_eq!(generated.token.len(), 64);
        assert_eq!(signature::sha256_hex(&generated.token), generated.token_hash);
    }
}
