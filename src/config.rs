use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,

    // Authentication
    pub jwt_secret: Secret<String>,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub bcrypt_cost: u32,

    // Door access
    pub qr_signing_secret: Secret<String>,
    pub qr_token_ttl_seconds: i64,
    pub facility_utc_offset_minutes: i32,

    pub cors_allowed_origins: Vec<String>,
    pub enable_jobs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let cors_allowed_origins = config
            .get::<String>("cors_allowed_origins")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url: config.get("database_url")?,
            database_max_connections: config.get("database_max_connections").unwrap_or(20),
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            jwt_secret: Secret::new(config.get("jwt_secret")?),
            access_token_ttl_minutes: config.get("access_token_ttl_minutes").unwrap_or(15),
            refresh_token_ttl_days: config.get("refresh_token_ttl_days").unwrap_or(30),
            bcrypt_cost: config.get("bcrypt_cost").unwrap_or(bcrypt::DEFAULT_COST),

            qr_signing_secret: Secret::new(config.get("qr_signing_secret")?),
            qr_token_ttl_seconds: config.get("qr_token_ttl_seconds").unwrap_or(60),
            facility_utc_offset_minutes: config.get("facility_utc_offset_minutes").unwrap_or(0),

            cors_allowed_origins,
            enable_jobs: config.get("enable_jobs").unwrap_or(true),
        })
    }

    /// HMAC key for door-access QR tokens: the configured secret's raw bytes.
    pub fn qr_signing_key(&self) -> &[u8] {
        self.qr_signing_secret.expose_secret().as_bytes()
    }

    /// Configuration for tests and local tooling, never read from the environment.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/cowork_test".to_string(),
            database_max_connections: 1,
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: Secret::new("test-jwt-secret".to_string()),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 30,
            bcrypt_cost: 4,
            qr_signing_secret: Secret::new("test-qr-secret".to_string()),
            qr_token_ttl_seconds: 60,
            facility_utc_offset_minutes: 0,
            cors_allowed_origins: Vec::new(),
            enable_jobs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::qr_generator::AccessTokenPayload;
    use chrono::Utc;
    use ring::hmac;
    use uuid::Uuid;

    #[test]
    fn test_qr_tag_is_hmac_of_raw_secret() {
        let config = Config::for_tests();
        let payload = AccessTokenPayload::new(Uuid::new_v4(), Utc::now(), 60).unwrap();
        let issued = payload.sign(config.qr_signing_key()).unwrap();
        let (body, tag) = issued.token.split_once('.').unwrap();

        let key = hmac::Key::new(hmac::HMAC_SHA256, b"test-qr-secret");
        let expected = hex::encode(hmac::sign(&key, body.as_bytes()).as_ref());
        assert_eq!(tag, expected);
    }
}
