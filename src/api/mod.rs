// API module - HTTP endpoints

pub mod access;
pub mod audit;
pub mod auth;
pub mod bookings;
pub mod certifications;
pub mod devices;
pub mod equipment;
pub mod health;
pub mod memberships;
pub mod middleware;
pub mod notifications;
pub mod spaces;
pub mod tiers;
pub mod users;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::error::AppError;
use middleware::{auth::authenticate_token, AppState};

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

/// `?page=&per_page=` query parameters, 1-based.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn limit(&self) -> i64 {
        self.per_page()
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }
}

/// A page of results.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: i64,
    pub per_page: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, pagination: Pagination) -> Self {
        Self {
            data,
            page: pagination.page(),
            per_page: pagination.per_page(),
        }
    }
}

/// Trims a required text field, rejecting blanks.
pub fn required_text(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Lower-cases and sanity-checks an email address.
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
                && !domain.contains('@')
        }
        None => false,
    };

    if !valid {
        return Err(AppError::Validation("Email address is invalid".to_string()));
    }
    Ok(email)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(access::DEVICE_KEY_HEADER),
        ])
}

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .merge(auth::router())
        .merge(access::device_router());

    let protected = Router::new()
        .merge(users::router())
        .merge(tiers::router())
        .merge(spaces::router())
        .merge(equipment::router())
        .merge(memberships::router())
        .merge(bookings::router())
        .merge(certifications::router())
        .merge(devices::router())
        .merge(access::router())
        .merge(notifications::router())
        .merge(audit::router())
        .route_layer(from_fn_with_state(state.clone(), authenticate_token));

    let cors = cors_layer(&state.config);

    Router::new()
        .merge(health::router())
        .nest("/api/v1", public.merge(protected))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamps() {
        let default = Pagination::default();
        assert_eq!(default.page(), 1);
        assert_eq!(default.limit(), DEFAULT_PER_PAGE);
        assert_eq!(default.offset(), 0);

        let clamped = Pagination {
            page: Some(0),
            per_page: Some(1000),
        };
        assert_eq!(clamped.page(), 1);
        assert_eq!(clamped.limit(), MAX_PER_PAGE);

        let third = Pagination {
            page: Some(3),
            per_page: Some(10),
        };
        assert_eq!(third.offset(), 20);
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ada@Example.COM ").unwrap(), "ada@example.com");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("ada@localhost").is_err());
        assert!(normalize_email("ada lovelace@example.com").is_err());
    }

    #[test]
    fn test_required_text() {
        assert_eq!(required_text("name", "  Flex ").unwrap(), "Flex");
        assert!(required_text("name", "   ").is_err());
    }
}
