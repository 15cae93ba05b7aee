//! Router-level tests for requests that are rejected before any database access.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use uuid::Uuid;

use cowork::api::{self, middleware::AppState};
use cowork::config::Config;
use cowork::models::user::Role;
use cowork::services::tokens;

fn app() -> Result<Router, Box<dyn std::error::Error>> {
    let config = Config::for_tests();
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(&config.database_url)?;
    Ok(api::router(AppState::new(pool, config)))
}

async fn body_json(response: axum::response::Response) -> Result<Value, Box<dyn std::error::Error>> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn test_missing_bearer_is_unauthorized() -> Result<(), Box<dyn std::error::Error>> {
    let request = Request::builder()
        .uri("/api/v1/users/profile")
        .body(Body::empty())?;

    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await?;
    assert_eq!(body["error"], "UNAUTHORIZED");
    assert!(body["message"].as_str().is_some());

    Ok(())
}

#[tokio::test]
async fn test_garbage_bearer_is_unauthorized() -> Result<(), Box<dyn std::error::Error>> {
    let request = Request::builder()
        .uri("/api/v1/bookings/me")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())?;

    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_unauthorized(
) -> Result<(), Box<dyn std::error::Error>> {
    let forged = tokens::issue_access_token(Uuid::new_v4(), Role::Admin, "some-other-secret", 15)?;

    let request = Request::builder()
        .uri("/api/v1/audit-logs")
        .header(header::AUTHORIZATION, format!("Bearer {}", forged.token))
        .body(Body::empty())?;

    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn test_access_validate_requires_device_key() -> Result<(), Box<dyn std::error::Error>> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/access/validate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "token": "abc.def" }).to_string()))?;

    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await?;
    assert_eq!(body["message"], "Missing device key");

    Ok(())
}

#[tokio::test]
async fn test_register_rejects_invalid_email() -> Result<(), Box<dyn std::error::Error>> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "email": "not-an-email",
                "password": "long-enough-password",
                "first_name": "Ada",
                "last_name": "Lovelace",
            })
            .to_string(),
        ))?;

    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await?;
    assert_eq!(body["error"], "VALIDATION_ERROR");

    Ok(())
}

#[tokio::test]
async fn test_register_rejects_short_password() -> Result<(), Box<dyn std::error::Error>> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "email": "ada@example.com",
                "password": "short",
                "first_name": "Ada",
                "last_name": "Lovelace",
            })
            .to_string(),
        ))?;

    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
    let request = Request::builder()
        .uri("/api/v1/does-not-exist")
        .body(Body::empty())?;

    let response = app()?.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}
