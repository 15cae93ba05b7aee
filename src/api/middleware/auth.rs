use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use uuid::Uuid;

use super::state::AppState;
use crate::error::AppError;
use crate::models::user::{Role, User};
use crate::services::{audit::AuditContext, sessions::ClientInfo, tokens};

/// Identity attached to a request by [`authenticate_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn authorize(&self, required: Role) -> Result<(), AppError> {
        authorize_role(self.role, required)
    }

    pub fn is_staff(&self) -> bool {
        self.role.satisfies(Role::Staff)
    }

    /// Owners see their own records, staff see everyone's.
    pub fn can_access(&self, owner_id: Uuid) -> Result<(), AppError> {
        if self.user_id == owner_id || self.is_staff() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You do not have access to this resource".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

pub fn authorize_role(actual: Role, required: Role) -> Result<(), AppError> {
    if actual.satisfies(required) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "This action requires the {} role",
            required.as_str()
        )))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validates the bearer JWT, loads the user and attaches [`AuthenticatedUser`].
///
/// The role comes from the user row, so role changes apply before the token expires.
pub async fn authenticate_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let claims = tokens::verify_access_token(token, state.config.jwt_secret.expose_secret())?;
    let user_id = claims.user_id()?;

    let user = User::find_by_id(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;

    if !user.is_active() {
        return Err(AppError::Forbidden("Account is not active".to_string()));
    }

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: user.id,
        role: user.role,
    });

    Ok(next.run(request).await)
}

async fn require_role(request: Request, next: Next, required: Role) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .copied()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    user.authorize(required)?;
    Ok(next.run(request).await)
}

pub async fn require_staff(request: Request, next: Next) -> Result<Response, AppError> {
    require_role(request, next, Role::Staff).await
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    require_role(request, next, Role::Admin).await
}

/// Client address and agent, recorded in audit entries and sessions.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        // First hop of X-Forwarded-For is the original client.
        let ip_address = header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .or_else(|| header_str("x-real-ip").map(str::to_string));

        Self {
            ip_address,
            user_agent: header_str(header::USER_AGENT.as_str()).map(str::to_string),
        }
    }

    pub fn audit(&self, actor: &AuthenticatedUser) -> AuditContext {
        AuditContext {
            actor_id: Some(actor.user_id),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn audit_as(&self, actor_id: Uuid) -> AuditContext {
        AuditContext {
            actor_id: Some(actor_id),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            user_agent: self.user_agent.clone(),
            ip_address: self.ip_address.clone(),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{HeaderValue, Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn app_with_role(role: Role) -> Router {
        Router::new()
            .route("/admin", get(|| async { "ok" }))
            .route_layer(middleware::from_fn(require_admin))
            .layer(middleware::from_fn(move |mut request: Request, next: Next| async move {
                request.extensions_mut().insert(AuthenticatedUser {
                    user_id: Uuid::new_v4(),
                    role,
                });
                next.run(request).await
            }))
    }

    #[tokio::test]
    async fn test_member_is_forbidden_on_admin_route() {
        let response = app_with_role(Role::Member)
            .oneshot(HttpRequest::builder().uri("/admin").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_passes_admin_route() {
        let response = app_with_role(Role::Admin)
            .oneshot(HttpRequest::builder().uri("/admin").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let app = Router::new()
            .route("/staff", get(|| async { "ok" }))
            .route_layer(middleware::from_fn(require_staff));

        let response = app
            .oneshot(HttpRequest::builder().uri("/staff").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_role_hierarchy() {
        assert!(authorize_role(Role::Admin, Role::Staff).is_ok());
        assert!(authorize_role(Role::Staff, Role::Staff).is_ok());
        assert!(authorize_role(Role::Member, Role::Staff).is_err());
        assert!(authorize_role(Role::Staff, Role::Admin).is_err());
    }

    #[test]
    fn test_owner_or_staff_access() {
        let owner = Uuid::new_v4();
        let member = AuthenticatedUser {
            user_id: owner,
            role: Role::Member,
        };
        let other = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: Role::Member,
        };
        let staff = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: Role::Staff,
        };

        assert!(member.can_access(owner).is_ok());
        assert!(other.can_access(owner).is_err());
        assert!(staff.can_access(owner).is_ok());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn test_request_meta_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("door-app/1.0"));

        let meta = RequestMeta::from_headers(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("door-app/1.0"));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(
            RequestMeta::from_headers(&headers).ip_address.as_deref(),
            Some("10.0.0.2")
        );
    }
}
