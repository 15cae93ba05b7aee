use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{auth::require_admin, AppState, AuthenticatedUser, RequestMeta};
use crate::api::{normalize_email, required_text, Page, Pagination};
use crate::error::{AppError, Result};
use crate::models::{
    audit_log::AuditLog,
    refresh_token::RefreshToken,
    user::{CreateUserData, Role, UpdateUserData, User, UserFilter, UserSettings, UserStatus},
};
use crate::services::{audit, password};

#[derive(Debug, Deserialize)]
struct UpdateProfileRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

/// Settings update; omitted keys keep their current value.
#[derive(Debug, Default, Deserialize)]
struct SettingsPatch {
    email_notifications: Option<bool>,
    push_notifications: Option<bool>,
    language: Option<String>,
    timezone: Option<String>,
}

impl SettingsPatch {
    fn apply(self, mut settings: UserSettings) -> UserSettings {
        if let Some(v) = self.email_notifications {
            settings.email_notifications = v;
        }
        if let Some(v) = self.push_notifications {
            settings.push_notifications = v;
        }
        if let Some(v) = self.language {
            settings.language = v;
        }
        if let Some(v) = self.timezone {
            settings.timezone = v;
        }
        settings
    }
}

#[derive(Debug, Deserialize)]
struct UserListQuery {
    role: Option<Role>,
    status: Option<UserStatus>,
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    #[serde(default = "default_role")]
    role: Role,
}

fn default_role() -> Role {
    Role::Member
}

#[derive(Debug, Deserialize)]
struct AdminUpdateUserRequest {
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
    role: Option<Role>,
    status: Option<UserStatus>,
}

pub fn router() -> Router<AppState> {
    let admin = Router::new()
        .route("/users/admin", get(list_users).post(create_user))
        .route(
            "/users/admin/:id",
            get(get_user).patch(update_user).delete(deactivate_user),
        )
        .route("/users/admin/:id/audit-logs", get(user_audit_logs))
        .route_layer(from_fn(require_admin));

    Router::new()
        .route("/users/profile", get(get_profile).patch(update_profile))
        .route("/users/profile/password", post(change_password))
        .route("/users/sessions", get(list_sessions).delete(revoke_all_sessions))
        .route("/users/sessions/:id", delete(revoke_session))
        .route("/users/audit-logs", get(my_audit_logs))
        .route("/users/settings", get(get_settings).put(update_settings))
        .merge(admin)
}

async fn load_user(state: &AppState, id: Uuid) -> Result<User> {
    User::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))
}

fn optional_text(field: &str, value: Option<String>) -> Result<Option<String>> {
    value.map(|v| required_text(field, &v)).transpose()
}

async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<User>> {
    Ok(Json(load_user(&state, user.user_id).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<User>> {
    let data = UpdateUserData {
        first_name: optional_text("first_name", body.first_name)?,
        last_name: optional_text("last_name", body.last_name)?,
        phone: body.phone,
        ..Default::default()
    };
    let changes = json!({
        "first_name": data.first_name,
        "last_name": data.last_name,
        "phone": data.phone,
    });

    let updated = User::update(&state.pool, user.user_id, data)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    audit::record(
        &state.pool,
        &meta.audit(&user),
        "user.update_profile",
        Some(updated.id),
        Some(changes),
    )
    .await;

    Ok(Json(updated))
}

/// Changes the caller's password and signs out every refresh session
async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<StatusCode> {
    let current = load_user(&state, user.user_id).await?;

    if !password::verify(body.current_password, current.password_hash.clone()).await {
        return Err(AppError::Unauthorized(
            "Current password is incorrect".to_string(),
        ));
    }
    password::validate_strength(&body.new_password)?;

    let hash = password::hash(body.new_password, state.config.bcrypt_cost).await?;
    User::update_password(&state.pool, current.id, &hash).await?;
    let revoked = RefreshToken::revoke_all_for_user(&state.pool, current.id, None).await?;

    tracing::info!(user_id = %current.id, revoked_sessions = revoked, "Password changed");
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "user.change_password",
        Some(current.id),
        Some(json!({ "revoked_sessions": revoked })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

async fn list_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<RefreshToken>>> {
    Ok(Json(
        RefreshToken::list_active_for_user(&state.pool, user.user_id).await?,
    ))
}

async fn revoke_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !RefreshToken::revoke(&state.pool, id, user.user_id).await? {
        return Err(AppError::not_found("Session"));
    }

    audit::record(&state.pool, &meta.audit(&user), "session.revoke", Some(id), None).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_all_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
) -> Result<Json<serde_json::Value>> {
    let revoked = RefreshToken::revoke_all_for_user(&state.pool, user.user_id, None).await?;

    audit::record(
        &state.pool,
        &meta.audit(&user),
        "session.revoke_all",
        Some(user.user_id),
        Some(json!({ "revoked": revoked })),
    )
    .await;

    Ok(Json(json!({ "revoked": revoked })))
}

async fn my_audit_logs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<AuditLog>>> {
    let logs = AuditLog::list_for_user(
        &state.pool,
        user.user_id,
        pagination.limit(),
        pagination.offset(),
    )
    .await?;

    Ok(Json(Page::new(logs, pagination)))
}

async fn get_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserSettings>> {
    let current = load_user(&state, user.user_id).await?;
    Ok(Json(current.settings.0))
}

async fn update_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<UserSettings>> {
    let current = load_user(&state, user.user_id).await?;
    let settings = patch.apply(current.settings.0);

    let updated = User::update_settings(&state.pool, user.user_id, &settings)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    audit::record(
        &state.pool,
        &meta.audit(&user),
        "user.update_settings",
        Some(updated.id),
        serde_json::to_value(&settings).ok(),
    )
    .await;

    Ok(Json(updated.settings.0))
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<User>>> {
    let filter = UserFilter {
        role: query.role,
        status: query.status,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };

    let users = User::list(
        &state.pool,
        &filter,
        pagination.limit(),
        pagination.offset(),
    )
    .await?;

    Ok(Json(Page::new(users, pagination)))
}

async fn create_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>)> {
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
            role: body.role,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "User created by admin");
    audit::record(
        &state.pool,
        &meta.audit(&admin),
        "user.create",
        Some(user.id),
        Some(json!({ "email": user.email, "role": user.role })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<User>> {
    Ok(Json(load_user(&state, id).await?))
}

/// Rejects an admin removing their own admin role or disabling their own account.
fn guard_self_change(
    admin: &AuthenticatedUser,
    target_id: Uuid,
    role: Option<Role>,
    status: Option<UserStatus>,
) -> Result<()> {
    if admin.user_id != target_id {
        return Ok(());
    }
    if matches!(role, Some(r) if r != Role::Admin) {
        return Err(AppError::Validation(
            "Administrators cannot demote themselves".to_string(),
        ));
    }
    if matches!(status, Some(s) if s != UserStatus::Active) {
        return Err(AppError::Validation(
            "Administrators cannot deactivate themselves".to_string(),
        ));
    }
    Ok(())
}

async fn update_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    Json(body): Json<AdminUpdateUserRequest>,
) -> Result<Json<User>> {
    guard_self_change(&admin, id, body.role, body.status)?;

    let data = UpdateUserData {
        email: body.email.as_deref().map(normalize_email).transpose()?,
        first_name: optional_text("first_name", body.first_name)?,
        last_name: optional_text("last_name", body.last_name)?,
        phone: body.phone,
        role: body.role,
        status: body.status,
    };
    let changes = json!({
        "email": data.email,
        "first_name": data.first_name,
        "last_name": data.last_name,
        "phone": data.phone,
        "role": data.role,
        "status": data.status,
    });
    let disabling = matches!(data.status, Some(s) if s != UserStatus::Active);

    let updated = User::update(&state.pool, id, data)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    if disabling {
        RefreshToken::revoke_all_for_user(&state.pool, id, None).await?;
    }

    audit::record(
        &state.pool,
        &meta.audit(&admin),
        "user.update",
        Some(id),
        Some(changes),
    )
    .await;

    Ok(Json(updated))
}

/// Soft delete: the account is deactivated and signed out everywhere
async fn deactivate_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    guard_self_change(&admin, id, None, Some(UserStatus::Deactivated))?;

    User::update(
        &state.pool,
        id,
        UpdateUserData {
            status: Some(UserStatus::Deactivated),
            ..Default::default()
        },
    )
    .await?
    .ok_or_else(|| AppError::not_found("User"))?;

    let revoked = RefreshToken::revoke_all_for_user(&state.pool, id, None).await?;

    tracing::info!(user_id = %id, revoked_sessions = revoked, "User deactivated");
    audit::record(&state.pool, &meta.audit(&admin), "user.deactivate", Some(id), None).await;

    Ok(StatusCode::NO_CONTENT)
}

async fn user_audit_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<AuditLog>>> {
    let logs =
        AuditLog::list_for_user(&state.pool, id, pagination.limit(), pagination.offset()).await?;
    Ok(Json(Page::new(logs, pagination)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_patch_keeps_omitted_keys() {
        let patch = SettingsPatch {
            language: Some("fr".to_string()),
            ..Default::default()
        };

        let settings = patch.apply(UserSettings::default());
        assert_eq!(settings.language, "fr");
        assert_eq!(settings.timezone, "UTC");
        assert!(settings.email_notifications);
    }

    #[test]
    fn test_admin_cannot_demote_or_disable_self() {
        let admin = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };

        assert!(guard_self_change(&admin, admin.user_id, Some(Role::Staff), None).is_err());
        assert!(
            guard_self_change(&admin, admin.user_id, None, Some(UserStatus::Suspended)).is_err()
        );
        assert!(guard_self_change(&admin, admin.user_id, Some(Role::Admin), None).is_ok());
        assert!(guard_self_change(&admin, Uuid::new_v4(), Some(Role::Member), None).is_ok());
    }
}
