use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{auth::require_staff, AppState, AuthenticatedUser, RequestMeta};
use crate::api::{required_text, Page, Pagination};
use crate::error::{AppError, Result};
use crate::models::{
    notification::{CreateNotificationData, Notification, NotificationKind},
    user::User,
};
use crate::services::audit;

#[derive(Debug, Deserialize)]
struct NotificationListQuery {
    #[serde(default)]
    unread_only: bool,
}

#[derive(Debug, Serialize)]
struct UnreadCount {
    unread: i64,
}

#[derive(Debug, Serialize)]
struct MarkedRead {
    updated: u64,
}

/// Either `user_id` or `broadcast: true`.
#[derive(Debug, Deserialize)]
struct SendRequest {
    user_id: Option<Uuid>,
    #[serde(default)]
    broadcast: bool,
    #[serde(default = "default_kind")]
    kind: NotificationKind,
    title: String,
    body: String,
}

fn default_kind() -> NotificationKind {
    NotificationKind::System
}

#[derive(Debug, Serialize)]
struct SendResponse {
    recipients: u64,
}

pub fn router() -> Router<AppState> {
    let staff = Router::new()
        .route("/notifications", post(send_notification))
        .route_layer(from_fn(require_staff));

    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/:id/read", post(mark_read))
        .route("/notifications/:id", delete(delete_notification))
        .merge(staff)
}

async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NotificationListQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<Notification>>> {
    let notifications = Notification::list_by_user(
        &state.pool,
        user.user_id,
        query.unread_only,
        pagination.limit(),
        pagination.offset(),
    )
    .await?;

    Ok(Json(Page::new(notifications, pagination)))
}

async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UnreadCount>> {
    let unread = Notification::count_unread(&state.pool, user.user_id).await?;
    Ok(Json(UnreadCount { unread }))
}

async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>> {
    Notification::mark_read(&state.pool, id, user.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Notification"))
}

async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<MarkedRead>> {
    let updated = Notification::mark_all_read(&state.pool, user.user_id).await?;
    Ok(Json(MarkedRead { updated }))
}

async fn delete_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !Notification::delete(&state.pool, id, user.user_id).await? {
        return Err(AppError::not_found("Notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn send_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<SendRequest>,
) -> Result<(StatusCode, Json<SendResponse>)> {
    let title = required_text("title", &body.title)?;
    let text = required_text("body", &body.body)?;

    let recipients = match (body.user_id, body.broadcast) {
        (Some(user_id), false) => {
            User::find_by_id(&state.pool, user_id)
                .await?
                .ok_or_else(|| AppError::not_found("User"))?;
            Notification::create(
                &state.pool,
                CreateNotificationData {
                    user_id,
                    kind: body.kind,
                    title: title.clone(),
                    body: text,
                    data: None,
                },
            )
            .await?;
            1
        }
        (None, true) => {
            let user_ids = User::list_active_ids(&state.pool).await?;
            Notification::create_many(&state.pool, &user_ids, body.kind, &title, &text).await?
        }
        _ => {
            return Err(AppError::Validation(
                "Provide either user_id or broadcast: true".to_string(),
            ))
        }
    };

    tracing::info!(recipients = recipients, broadcast = body.broadcast, "Notification sent");
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "notification.send",
        body.user_id,
        Some(json!({
            "title": title,
            "broadcast": body.broadcast,
            "recipients": recipients,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(SendResponse { recipients })))
}
