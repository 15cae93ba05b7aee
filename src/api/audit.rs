use axum::{
    extract::{Query, State},
    middleware::from_fn,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::{auth::require_admin, AppState};
use crate::api::{Page, Pagination};
use crate::error::Result;
use crate::models::audit_log::{AuditLog, AuditLogFilter};

#[derive(Debug, Deserialize)]
struct AuditLogQuery {
    actor_id: Option<Uuid>,
    entity_type: Option<String>,
    entity_id: Option<Uuid>,
    action: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/audit-logs", get(list_audit_logs))
        .route_layer(from_fn(require_admin))
}

async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<AuditLog>>> {
    let filter = AuditLogFilter {
        actor_id: query.actor_id,
        entity_type: query.entity_type.filter(|t| !t.is_empty()),
        entity_id: query.entity_id,
        action: query.action.filter(|a| !a.is_empty()),
    };
    let logs = AuditLog::list(&state.pool, &filter, pagination.limit(), pagination.offset()).await?;

    Ok(Json(Page::new(logs, pagination)))
}
