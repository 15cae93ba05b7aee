use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::audit_log::{AuditLog, CreateAuditLogData};

/// Who performed a mutation and from where.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub actor_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditContext {
    /// Context for scheduled jobs, which have no actor.
    pub fn system() -> Self {
        Self::default()
    }
}

/// `"booking.cancel"` is recorded against entity type `"booking"`.
pub fn entity_type_of(action: &str) -> &str {
    action.split_once('.').map(|(entity, _)| entity).unwrap_or(action)
}

/// Appends an audit entry. Failures are logged and swallowed.
pub async fn record(
    pool: &PgPool,
    context: &AuditContext,
    action: &str,
    entity_id: Option<Uuid>,
    changes: Option<JsonValue>,
) {
    let data = CreateAuditLogData {
        actor_id: context.actor_id,
        action: action.to_string(),
        entity_type: entity_type_of(action).to_string(),
        entity_id,
        changes,
        ip_address: context.ip_address.clone(),
        user_agent: context.user_agent.clone(),
    };

    if let Err(e) = AuditLog::create(pool, data).await {
        tracing::warn!(
            error = %e,
            action = action,
            entity_id = ?entity_id,
            "Failed to record audit entry"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_from_action() {
        assert_eq!(entity_type_of("booking.cancel"), "booking");
        assert_eq!(entity_type_of("user.password_change"), "user");
        assert_eq!(entity_type_of("login"), "login");
    }
}
