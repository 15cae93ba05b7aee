use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    QrToken,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessLog {
    pub id: Uuid,
    pub device_id: Uuid,
    pub user_id: Option<Uuid>, // nullable: unreadable tokens carry no user
    pub space_id: Option<Uuid>,
    pub decision: AccessDecision,
    pub reason: String,
    pub method: AccessMethod,
    pub token_nonce: Option<String>,
    pub operator_id: Option<Uuid>, // staff member for manual entries
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAccessLogData {
    pub device_id: Uuid,
    pub user_id: Option<Uuid>,
    pub space_id: Option<Uuid>,
    pub decision: AccessDecision,
    pub reason: String,
    pub method: AccessMethod,
    pub token_nonce: Option<String>,
    pub operator_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessLogFilter {
    pub user_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub decision: Option<AccessDecision>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessStats {
    pub total: i64,
    pub granted: i64,
    pub denied: i64,
    pub unique_users: i64,
}

impl AccessStats {
    pub fn grant_rate_label(&self) -> Option<String> {
        if self.total > 0 {
            let rate = self.granted as f64 * 100.0 / self.total as f64;
            Some(format!("{:.1}", rate))
        } else {
            None
        }
    }
}

impl AccessLog {
    pub async fn create(pool: &PgPool, data: CreateAccessLogData) -> Result<Self, sqlx::Error> {
        let log = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO access_logs (
                device_id, user_id, space_id, decision, reason, method, token_nonce, operator_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(data.device_id)
        .bind(data.user_id)
        .bind(data.space_id)
        .bind(data.decision)
        .bind(&data.reason)
        .bind(data.method)
        .bind(&data.token_nonce)
        .bind(data.operator_id)
        .fetch_one(pool)
        .await?;

        Ok(log)
    }

    /// Whether a token nonce has already opened a door.
    pub async fn nonce_was_granted(pool: &PgPool, nonce: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM access_logs
                WHERE token_nonce = $1 AND decision = 'granted'
            )
            "#,
        )
        .bind(nonce)
        .fetch_one(pool)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        filter: &AccessLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let logs = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM access_logs
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::uuid IS NULL OR device_id = $2)
              AND ($3::text IS NULL OR decision = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at < $5)
            ORDER BY created_at DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.device_id)
        .bind(filter.decision)
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(logs)
    }

    pub async fn stats(
        pool: &PgPool,
        device_id: Option<Uuid>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<AccessStats, sqlx::Error> {
        sqlx::query_as::<_, AccessStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE decision = 'granted') AS granted,
                COUNT(*) FILTER (WHERE decision = 'denied') AS denied,
                COUNT(DISTINCT user_id) AS unique_users
            FROM access_logs
            WHERE ($1::uuid IS NULL OR device_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            "#,
        )
        .bind(device_id)
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_rate_label() {
        let stats = AccessStats {
            total: 8,
            granted: 6,
            denied: 2,
            unique_users: 3,
        };
        assert_eq!(stats.grant_rate_label().as_deref(), Some("75.0"));

        let empty = AccessStats {
            total: 0,
            granted: 0,
            denied: 0,
            unique_users: 0,
        };
        assert_eq!(empty.grant_rate_label(), None);
    }
}
