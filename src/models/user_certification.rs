use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserCertification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub certification: String, // matched against equipments.required_certification
    pub issued_by: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GrantCertificationData {
    pub user_id: Uuid,
    pub certification: String,
    pub issued_by: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserCertification {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map(|e| e > now).unwrap_or(true)
    }

    /// Grants a certification, reinstating it if it was previously revoked or expired.
    pub async fn grant(pool: &PgPool, data: GrantCertificationData) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO user_certifications (user_id, certification, issued_by, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, certification) DO UPDATE
            SET
                issued_by = EXCLUDED.issued_by,
                issued_at = NOW(),
                expires_at = EXCLUDED.expires_at,
                revoked_at = NULL,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(data.user_id)
        .bind(&data.certification)
        .bind(data.issued_by)
        .bind(data.expires_at)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM user_certifications WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_for_user(
        pool: &PgPool,
        user_id: Uuid,
        certification: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM user_certifications
            WHERE user_id = $1 AND certification = $2
            "#,
        )
        .bind(user_id)
        .bind(certification)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        user_id: Option<Uuid>,
        include_revoked: bool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM user_certifications
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2 OR revoked_at IS NULL)
            ORDER BY issued_at DESC
            "#,
        )
        .bind(user_id)
        .bind(include_revoked)
        .fetch_all(pool)
        .await
    }

    pub async fn revoke(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE user_certifications
            SET revoked_at = COALESCE(revoked_at, NOW()), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn certification(expires_at: Option<DateTime<Utc>>) -> UserCertification {
        let now = Utc::now();
        UserCertification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            certification: "laser_cutter".to_string(),
            issued_by: None,
            issued_at: now,
            expires_at,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_validity() {
        let now = Utc::now();
        assert!(certification(None).is_valid(now));
        assert!(certification(Some(now + Duration::days(1))).is_valid(now));
        assert!(!certification(Some(now - Duration::seconds(1))).is_valid(now));

        let mut revoked = certification(None);
        revoked.revoked_at = Some(now);
        assert!(!revoked.is_valid(now));
    }
}
