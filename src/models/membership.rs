use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Pending,
    Active,
    Paused,
    Cancelled,
    Expired,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Pending => "pending",
            MembershipStatus::Active => "active",
            MembershipStatus::Paused => "paused",
            MembershipStatus::Cancelled => "cancelled",
            MembershipStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MembershipStatus::Cancelled | MembershipStatus::Expired)
    }

    pub fn can_transition_to(&self, next: MembershipStatus) -> bool {
        use MembershipStatus::*;

        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Active, Paused)
                | (Active, Cancelled)
                | (Active, Expired)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub status: MembershipStatus,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMembershipData {
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub auto_renew: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MembershipFilter {
    pub user_id: Option<Uuid>,
    pub tier_id: Option<Uuid>,
    pub status: Option<MembershipStatus>,
}

/// End of a one-month membership period starting at `from`.
pub fn period_end(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_add_months(Months::new(1))
        .unwrap_or(from + Duration::days(30))
}

impl Membership {
    /// Active memberships are only usable inside their validity window.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active
            && self.starts_at.map(|s| s <= now).unwrap_or(true)
            && self.ends_at.map(|e| e > now).unwrap_or(true)
    }

    pub async fn create(pool: &PgPool, data: CreateMembershipData) -> Result<Self, sqlx::Error> {
        let membership = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO memberships (user_id, tier_id, auto_renew)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(data.user_id)
        .bind(data.tier_id)
        .bind(data.auto_renew)
        .fetch_one(pool)
        .await?;

        Ok(membership)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let membership = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM memberships WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(membership)
    }

    pub async fn find_active_for_user(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let membership = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM memberships
            WHERE user_id = $1 AND status = 'active'
            ORDER BY activated_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(membership)
    }

    pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let memberships = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM memberships
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(memberships)
    }

    pub async fn list(
        pool: &PgPool,
        filter: &MembershipFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let memberships = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM memberships
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::uuid IS NULL OR tier_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.tier_id)
        .bind(filter.status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(memberships)
    }

    /// Status updates below only apply while the row is still in the expected
    /// source status. `None` means a concurrent change got there first.
    pub async fn activate(
        pool: &PgPool,
        id: Uuid,
        expected: MembershipStatus,
        ends_at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE memberships
            SET
                status = 'active',
                starts_at = COALESCE(starts_at, NOW()),
                ends_at = $2,
                activated_at = NOW(),
                paused_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(ends_at)
        .bind(expected)
        .fetch_optional(pool)
        .await
    }

    pub async fn pause(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE memberships
            SET status = 'paused', paused_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn cancel(
        pool: &PgPool,
        id: Uuid,
        expected: MembershipStatus,
        reason: Option<String>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE memberships
            SET
                status = 'cancelled',
                cancelled_at = NOW(),
                cancellation_reason = $3,
                auto_renew = FALSE,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(reason)
        .fetch_optional(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        tier_id: Option<Uuid>,
        ends_at: Option<DateTime<Utc>>,
        auto_renew: Option<bool>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE memberships
            SET
                tier_id = COALESCE($2, tier_id),
                ends_at = COALESCE($3, ends_at),
                auto_renew = COALESCE($4, auto_renew),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tier_id)
        .bind(ends_at)
        .bind(auto_renew)
        .fetch_optional(pool)
        .await
    }

    /// Active memberships whose period ended before `now`.
    pub async fn find_lapsed(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM memberships
            WHERE status = 'active' AND ends_at IS NOT NULL AND ends_at <= $1
            ORDER BY ends_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(pool)
        .await
    }

    /// Returns false when the membership left `active` since it was read.
    pub async fn renew(
        pool: &PgPool,
        id: Uuid,
        ends_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET ends_at = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(ends_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn expire(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET status = 'expired', updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_end_is_calendar_month() {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();
        assert_eq!(
            period_end(from),
            Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_transitions() {
        use MembershipStatus::*;

        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Active.can_transition_to(Expired));
        assert!(!Pending.can_transition_to(Paused));
        assert!(!Paused.can_transition_to(Expired));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use MembershipStatus::*;

        for terminal in [Cancelled, Expired] {
            assert!(terminal.is_terminal());
            for next in [Pending, Active, Paused, Cancelled, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_is_current_respects_window() {
        let now = Utc::now();
        let mut membership = Membership {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            status: MembershipStatus::Active,
            starts_at: Some(now - Duration::days(1)),
            ends_at: Some(now + Duration::days(29)),
            auto_renew: true,
            activated_at: Some(now - Duration::days(1)),
            paused_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        assert!(membership.is_current(now));

        membership.ends_at = Some(now - Duration::minutes(1));
        assert!(!membership.is_current(now));

        membership.ends_at = None;
        membership.status = MembershipStatus::Paused;
        assert!(!membership.is_current(now));
    }
}
