use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// Statuses that hold the resource for their time window.
    pub fn holds_resource(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::CheckedIn
        )
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;

        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, CheckedIn)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
                | (CheckedIn, Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub space_id: Option<Uuid>,
    pub equipment_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub attendee_count: i32,
    pub notes: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateBookingData {
    pub user_id: Uuid,
    pub space_id: Option<Uuid>,
    pub equipment_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub attendee_count: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub user_id: Option<Uuid>,
    pub space_id: Option<Uuid>,
    pub equipment_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Occupied interval of a resource, as exposed by availability queries.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OccupiedSlot {
    pub booking_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: BookingStatus,
}

impl Booking {
    pub fn duration_hours(&self) -> f64 {
        (self.ends_at - self.starts_at).num_minutes() as f64 / 60.0
    }

    pub async fn create(
        conn: &mut PgConnection,
        data: CreateBookingData,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO bookings (
                user_id, space_id, equipment_id, starts_at, ends_at, status, attendee_count, notes
            )
            VALUES ($1, $2, $3, $4, $5, 'confirmed', $6, $7)
            RETURNING *
            "#,
        )
        .bind(data.user_id)
        .bind(data.space_id)
        .bind(data.equipment_id)
        .bind(data.starts_at)
        .bind(data.ends_at)
        .bind(data.attendee_count)
        .bind(&data.notes)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let booking = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bookings WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(booking)
    }

    pub async fn list(
        pool: &PgPool,
        filter: &BookingFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let bookings = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bookings
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::uuid IS NULL OR space_id = $2)
              AND ($3::uuid IS NULL OR equipment_id = $3)
              AND ($4::text IS NULL OR status = $4)
              AND ($5::timestamptz IS NULL OR ends_at > $5)
              AND ($6::timestamptz IS NULL OR starts_at < $6)
            ORDER BY starts_at ASC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.space_id)
        .bind(filter.equipment_id)
        .bind(filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(bookings)
    }

    /// Counts bookings holding the same resource over an overlapping half-open window.
    pub async fn count_overlapping(
        conn: &mut PgConnection,
        space_id: Option<Uuid>,
        equipment_id: Option<Uuid>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        exclude_booking_id: Option<Uuid>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM bookings
            WHERE status IN ('pending', 'confirmed', 'checked_in')
              AND (($1::uuid IS NOT NULL AND space_id = $1)
                   OR ($2::uuid IS NOT NULL AND equipment_id = $2))
              AND starts_at < $4
              AND ends_at > $3
              AND ($5::uuid IS NULL OR id <> $5)
            "#,
        )
        .bind(space_id)
        .bind(equipment_id)
        .bind(starts_at)
        .bind(ends_at)
        .bind(exclude_booking_id)
        .fetch_one(conn)
        .await
    }

    /// Minutes already booked by a user inside `[week_start, week_end)`.
    pub async fn booked_minutes_in_range(
        conn: &mut PgConnection,
        user_id: Uuid,
        week_start: DateTime<Utc>,
        week_end: DateTime<Utc>,
        exclude_booking_id: Option<Uuid>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(EXTRACT(EPOCH FROM (ends_at - starts_at)) / 60), 0)::BIGINT
            FROM bookings
            WHERE user_id = $1
              AND status IN ('pending', 'confirmed', 'checked_in', 'completed')
              AND starts_at >= $2
              AND starts_at < $3
              AND ($4::uuid IS NULL OR id <> $4)
            "#,
        )
        .bind(user_id)
        .bind(week_start)
        .bind(week_end)
        .bind(exclude_booking_id)
        .fetch_one(conn)
        .await
    }

    pub async fn occupied_slots(
        pool: &PgPool,
        space_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OccupiedSlot>, sqlx::Error> {
        sqlx::query_as::<_, OccupiedSlot>(
            r#"
            SELECT id AS booking_id, starts_at, ends_at, status FROM bookings
            WHERE space_id = $1
              AND status IN ('pending', 'confirmed', 'checked_in')
              AND starts_at < $3
              AND ends_at > $2
            ORDER BY starts_at ASC
            "#,
        )
        .bind(space_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
    }

    /// A confirmed or checked-in booking of the space covering `now`, counting
    /// `early_minutes` of grace before the start.
    pub async fn find_covering(
        pool: &PgPool,
        user_id: Uuid,
        space_id: Uuid,
        now: DateTime<Utc>,
        early_minutes: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bookings
            WHERE user_id = $1
              AND space_id = $2
              AND status IN ('confirmed', 'checked_in')
              AND starts_at - make_interval(mins => $4) <= $3
              AND ends_at > $3
            ORDER BY starts_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(space_id)
        .bind(now)
        .bind(early_minutes)
        .fetch_optional(pool)
        .await
    }

    pub async fn reschedule(
        conn: &mut PgConnection,
        id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        attendee_count: i32,
        notes: Option<String>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE bookings
            SET
                starts_at = $2,
                ends_at = $3,
                attendee_count = $4,
                notes = COALESCE($5, notes),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'confirmed')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(starts_at)
        .bind(ends_at)
        .bind(attendee_count)
        .bind(notes)
        .fetch_optional(conn)
        .await
    }

    /// Cancels the booking if it is still in `expected`. `None` when the status moved.
    pub async fn cancel(
        pool: &PgPool,
        id: Uuid,
        expected: BookingStatus,
        reason: Option<String>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE bookings
            SET
                status = 'cancelled',
                cancelled_at = NOW(),
                cancellation_reason = $3,
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

    pub async fn check_in(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE bookings
            SET status = 'checked_in', checked_in_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'confirmed'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Confirmed bookings that started more than `grace_minutes` ago without a check-in.
    pub async fn mark_no_shows(
        pool: &PgPool,
        now: DateTime<Utc>,
        grace_minutes: i32,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE bookings
            SET status = 'no_show', updated_at = NOW()
            WHERE status = 'confirmed'
              AND starts_at + make_interval(mins => $2) < $1
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(grace_minutes)
        .fetch_all(pool)
        .await
    }

    pub async fn complete_finished(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'completed', updated_at = NOW()
            WHERE status = 'checked_in' AND ends_at <= $1
            "#,
        )
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_transitions() {
        use BookingStatus::*;

        assert!(Confirmed.can_transition_to(CheckedIn));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(CheckedIn.can_transition_to(Completed));
        assert!(!CheckedIn.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!NoShow.can_transition_to(CheckedIn));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn test_holds_resource() {
        assert!(BookingStatus::Confirmed.holds_resource());
        assert!(BookingStatus::CheckedIn.holds_resource());
        assert!(!BookingStatus::Cancelled.holds_resource());
        assert!(!BookingStatus::NoShow.holds_resource());
    }
}
