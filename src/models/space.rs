use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    HotDesk,
    DedicatedDesk,
    PrivateOffice,
    MeetingRoom,
    EventSpace,
    PhoneBooth,
}

impl SpaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceType::HotDesk => "hot_desk",
            SpaceType::DedicatedDesk => "dedicated_desk",
            SpaceType::PrivateOffice => "private_office",
            SpaceType::MeetingRoom => "meeting_room",
            SpaceType::EventSpace => "event_space",
            SpaceType::PhoneBooth => "phone_booth",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Space {
    pub id: Uuid,
    pub name: String,
    pub space_type: SpaceType,
    pub capacity: i32,
    pub floor: Option<String>,
    pub hourly_rate_cents: i64,
    pub amenities: JsonValue, // JSONB array of strings
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateSpaceData {
    pub name: String,
    pub space_type: SpaceType,
    pub capacity: i32,
    pub floor: Option<String>,
    pub hourly_rate_cents: i64,
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateSpaceData {
    pub name: Option<String>,
    pub space_type: Option<SpaceType>,
    pub capacity: Option<i32>,
    pub floor: Option<String>,
    pub hourly_rate_cents: Option<i64>,
    pub amenities: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl Space {
    pub async fn create(pool: &PgPool, data: CreateSpaceData) -> Result<Self, sqlx::Error> {
        let space = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO spaces (name, space_type, capacity, floor, hourly_rate_cents, amenities)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(data.space_type)
        .bind(data.capacity)
        .bind(&data.floor)
        .bind(data.hourly_rate_cents)
        .bind(serde_json::json!(data.amenities))
        .fetch_one(pool)
        .await?;

        Ok(space)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let space = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM spaces WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(space)
    }

    /// Locks the space row for the rest of the transaction so overlapping
    /// bookings of the same space serialize.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM spaces WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        space_type: Option<SpaceType>,
        active_only: bool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let spaces = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM spaces
            WHERE ($1::text IS NULL OR space_type = $1)
              AND (NOT $2 OR is_active = TRUE)
            ORDER BY name ASC
            "#,
        )
        .bind(space_type)
        .bind(active_only)
        .fetch_all(pool)
        .await?;

        Ok(spaces)
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateSpaceData,
    ) -> Result<Option<Self>, sqlx::Error> {
        let space = sqlx::query_as::<_, Self>(
            r#"
            UPDATE spaces
            SET
                name = COALESCE($2, name),
                space_type = COALESCE($3, space_type),
                capacity = COALESCE($4, capacity),
                floor = COALESCE($5, floor),
                hourly_rate_cents = COALESCE($6, hourly_rate_cents),
                amenities = COALESCE($7, amenities),
                is_active = COALESCE($8, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.space_type)
        .bind(data.capacity)
        .bind(data.floor)
        .bind(data.hourly_rate_cents)
        .bind(data.amenities.map(|a| serde_json::json!(a)))
        .bind(data.is_active)
        .fetch_optional(pool)
        .await?;

        Ok(space)
    }

    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE spaces
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
