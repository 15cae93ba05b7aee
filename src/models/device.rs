use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    DoorReader,
    Turnstile,
    Kiosk,
    Locker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Pending,
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub device_type: DeviceType,
    pub space_id: Option<Uuid>, // NULL for lobby/perimeter devices
    pub location: Option<String>,
    pub status: DeviceStatus,
    #[serde(skip_serializing)]
    pub api_key_hash: Option<String>, // SHA-256 hex of the device key
    pub activated_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDeviceData {
    pub name: String,
    pub device_type: DeviceType,
    pub space_id: Option<Uuid>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateDeviceData {
    pub name: Option<String>,
    pub device_type: Option<DeviceType>,
    pub space_id: Option<Uuid>,
    pub location: Option<String>,
}

impl Device {
    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }

    pub async fn create(pool: &PgPool, data: CreateDeviceData) -> Result<Self, sqlx::Error> {
        let device = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO devices (name, device_type, space_id, location)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(data.device_type)
        .bind(data.space_id)
        .bind(&data.location)
        .fetch_one(pool)
        .await?;

        Ok(device)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let device = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM devices WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(device)
    }

    pub async fn find_by_key_hash(
        pool: &PgPool,
        key_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let device = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM devices WHERE api_key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(pool)
        .await?;

        Ok(device)
    }

    pub async fn list(
        pool: &PgPool,
        space_id: Option<Uuid>,
        status: Option<DeviceStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let devices = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM devices
            WHERE ($1::uuid IS NULL OR space_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY name ASC
            "#,
        )
        .bind(space_id)
        .bind(status)
        .fetch_all(pool)
        .await?;

        Ok(devices)
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateDeviceData,
    ) -> Result<Option<Self>, sqlx::Error> {
        let device = sqlx::query_as::<_, Self>(
            r#"
            UPDATE devices
            SET
                name = COALESCE($2, name),
                device_type = COALESCE($3, device_type),
                space_id = COALESCE($4, space_id),
                location = COALESCE($5, location),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.device_type)
        .bind(data.space_id)
        .bind(data.location)
        .fetch_optional(pool)
        .await?;

        Ok(device)
    }

    /// Stores a new key hash and marks the device active. Rotates any previous key.
    pub async fn activate(pool: &PgPool, id: Uuid, key_hash: &str) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE devices
            SET
                status = 'active',
                api_key_hash = $2,
                activated_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(key_hash)
        .fetch_one(pool)
        .await
    }

    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE devices
            SET status = 'disabled', updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn touch(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE devices SET last_seen_at = NOW() WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM devices WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
