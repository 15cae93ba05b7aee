use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    Available,
    InUse,
    Maintenance,
    Retired,
}

impl EquipmentStatus {
    pub fn is_bookable(&self) -> bool {
        matches!(self, EquipmentStatus::Available | EquipmentStatus::InUse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Equipment {
    pub id: Uuid,
    pub name: String,
    pub equipment_type: String,
    pub serial_number: Option<String>,
    pub space_id: Option<Uuid>,
    pub status: EquipmentStatus,
    pub required_certification: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateEquipmentData {
    pub name: String,
    pub equipment_type: String,
    pub serial_number: Option<String>,
    pub space_id: Option<Uuid>,
    pub required_certification: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateEquipmentData {
    pub name: Option<String>,
    pub equipment_type: Option<String>,
    pub serial_number: Option<String>,
    pub space_id: Option<Uuid>,
    pub status: Option<EquipmentStatus>,
    pub required_certification: Option<String>,
}

impl Equipment {
    pub async fn create(pool: &PgPool, data: CreateEquipmentData) -> Result<Self, sqlx::Error> {
        let equipment = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO equipments (name, equipment_type, serial_number, space_id, required_certification)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(&data.equipment_type)
        .bind(&data.serial_number)
        .bind(data.space_id)
        .bind(&data.required_certification)
        .fetch_one(pool)
        .await?;

        Ok(equipment)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let equipment = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM equipments WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(equipment)
    }

    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM equipments WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        space_id: Option<Uuid>,
        status: Option<EquipmentStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let equipment = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM equipments
            WHERE ($1::uuid IS NULL OR space_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY name ASC
            "#,
        )
        .bind(space_id)
        .bind(status)
        .fetch_all(pool)
        .await?;

        Ok(equipment)
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateEquipmentData,
    ) -> Result<Option<Self>, sqlx::Error> {
        let equipment = sqlx::query_as::<_, Self>(
            r#"
            UPDATE equipments
            SET
                name = COALESCE($2, name),
                equipment_type = COALESCE($3, equipment_type),
                serial_number = COALESCE($4, serial_number),
                space_id = COALESCE($5, space_id),
                status = COALESCE($6, status),
                required_certification = COALESCE($7, required_certification),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.equipment_type)
        .bind(data.serial_number)
        .bind(data.space_id)
        .bind(data.status)
        .bind(data.required_certification)
        .fetch_optional(pool)
        .await?;

        Ok(equipment)
    }

    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: EquipmentStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE equipments
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bookable_statuses() {
        assert!(EquipmentStatus::Available.is_bookable());
        assert!(EquipmentStatus::InUse.is_bookable());
        assert!(!EquipmentStatus::Maintenance.is_bookable());
        assert!(!EquipmentStatus::Retired.is_bookable());
    }
}
