use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::space::SpaceType;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessTier {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub monthly_price_cents: i64,
    pub max_booking_hours_per_week: Option<i32>, // NULL means unlimited
    pub max_advance_booking_days: i32,
    pub allowed_space_types: Vec<String>,
    pub access_start_hour: i16,
    pub access_end_hour: i16,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTierData {
    pub name: String,
    pub description: Option<String>,
    pub monthly_price_cents: i64,
    pub max_booking_hours_per_week: Option<i32>,
    pub max_advance_booking_days: i32,
    pub allowed_space_types: Vec<SpaceType>,
    pub access_start_hour: i16,
    pub access_end_hour: i16,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTierData {
    pub name: Option<String>,
    pub description: Option<String>,
    pub monthly_price_cents: Option<i64>,
    pub max_booking_hours_per_week: Option<i32>,
    pub max_advance_booking_days: Option<i32>,
    pub allowed_space_types: Option<Vec<SpaceType>>,
    pub access_start_hour: Option<i16>,
    pub access_end_hour: Option<i16>,
    pub is_active: Option<bool>,
}

fn space_type_names(types: &[SpaceType]) -> Vec<String> {
    types.iter().map(|t| t.as_str().to_string()).collect()
}

impl AccessTier {
    pub fn allows_space_type(&self, space_type: SpaceType) -> bool {
        self.allowed_space_types
            .iter()
            .any(|t| t == space_type.as_str())
    }

    pub async fn create(pool: &PgPool, data: CreateTierData) -> Result<Self, sqlx::Error> {
        let tier = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO access_tiers (
                name, description, monthly_price_cents, max_booking_hours_per_week,
                max_advance_booking_days, allowed_space_types, access_start_hour, access_end_hour
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.monthly_price_cents)
        .bind(data.max_booking_hours_per_week)
        .bind(data.max_advance_booking_days)
        .bind(space_type_names(&data.allowed_space_types))
        .bind(data.access_start_hour)
        .bind(data.access_end_hour)
        .fetch_one(pool)
        .await?;

        Ok(tier)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let tier = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM access_tiers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(tier)
    }

    pub async fn list(pool: &PgPool, include_inactive: bool) -> Result<Vec<Self>, sqlx::Error> {
        let query = if include_inactive {
            r#"
            SELECT * FROM access_tiers
            ORDER BY monthly_price_cents ASC, name ASC
            "#
        } else {
            r#"
            SELECT * FROM access_tiers
            WHERE is_active = TRUE
            ORDER BY monthly_price_cents ASC, name ASC
            "#
        };

        let tiers = sqlx::query_as::<_, Self>(query).fetch_all(pool).await?;

        Ok(tiers)
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateTierData,
    ) -> Result<Option<Self>, sqlx::Error> {
        let tier = sqlx::query_as::<_, Self>(
            r#"
            UPDATE access_tiers
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                monthly_price_cents = COALESCE($4, monthly_price_cents),
                max_booking_hours_per_week = COALESCE($5, max_booking_hours_per_week),
                max_advance_booking_days = COALESCE($6, max_advance_booking_days),
                allowed_space_types = COALESCE($7, allowed_space_types),
                access_start_hour = COALESCE($8, access_start_hour),
                access_end_hour = COALESCE($9, access_end_hour),
                is_active = COALESCE($10, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.description)
        .bind(data.monthly_price_cents)
        .bind(data.max_booking_hours_per_week)
        .bind(data.max_advance_booking_days)
        .bind(data.allowed_space_types.as_deref().map(space_type_names))
        .bind(data.access_start_hour)
        .bind(data.access_end_hour)
        .bind(data.is_active)
        .fetch_optional(pool)
        .await?;

        Ok(tier)
    }

    /// Soft delete; memberships on the tier keep referencing it.
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE access_tiers
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

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(allowed: &[&str]) -> AccessTier {
        AccessTier {
            id: Uuid::new_v4(),
            name: "Flex".to_string(),
            description: None,
            monthly_price_cents: 19900,
            max_booking_hours_per_week: Some(10),
            max_advance_booking_days: 14,
            allowed_space_types: allowed.iter().map(|s| s.to_string()).collect(),
            access_start_hour: 8,
            access_end_hour: 20,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_allows_space_type() {
        let t = tier(&["hot_desk", "phone_booth"]);
        assert!(t.allows_space_type(SpaceType::HotDesk));
        assert!(t.allows_space_type(SpaceType::PhoneBooth));
        assert!(!t.allows_space_type(SpaceType::PrivateOffice));
    }
}
