use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{AppState, AuthenticatedUser, RequestMeta};
use crate::api::required_text;
use crate::error::{AppError, Result};
use crate::models::{
    access_tier::{AccessTier, CreateTierData, UpdateTierData},
    space::SpaceType,
    user::Role,
};
use crate::services::audit;

#[derive(Debug, Deserialize)]
struct TierListQuery {
    #[serde(default)]
    include_inactive: bool,
}

#[derive(Debug, Deserialize)]
struct CreateTierRequest {
    name: String,
    description: Option<String>,
    monthly_price_cents: i64,
    max_booking_hours_per_week: Option<i32>,
    #[serde(default = "default_advance_days")]
    max_advance_booking_days: i32,
    #[serde(default)]
    allowed_space_types: Vec<SpaceType>,
    #[serde(default)]
    access_start_hour: i16,
    #[serde(default = "default_end_hour")]
    access_end_hour: i16,
}

fn default_advance_days() -> i32 {
    14
}

fn default_end_hour() -> i16 {
    24
}

#[derive(Debug, Deserialize)]
struct UpdateTierRequest {
    name: Option<String>,
    description: Option<String>,
    monthly_price_cents: Option<i64>,
    max_booking_hours_per_week: Option<i32>,
    max_advance_booking_days: Option<i32>,
    allowed_space_types: Option<Vec<SpaceType>>,
    access_start_hour: Option<i16>,
    access_end_hour: Option<i16>,
    is_active: Option<bool>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tiers", get(list_tiers).post(create_tier))
        .route(
            "/tiers/:id",
            get(get_tier).patch(update_tier).delete(deactivate_tier),
        )
}

fn validate_hour(field: &str, hour: i16) -> Result<()> {
    if !(0..=24).contains(&hour) {
        return Err(AppError::Validation(format!(
            "{} must be between 0 and 24",
            field
        )));
    }
    Ok(())
}

fn validate_non_negative(field: &str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(AppError::Validation(format!("{} cannot be negative", field)));
    }
    Ok(())
}

fn validate_limits(
    monthly_price_cents: Option<i64>,
    max_booking_hours_per_week: Option<i32>,
    max_advance_booking_days: Option<i32>,
    access_start_hour: Option<i16>,
    access_end_hour: Option<i16>,
) -> Result<()> {
    if let Some(v) = monthly_price_cents {
        validate_non_negative("monthly_price_cents", v)?;
    }
    if let Some(v) = max_booking_hours_per_week {
        validate_non_negative("max_booking_hours_per_week", v as i64)?;
    }
    if let Some(v) = max_advance_booking_days {
        validate_non_negative("max_advance_booking_days", v as i64)?;
    }
    if let Some(h) = access_start_hour {
        validate_hour("access_start_hour", h)?;
    }
    if let Some(h) = access_end_hour {
        validate_hour("access_end_hour", h)?;
    }
    Ok(())
}

async fn list_tiers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<TierListQuery>,
) -> Result<Json<Vec<AccessTier>>> {
    let include_inactive = query.include_inactive && user.is_staff();
    Ok(Json(AccessTier::list(&state.pool, include_inactive).await?))
}

async fn get_tier(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccessTier>> {
    AccessTier::find_by_id(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Tier"))
}

async fn create_tier(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<CreateTierRequest>,
) -> Result<(StatusCode, Json<AccessTier>)> {
    user.authorize(Role::Admin)?;

    let name = required_text("name", &body.name)?;
    validate_limits(
        Some(body.monthly_price_cents),
        body.max_booking_hours_per_week,
        Some(body.max_advance_booking_days),
        Some(body.access_start_hour),
        Some(body.access_end_hour),
    )?;

    let tier = AccessTier::create(
        &state.pool,
        CreateTierData {
            name,
            description: body.description,
            monthly_price_cents: body.monthly_price_cents,
            max_booking_hours_per_week: body.max_booking_hours_per_week,
            max_advance_booking_days: body.max_advance_booking_days,
            allowed_space_types: body.allowed_space_types,
            access_start_hour: body.access_start_hour,
            access_end_hour: body.access_end_hour,
        },
    )
    .await?;

    tracing::info!(tier_id = %tier.id, name = %tier.name, "Tier created");
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "tier.create",
        Some(tier.id),
        serde_json::to_value(&tier).ok(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(tier)))
}

async fn update_tier(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTierRequest>,
) -> Result<Json<AccessTier>> {
    user.authorize(Role::Admin)?;

    let name = body
        .name
        .as_deref()
        .map(|n| required_text("name", n))
        .transpose()?;
    validate_limits(
        body.monthly_price_cents,
        body.max_booking_hours_per_week,
        body.max_advance_booking_days,
        body.access_start_hour,
        body.access_end_hour,
    )?;

    let changes = json!({
        "name": name,
        "monthly_price_cents": body.monthly_price_cents,
        "max_booking_hours_per_week": body.max_booking_hours_per_week,
        "max_advance_booking_days": body.max_advance_booking_days,
        "allowed_space_types": body.allowed_space_types,
        "access_start_hour": body.access_start_hour,
        "access_end_hour": body.access_end_hour,
        "is_active": body.is_active,
    });

    let tier = AccessTier::update(
        &state.pool,
        id,
        UpdateTierData {
            name,
            description: body.description,
            monthly_price_cents: body.monthly_price_cents,
            max_booking_hours_per_week: body.max_booking_hours_per_week,
            max_advance_booking_days: body.max_advance_booking_days,
            allowed_space_types: body.allowed_space_types,
            access_start_hour: body.access_start_hour,
            access_end_hour: body.access_end_hour,
            is_active: body.is_active,
        },
    )
    .await?
    .ok_or_else(|| AppError::not_found("Tier"))?;

    audit::record(&state.pool, &meta.audit(&user), "tier.update", Some(id), Some(changes)).await;

    Ok(Json(tier))
}

async fn deactivate_tier(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    user.authorize(Role::Admin)?;

    if !AccessTier::deactivate(&state.pool, id).await? {
        return Err(AppError::not_found("Tier"));
    }

    tracing::info!(tier_id = %id, "Tier deactivated");
    audit::record(&state.pool, &meta.audit(&user), "tier.deactivate", Some(id), None).await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hours_must_be_in_range() {
        assert!(validate_limits(None, None, None, Some(0), Some(24)).is_ok());
        assert!(validate_limits(None, None, None, Some(-1), None).is_err());
        assert!(validate_limits(None, None, None, None, Some(25)).is_err());
    }

    #[test]
    fn test_negative_limits_rejected() {
        assert!(validate_limits(Some(-100), None, None, None, None).is_err());
        assert!(validate_limits(None, Some(-1), None, None, None).is_err());
        assert!(validate_limits(Some(0), Some(0), Some(0), None, None).is_ok());
    }
}
