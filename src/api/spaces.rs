use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{auth::require_staff, AppState, AuthenticatedUser, RequestMeta};
use crate::api::required_text;
use crate::error::{AppError, Result};
use crate::models::{
    booking::{Booking, OccupiedSlot},
    space::{CreateSpaceData, Space, SpaceType, UpdateSpaceData},
};
use crate::services::audit;

#[derive(Debug, Deserialize)]
struct SpaceListQuery {
    #[serde(rename = "type")]
    space_type: Option<SpaceType>,
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CreateSpaceRequest {
    name: String,
    space_type: SpaceType,
    capacity: i32,
    floor: Option<String>,
    #[serde(default)]
    hourly_rate_cents: i64,
    #[serde(default)]
    amenities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateSpaceRequest {
    name: Option<String>,
    space_type: Option<SpaceType>,
    capacity: Option<i32>,
    floor: Option<String>,
    hourly_rate_cents: Option<i64>,
    amenities: Option<Vec<String>>,
    is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    date: NaiveDate,
}

#[derive(Debug, Serialize)]
struct AvailabilityResponse {
    space_id: Uuid,
    date: NaiveDate,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    occupied: Vec<OccupiedSlot>,
}

pub fn router() -> Router<AppState> {
    let staff = Router::new()
        .route("/spaces", post(create_space))
        .route("/spaces/:id", patch(update_space).delete(deactivate_space))
        .route_layer(from_fn(require_staff));

    Router::new()
        .route("/spaces", get(list_spaces))
        .route("/spaces/:id", get(get_space))
        .route("/spaces/:id/availability", get(availability))
        .merge(staff)
}

fn validate_space_numbers(capacity: Option<i32>, hourly_rate_cents: Option<i64>) -> Result<()> {
    if matches!(capacity, Some(c) if c < 1) {
        return Err(AppError::Validation(
            "capacity must be at least 1".to_string(),
        ));
    }
    if matches!(hourly_rate_cents, Some(r) if r < 0) {
        return Err(AppError::Validation(
            "hourly_rate_cents cannot be negative".to_string(),
        ));
    }
    Ok(())
}

/// UTC bounds of a facility-local calendar day.
pub fn local_day_bounds(date: NaiveDate, utc_offset_minutes: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    let from = local_midnight - Duration::minutes(utc_offset_minutes as i64);
    (from, from + Duration::days(1))
}

async fn list_spaces(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<SpaceListQuery>,
) -> Result<Json<Vec<Space>>> {
    // Only staff can see inactive spaces.
    let active_only = query.active.unwrap_or(true) || !user.is_staff();
    Ok(Json(
        Space::list(&state.pool, query.space_type, active_only).await?,
    ))
}

async fn get_space(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Space>> {
    Space::find_by_id(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Space"))
}

/// Occupied intervals of a space during one facility-local day
async fn availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>> {
    let space = Space::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Space"))?;

    let (from, to) = local_day_bounds(query.date, state.config.facility_utc_offset_minutes);
    let occupied = Booking::occupied_slots(&state.pool, space.id, from, to).await?;

    Ok(Json(AvailabilityResponse {
        space_id: space.id,
        date: query.date,
        from,
        to,
        occupied,
    }))
}

async fn create_space(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<CreateSpaceRequest>,
) -> Result<(StatusCode, Json<Space>)> {
    let name = required_text("name", &body.name)?;
    validate_space_numbers(Some(body.capacity), Some(body.hourly_rate_cents))?;

    let space = Space::create(
        &state.pool,
        CreateSpaceData {
            name,
            space_type: body.space_type,
            capacity: body.capacity,
            floor: body.floor,
            hourly_rate_cents: body.hourly_rate_cents,
            amenities: body.amenities,
        },
    )
    .await?;

    tracing::info!(space_id = %space.id, space_type = space.space_type.as_str(), "Space created");
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "space.create",
        Some(space.id),
        serde_json::to_value(&space).ok(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(space)))
}

async fn update_space(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSpaceRequest>,
) -> Result<Json<Space>> {
    let name = body
        .name
        .as_deref()
        .map(|n| required_text("name", n))
        .transpose()?;
    validate_space_numbers(body.capacity, body.hourly_rate_cents)?;

    let changes = json!({
        "name": name,
        "space_type": body.space_type,
        "capacity": body.capacity,
        "floor": body.floor,
        "hourly_rate_cents": body.hourly_rate_cents,
        "amenities": body.amenities,
        "is_active": body.is_active,
    });

    let space = Space::update(
        &state.pool,
        id,
        UpdateSpaceData {
            name,
            space_type: body.space_type,
            capacity: body.capacity,
            floor: body.floor,
            hourly_rate_cents: body.hourly_rate_cents,
            amenities: body.amenities,
            is_active: body.is_active,
        },
    )
    .await?
    .ok_or_else(|| AppError::not_found("Space"))?;

    audit::record(&state.pool, &meta.audit(&user), "space.update", Some(id), Some(changes)).await;

    Ok(Json(space))
}

async fn deactivate_space(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !Space::deactivate(&state.pool, id).await? {
        return Err(AppError::not_found("Space"));
    }

    tracing::info!(space_id = %id, "Space deactivated");
    audit::record(&state.pool, &meta.audit(&user), "space.deactivate", Some(id), None).await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_day_bounds() {
        let date = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();

        let (from, to) = local_day_bounds(date, 0);
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 9, 3, 0, 0, 0).unwrap());

        // UTC+2: local midnight is 22:00 UTC the day before
        let (from, _) = local_day_bounds(date, 120);
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 9, 1, 22, 0, 0).unwrap());
    }

    #[test]
    fn test_space_numbers() {
        assert!(validate_space_numbers(Some(1), Some(0)).is_ok());
        assert!(validate_space_numbers(Some(0), None).is_err());
        assert!(validate_space_numbers(None, Some(-5)).is_err());
    }
}
