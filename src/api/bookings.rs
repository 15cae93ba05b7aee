use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{AppState, AuthenticatedUser, RequestMeta};
use crate::api::{Page, Pagination};
use crate::error::{AppError, Result};
use crate::models::{
    booking::{Booking, BookingFilter, BookingStatus},
    user::Role,
};
use crate::services::{
    audit,
    booking_rules::{self, BookingRequest, BookingTarget},
    notifier::{self, BookingEvent},
};

#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    space_id: Option<Uuid>,
    equipment_id: Option<Uuid>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    #[serde(default = "default_attendees")]
    attendee_count: i32,
    notes: Option<String>,
    user_id: Option<Uuid>,
}

fn default_attendees() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
struct RescheduleRequest {
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    attendee_count: Option<i32>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookingListQuery {
    user_id: Option<Uuid>,
    space_id: Option<Uuid>,
    equipment_id: Option<Uuid>,
    status: Option<BookingStatus>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/me", get(my_bookings))
        .route("/bookings/:id", get(get_booking).patch(reschedule_booking))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/bookings/:id/check-in", post(check_in_booking))
}

fn ensure_transition(booking: &Booking, next: BookingStatus) -> Result<()> {
    if !booking.status.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "Cannot move booking from {} to {}",
            booking.status.as_str(),
            next.as_str()
        )));
    }
    Ok(())
}

fn validate_attendees(attendee_count: i32) -> Result<()> {
    if attendee_count < 1 {
        return Err(AppError::Validation(
            "attendee_count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

async fn load(state: &AppState, id: Uuid) -> Result<Booking> {
    Booking::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Booking"))
}

async fn create_booking(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>)> {
    let booking_user = body.user_id.unwrap_or(user.user_id);
    if booking_user != user.user_id {
        user.authorize(Role::Staff)?;
    }
    validate_attendees(body.attendee_count)?;

    let request = BookingRequest {
        user_id: booking_user,
        target: BookingTarget::from_ids(body.space_id, body.equipment_id)?,
        starts_at: body.starts_at,
        ends_at: body.ends_at,
        attendee_count: body.attendee_count,
        notes: body.notes,
    };
    let booking = booking_rules::create_booking(&state.pool, request, Utc::now()).await?;

    notifier::booking_event(&state.pool, BookingEvent::Confirmed, &booking).await;
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "booking.create",
        Some(booking.id),
        Some(json!({
            "user_id": booking.user_id,
            "space_id": booking.space_id,
            "equipment_id": booking.equipment_id,
            "starts_at": booking.starts_at,
            "ends_at": booking.ends_at,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(booking)))
}

async fn my_bookings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<BookingListQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<Booking>>> {
    let filter = BookingFilter {
        user_id: Some(user.user_id),
        space_id: query.space_id,
        equipment_id: query.equipment_id,
        status: query.status,
        from: query.from,
        to: query.to,
    };
    let bookings =
        Booking::list(&state.pool, &filter, pagination.limit(), pagination.offset()).await?;

    Ok(Json(Page::new(bookings, pagination)))
}

async fn list_bookings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<BookingListQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<Booking>>> {
    user.authorize(Role::Staff)?;

    let filter = BookingFilter {
        user_id: query.user_id,
        space_id: query.space_id,
        equipment_id: query.equipment_id,
        status: query.status,
        from: query.from,
        to: query.to,
    };
    let bookings =
        Booking::list(&state.pool, &filter, pagination.limit(), pagination.offset()).await?;

    Ok(Json(Page::new(bookings, pagination)))
}

async fn get_booking(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    let booking = load(&state, id).await?;
    user.can_access(booking.user_id)?;
    Ok(Json(booking))
}

/// Moves a booking; every booking rule runs again with the booking itself excluded.
async fn reschedule_booking(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    Json(body): Json<RescheduleRequest>,
) -> Result<Json<Booking>> {
    let booking = load(&state, id).await?;
    user.can_access(booking.user_id)?;

    if !matches!(
        booking.status,
        BookingStatus::Pending | BookingStatus::Confirmed
    ) {
        return Err(AppError::Conflict(format!(
            "A {} booking cannot be rescheduled",
            booking.status.as_str()
        )));
    }

    let attendee_count = body.attendee_count.unwrap_or(booking.attendee_count);
    validate_attendees(attendee_count)?;

    let updated = booking_rules::reschedule_booking(
        &state.pool,
        &booking,
        body.starts_at.unwrap_or(booking.starts_at),
        body.ends_at.unwrap_or(booking.ends_at),
        attendee_count,
        body.notes,
        Utc::now(),
    )
    .await?;

    notifier::booking_event(&state.pool, BookingEvent::Rescheduled, &updated).await;
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "booking.reschedule",
        Some(id),
        Some(json!({
            "from": { "starts_at": booking.starts_at, "ends_at": booking.ends_at },
            "to": { "starts_at": updated.starts_at, "ends_at": updated.ends_at },
        })),
    )
    .await;

    Ok(Json(updated))
}

async fn cancel_booking(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Booking>> {
    let booking = load(&state, id).await?;
    user.can_access(booking.user_id)?;
    ensure_transition(&booking, BookingStatus::Cancelled)?;

    let reason = body.and_then(|Json(b)| b.reason);
    let booking = Booking::cancel(&state.pool, id, booking.status, reason.clone())
        .await?
        .ok_or_else(|| AppError::status_changed("Booking"))?;

    tracing::info!(booking_id = %id, "Booking cancelled");
    notifier::booking_event(&state.pool, BookingEvent::Cancelled, &booking).await;
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "booking.cancel",
        Some(id),
        Some(json!({ "reason": reason })),
    )
    .await;

    Ok(Json(booking))
}

async fn check_in_booking(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    let booking = load(&state, id).await?;
    user.can_access(booking.user_id)?;
    ensure_transition(&booking, BookingStatus::CheckedIn)?;

    if !booking_rules::check_in_open(&booking, Utc::now()) {
        return Err(AppError::Validation(format!(
            "Check-in opens {} minutes before the booking starts and closes when it ends",
            booking_rules::CHECK_IN_EARLY_MINUTES
        )));
    }

    let booking = Booking::check_in(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::status_changed("Booking"))?;

    tracing::info!(booking_id = %id, "Booking checked in");
    audit::record(&state.pool, &meta.audit(&user), "booking.check_in", Some(id), None).await;

    Ok(Json(booking))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn booking(status: BookingStatus) -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            space_id: Some(Uuid::new_v4()),
            equipment_id: None,
            starts_at: now + Duration::hours(1),
            ends_at: now + Duration::hours(2),
            status,
            attendee_count: 1,
            notes: None,
            checked_in_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_completed_booking_cannot_be_cancelled() {
        let err = ensure_transition(&booking(BookingStatus::Completed), BookingStatus::Cancelled)
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(ensure_transition(&booking(BookingStatus::Confirmed), BookingStatus::Cancelled).is_ok());
    }

    #[test]
    fn test_attendee_count_must_be_positive() {
        assert!(validate_attendees(0).is_err());
        assert!(validate_attendees(4).is_ok());
    }
}
