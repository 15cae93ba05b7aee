use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{
    access_tier::AccessTier,
    booking::{Booking, CreateBookingData},
    equipment::Equipment,
    membership::Membership,
    space::Space,
    user::User,
    user_certification::UserCertification,
};

pub const MIN_BOOKING_MINUTES: i64 = 15;
pub const MAX_BOOKING_HOURS: i64 = 12;
/// How far in the past a booking may start, to absorb client clock skew.
pub const PAST_START_TOLERANCE_MINUTES: i64 = 5;
pub const CHECK_IN_EARLY_MINUTES: i64 = 15;

#[derive(thiserror::Error, Debug)]
pub enum BookingError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("A booking targets exactly one of space_id or equipment_id")]
    InvalidTarget,

    #[error("{0}")]
    InvalidWindow(String),

    #[error("Booking user has no active membership")]
    NoActiveMembership,

    #[error("Bookings can be made at most {0} days in advance")]
    TooFarAhead(i32),

    #[error("Space not found")]
    SpaceNotFound,

    #[error("Equipment not found")]
    EquipmentNotFound,

    #[error("{0}")]
    ResourceUnavailable(String),

    #[error("Membership tier does not include {0} spaces")]
    SpaceTypeNotAllowed(String),

    #[error("Attendee count {requested} exceeds space capacity {capacity}")]
    OverCapacity { requested: i32, capacity: i32 },

    #[error("Equipment requires a valid {0} certification")]
    MissingCertification(String),

    #[error("Resource is already booked for an overlapping time")]
    Overlap,

    #[error("Weekly booking limit of {limit_hours} hours exceeded")]
    WeeklyLimitExceeded { limit_hours: i32 },

    #[error("Booking can no longer be rescheduled")]
    StatusChanged,
}

/// What a booking reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingTarget {
    Space(Uuid),
    Equipment(Uuid),
}

impl BookingTarget {
    pub fn from_ids(
        space_id: Option<Uuid>,
        equipment_id: Option<Uuid>,
    ) -> Result<Self, BookingError> {
        match (space_id, equipment_id) {
            (Some(id), None) => Ok(BookingTarget::Space(id)),
            (None, Some(id)) => Ok(BookingTarget::Equipment(id)),
            _ => Err(BookingError::InvalidTarget),
        }
    }

    fn space_id(&self) -> Option<Uuid> {
        match self {
            BookingTarget::Space(id) => Some(*id),
            BookingTarget::Equipment(_) => None,
        }
    }

    fn equipment_id(&self) -> Option<Uuid> {
        match self {
            BookingTarget::Equipment(id) => Some(*id),
            BookingTarget::Space(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub user_id: Uuid,
    pub target: BookingTarget,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub attendee_count: i32,
    pub notes: Option<String>,
}

pub fn validate_window(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if ends_at <= starts_at {
        return Err(BookingError::InvalidWindow(
            "ends_at must be after starts_at".to_string(),
        ));
    }

    let duration = ends_at - starts_at;
    if duration < Duration::minutes(MIN_BOOKING_MINUTES) {
        return Err(BookingError::InvalidWindow(format!(
            "Bookings must last at least {} minutes",
            MIN_BOOKING_MINUTES
        )));
    }
    if duration > Duration::hours(MAX_BOOKING_HOURS) {
        return Err(BookingError::InvalidWindow(format!(
            "Bookings may last at most {} hours",
            MAX_BOOKING_HOURS
        )));
    }

    if starts_at < now - Duration::minutes(PAST_START_TOLERANCE_MINUTES) {
        return Err(BookingError::InvalidWindow(
            "Bookings cannot start in the past".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_advance(
    starts_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_advance_days: i32,
) -> Result<(), BookingError> {
    if starts_at > now + Duration::days(max_advance_days as i64) {
        return Err(BookingError::TooFarAhead(max_advance_days));
    }
    Ok(())
}

pub fn validate_space(space: &Space, tier: &AccessTier, attendee_count: i32) -> Result<(), BookingError> {
    if !space.is_active {
        return Err(BookingError::ResourceUnavailable(
            "Space is not active".to_string(),
        ));
    }
    if !tier.allows_space_type(space.space_type) {
        return Err(BookingError::SpaceTypeNotAllowed(
            space.space_type.as_str().to_string(),
        ));
    }
    if attendee_count < 1 || attendee_count > space.capacity {
        return Err(BookingError::OverCapacity {
            requested: attendee_count,
            capacity: space.capacity,
        });
    }
    Ok(())
}

pub fn validate_equipment(
    equipment: &Equipment,
    certification: Option<&UserCertification>,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if !equipment.status.is_bookable() {
        return Err(BookingError::ResourceUnavailable(
            "Equipment is under maintenance or retired".to_string(),
        ));
    }

    if let Some(required) = &equipment.required_certification {
        let holds_valid = certification.map(|c| c.is_valid(now)).unwrap_or(false);
        if !holds_valid {
            return Err(BookingError::MissingCertification(required.clone()));
        }
    }

    Ok(())
}

/// Monday 00:00 UTC of the ISO week containing `at`, and the following Monday.
pub fn iso_week_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let days_from_monday = at.weekday().num_days_from_monday() as i64;
    let monday = at.date_naive() - Duration::days(days_from_monday);
    let start = Utc.from_utc_datetime(&monday.and_time(NaiveTime::MIN));
    (start, start + Duration::days(7))
}

pub fn validate_weekly_hours(
    booked_minutes: i64,
    requested_minutes: i64,
    limit_hours: Option<i32>,
) -> Result<(), BookingError> {
    if let Some(limit_hours) = limit_hours {
        if booked_minutes + requested_minutes > limit_hours as i64 * 60 {
            return Err(BookingError::WeeklyLimitExceeded { limit_hours });
        }
    }
    Ok(())
}

/// Half-open interval overlap: touching ends do not collide.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Whether check-in is open for a booking at `now`.
pub fn check_in_open(booking: &Booking, now: DateTime<Utc>) -> bool {
    now >= booking.starts_at - Duration::minutes(CHECK_IN_EARLY_MINUTES) && now < booking.ends_at
}

async fn load_tier(
    pool: &PgPool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<AccessTier, BookingError> {
    let membership = Membership::find_active_for_user(pool, user_id)
        .await?
        .filter(|m| m.is_current(now))
        .ok_or(BookingError::NoActiveMembership)?;

    AccessTier::find_by_id(pool, membership.tier_id)
        .await?
        .ok_or(BookingError::NoActiveMembership)
}

/// Runs every rule that needs locked rows. The caller holds the transaction.
///
/// The user row is locked before the resource row so the weekly-hours total
/// cannot be raced by the same user booking another resource.
async fn check_locked(
    pool: &PgPool,
    conn: &mut PgConnection,
    request: &BookingRequest,
    tier: &AccessTier,
    exclude_booking_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if !User::lock_for_update(&mut *conn, request.user_id).await? {
        return Err(BookingError::NoActiveMembership);
    }

    match request.target {
        BookingTarget::Space(id) => {
            let space = Space::find_for_update(&mut *conn, id)
                .await?
                .ok_or(BookingError::SpaceNotFound)?;
            validate_space(&space, tier, request.attendee_count)?;
        }
        BookingTarget::Equipment(id) => {
            let equipment = Equipment::find_for_update(&mut *conn, id)
                .await?
                .ok_or(BookingError::EquipmentNotFound)?;
            let certification = match &equipment.required_certification {
                Some(cert) => UserCertification::find_for_user(pool, request.user_id, cert).await?,
                None => None,
            };
            validate_equipment(&equipment, certification.as_ref(), now)?;
        }
    }

    let overlapping = Booking::count_overlapping(
        &mut *conn,
        request.target.space_id(),
        request.target.equipment_id(),
        request.starts_at,
        request.ends_at,
        exclude_booking_id,
    )
    .await?;
    if overlapping > 0 {
        return Err(BookingError::Overlap);
    }

    let (week_start, week_end) = iso_week_bounds(request.starts_at);
    let booked = Booking::booked_minutes_in_range(
        &mut *conn,
        request.user_id,
        week_start,
        week_end,
        exclude_booking_id,
    )
    .await?;
    let requested = (request.ends_at - request.starts_at).num_minutes();
    validate_weekly_hours(booked, requested, tier.max_booking_hours_per_week)?;

    Ok(())
}

/// Validates and inserts a booking. The resource row stays locked until commit.
#[tracing::instrument(skip(pool, request), fields(user_id = %request.user_id))]
pub async fn create_booking(
    pool: &PgPool,
    request: BookingRequest,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    validate_window(request.starts_at, request.ends_at, now)?;
    let tier = load_tier(pool, request.user_id, now).await?;
    validate_advance(request.starts_at, now, tier.max_advance_booking_days)?;

    let mut tx = pool.begin().await?;
    check_locked(pool, &mut tx, &request, &tier, None, now).await?;

    let booking = Booking::create(
        &mut tx,
        CreateBookingData {
            user_id: request.user_id,
            space_id: request.target.space_id(),
            equipment_id: request.target.equipment_id(),
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            attendee_count: request.attendee_count,
            notes: request.notes,
        },
    )
    .await?;

    tx.commit().await?;

    tracing::info!(booking_id = %booking.id, "Booking confirmed");
    Ok(booking)
}

/// Moves an existing booking, re-running every rule with the booking itself excluded.
#[tracing::instrument(skip(pool, booking), fields(booking_id = %booking.id))]
pub async fn reschedule_booking(
    pool: &PgPool,
    booking: &Booking,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    attendee_count: i32,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    let request = BookingRequest {
        user_id: booking.user_id,
        target: BookingTarget::from_ids(booking.space_id, booking.equipment_id)?,
        starts_at,
        ends_at,
        attendee_count,
        notes,
    };

    validate_window(request.starts_at, request.ends_at, now)?;
    let tier = load_tier(pool, request.user_id, now).await?;
    validate_advance(request.starts_at, now, tier.max_advance_booking_days)?;

    let mut tx = pool.begin().await?;
    check_locked(pool, &mut tx, &request, &tier, Some(booking.id), now).await?;

    let updated = Booking::reschedule(
        &mut tx,
        booking.id,
        request.starts_at,
        request.ends_at,
        request.attendee_count,
        request.notes,
    )
    .await?
    .ok_or(BookingError::StatusChanged)?;

    tx.commit().await?;

    tracing::info!(booking_id = %updated.id, "Booking rescheduled");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{booking::BookingStatus, equipment::EquipmentStatus, space::SpaceType};

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, day, hour, minute, 0).unwrap()
    }

    fn tier(types: &[SpaceType]) -> AccessTier {
        AccessTier {
            id: Uuid::new_v4(),
            name: "Resident".to_string(),
            description: None,
            monthly_price_cents: 30_000,
            max_booking_hours_per_week: Some(10),
            max_advance_booking_days: 14,
            allowed_space_types: types.iter().map(|t| t.as_str().to_string()).collect(),
            access_start_hour: 0,
            access_end_hour: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn space(space_type: SpaceType, capacity: i32) -> Space {
        Space {
            id: Uuid::new_v4(),
            name: "Boardroom".to_string(),
            space_type,
            capacity,
            floor: Some("2".to_string()),
            hourly_rate_cents: 4_000,
            amenities: serde_json::json!(["screen"]),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn equipment(status: EquipmentStatus, required: Option<&str>) -> Equipment {
        Equipment {
            id: Uuid::new_v4(),
            name: "Laser cutter".to_string(),
            equipment_type: "fabrication".to_string(),
            serial_number: None,
            space_id: None,
            status,
            required_certification: required.map(str::to_string),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn certification(
        expires_at: Option<DateTime<Utc>>,
        revoked_at: Option<DateTime<Utc>>,
    ) -> UserCertification {
        UserCertification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            certification: "laser".to_string(),
            issued_by: None,
            issued_at: at(1, 9, 0),
            expires_at,
            revoked_at,
            created_at: at(1, 9, 0),
            updated_at: at(1, 9, 0),
        }
    }

    #[test]
    fn test_window_rejects_reversed_and_short() {
        let now = at(2, 8, 0);

        assert!(matches!(
            validate_window(at(2, 10, 0), at(2, 9, 0), now),
            Err(BookingError::InvalidWindow(_))
        ));
        assert!(matches!(
            validate_window(at(2, 10, 0), at(2, 10, 0), now),
            Err(BookingError::InvalidWindow(_))
        ));
        assert!(matches!(
            validate_window(at(2, 10, 0), at(2, 10, 14), now),
            Err(BookingError::InvalidWindow(_))
        ));
        assert!(validate_window(at(2, 10, 0), at(2, 10, 15), now).is_ok());
    }

    #[test]
    fn test_window_rejects_long_and_past() {
        let now = at(2, 8, 0);

        assert!(validate_window(at(2, 9, 0), at(2, 21, 0), now).is_ok());
        assert!(validate_window(at(2, 9, 0), at(2, 21, 1), now).is_err());
        assert!(validate_window(at(2, 7, 56), at(2, 9, 0), now).is_ok());
        assert!(validate_window(at(2, 7, 54), at(2, 9, 0), now).is_err());
    }

    #[test]
    fn test_advance_limit() {
        let now = at(2, 8, 0);
        assert!(validate_advance(at(16, 8, 0), now, 14).is_ok());
        assert!(matches!(
            validate_advance(at(16, 8, 1), now, 14),
            Err(BookingError::TooFarAhead(14))
        ));
    }

    #[test]
    fn test_space_rules() {
        let resident = tier(&[SpaceType::MeetingRoom]);

        assert!(validate_space(&space(SpaceType::MeetingRoom, 6), &resident, 6).is_ok());
        assert!(matches!(
            validate_space(&space(SpaceType::MeetingRoom, 6), &resident, 7),
            Err(BookingError::OverCapacity { requested: 7, capacity: 6 })
        ));
        assert!(matches!(
            validate_space(&space(SpaceType::PrivateOffice, 6), &resident, 2),
            Err(BookingError::SpaceTypeNotAllowed(_))
        ));

        let mut closed = space(SpaceType::MeetingRoom, 6);
        closed.is_active = false;
        assert!(matches!(
            validate_space(&closed, &resident, 2),
            Err(BookingError::ResourceUnavailable(_))
        ));
    }

    #[test]
    fn test_equipment_rules() {
        let now = at(2, 8, 0);

        assert!(validate_equipment(&equipment(EquipmentStatus::Available, None), None, now).is_ok());
        assert!(matches!(
            validate_equipment(&equipment(EquipmentStatus::Maintenance, None), None, now),
            Err(BookingError::ResourceUnavailable(_))
        ));

        let laser = equipment(EquipmentStatus::Available, Some("laser"));
        assert!(matches!(
            validate_equipment(&laser, None, now),
            Err(BookingError::MissingCertification(_))
        ));
        assert!(validate_equipment(&laser, Some(&certification(None, None)), now).is_ok());
        assert!(validate_equipment(&laser, Some(&certification(Some(at(1, 12, 0)), None)), now).is_err());
        assert!(validate_equipment(&laser, Some(&certification(None, Some(at(1, 12, 0)))), now).is_err());
    }

    #[test]
    fn test_iso_week_bounds() {
        // 2024-09-04 is a Wednesday
        let (start, end) = iso_week_bounds(at(4, 15, 30));
        assert_eq!(start, at(2, 0, 0));
        assert_eq!(end, at(9, 0, 0));

        // Sunday belongs to the week that started the previous Monday
        let (start, _) = iso_week_bounds(at(8, 23, 59));
        assert_eq!(start, at(2, 0, 0));

        let (start, _) = iso_week_bounds(at(9, 0, 0));
        assert_eq!(start, at(9, 0, 0));
    }

    #[test]
    fn test_weekly_hours_cap() {
        assert!(validate_weekly_hours(480, 120, Some(10)).is_ok());
        assert!(matches!(
            validate_weekly_hours(480, 121, Some(10)),
            Err(BookingError::WeeklyLimitExceeded { limit_hours: 10 })
        ));
        assert!(validate_weekly_hours(100_000, 720, None).is_ok());
    }

    #[test]
    fn test_intervals_overlap_half_open() {
        assert!(intervals_overlap(at(2, 9, 0), at(2, 10, 0), at(2, 9, 30), at(2, 11, 0)));
        assert!(intervals_overlap(at(2, 9, 0), at(2, 12, 0), at(2, 10, 0), at(2, 11, 0)));
        assert!(!intervals_overlap(at(2, 9, 0), at(2, 10, 0), at(2, 10, 0), at(2, 11, 0)));
        assert!(!intervals_overlap(at(2, 11, 0), at(2, 12, 0), at(2, 9, 0), at(2, 11, 0)));
    }

    #[test]
    fn test_target_requires_exactly_one_resource() {
        let id = Uuid::new_v4();
        assert_eq!(BookingTarget::from_ids(Some(id), None).unwrap(), BookingTarget::Space(id));
        assert_eq!(
            BookingTarget::from_ids(None, Some(id)).unwrap(),
            BookingTarget::Equipment(id)
        );
        assert!(BookingTarget::from_ids(Some(id), Some(id)).is_err());
        assert!(BookingTarget::from_ids(None, None).is_err());
    }

    #[test]
    fn test_check_in_window() {
        let booking = Booking {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            space_id: Some(Uuid::new_v4()),
            equipment_id: None,
            starts_at: at(2, 10, 0),
            ends_at: at(2, 11, 0),
            status: BookingStatus::Confirmed,
            attendee_count: 1,
            notes: None,
            checked_in_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: at(1, 10, 0),
            updated_at: at(1, 10, 0),
        };

        assert!(!check_in_open(&booking, at(2, 9, 44)));
        assert!(check_in_open(&booking, at(2, 9, 45)));
        assert!(check_in_open(&booking, at(2, 10, 59)));
        assert!(!check_in_open(&booking, at(2, 11, 0)));
    }
}
