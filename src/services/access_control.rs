use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    access_log::{AccessDecision, AccessLog, AccessMethod, CreateAccessLogData},
    access_tier::AccessTier,
    booking::Booking,
    device::Device,
    membership::Membership,
    space::Space,
    user::User,
};
use crate::services::qr_generator::{self, TokenRejection};

/// Minutes before a booking's start during which its holder may already enter.
pub const BOOKING_EARLY_ENTRY_MINUTES: i32 = 15;

const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(thiserror::Error, Debug)]
pub enum AccessControlError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Replay denial for nonce could not be recorded")]
    ReplayNotRecorded,
}

/// Why a door opened or stayed shut. Serialized into `access_logs.reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    TierAccess,
    Booking,
    DeviceInactive,
    InvalidToken,
    TokenExpired,
    TokenReplayed,
    UserInactive,
    NoActiveMembership,
    OutsideAccessHours,
    SpaceInactive,
    SpaceNotPermitted,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::TierAccess => "tier_access",
            AccessReason::Booking => "booking",
            AccessReason::DeviceInactive => "device_inactive",
            AccessReason::InvalidToken => "invalid_token",
            AccessReason::TokenExpired => "token_expired",
            AccessReason::TokenReplayed => "token_replayed",
            AccessReason::UserInactive => "user_inactive",
            AccessReason::NoActiveMembership => "no_active_membership",
            AccessReason::OutsideAccessHours => "outside_access_hours",
            AccessReason::SpaceInactive => "space_inactive",
            AccessReason::SpaceNotPermitted => "space_not_permitted",
        }
    }

    pub fn decision(&self) -> AccessDecision {
        match self {
            AccessReason::TierAccess | AccessReason::Booking => AccessDecision::Granted,
            _ => AccessDecision::Denied,
        }
    }
}

impl From<TokenRejection> for AccessReason {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Malformed | TokenRejection::BadSignature => AccessReason::InvalidToken,
            TokenRejection::Expired => AccessReason::TokenExpired,
        }
    }
}

/// Outcome of a scan, returned to the device.
#[derive(Debug, Clone, Serialize)]
pub struct AccessResult {
    pub decision: AccessDecision,
    pub reason: AccessReason,
    pub user_id: Option<Uuid>,
    pub log_id: Uuid,
}

/// Whether `hour` falls in the tier window `[start, end)`.
///
/// Equal bounds mean round-the-clock access; `start > end` wraps past midnight.
pub fn within_access_hours(start: i16, end: i16, hour: u32) -> bool {
    let hour = hour as i16;
    if start == end || (start <= 0 && end >= 24) {
        return true;
    }
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Hour of day at the facility for the configured UTC offset.
pub fn facility_local_hour(now: DateTime<Utc>, utc_offset_minutes: i32) -> u32 {
    (now + Duration::minutes(utc_offset_minutes as i64)).hour()
}

/// Member-level checks once the token itself is trusted.
pub fn check_member(
    user: Option<&User>,
    membership: Option<&Membership>,
    tier: Option<&AccessTier>,
    local_hour: u32,
    now: DateTime<Utc>,
) -> Result<(), AccessReason> {
    match user {
        Some(user) if user.is_active() => {}
        _ => return Err(AccessReason::UserInactive),
    }

    let tier = match (membership, tier) {
        (Some(membership), Some(tier)) if membership.is_current(now) => tier,
        _ => return Err(AccessReason::NoActiveMembership),
    };

    if !within_access_hours(tier.access_start_hour, tier.access_end_hour, local_hour) {
        return Err(AccessReason::OutsideAccessHours);
    }

    Ok(())
}

/// Decision for a device guarding a specific space.
pub fn space_decision(space: &Space, tier: &AccessTier, has_covering_booking: bool) -> AccessReason {
    if !space.is_active {
        AccessReason::SpaceInactive
    } else if tier.allows_space_type(space.space_type) {
        AccessReason::TierAccess
    } else if has_covering_booking {
        AccessReason::Booking
    } else {
        AccessReason::SpaceNotPermitted
    }
}

/// Validates a scanned QR token at a device, logs the outcome and touches the device.
///
/// Every path through here writes exactly one access log row.
#[tracing::instrument(skip(pool, token, signing_key), fields(device_id = %device.id))]
pub async fn validate_access(
    pool: &PgPool,
    device: &Device,
    token: &str,
    signing_key: &[u8],
    utc_offset_minutes: i32,
    now: DateTime<Utc>,
) -> Result<AccessResult, AccessControlError> {
    let mut user_id = None;
    let mut nonce = None;

    let reason = evaluate(
        pool,
        device,
        token,
        signing_key,
        utc_offset_minutes,
        now,
        &mut user_id,
        &mut nonce,
    )
    .await?;

    let log = record(pool, device, user_id, reason, nonce.clone()).await?;

    let (log, reason) = match log {
        Some(log) => (log, reason),
        None => {
            // Lost a race with a concurrent scan of the same token.
            tracing::warn!(device_id = %device.id, "Granted nonce already recorded");
            let log = record(pool, device, user_id, AccessReason::TokenReplayed, nonce)
                .await?
                .ok_or(AccessControlError::ReplayNotRecorded)?;
            (log, AccessReason::TokenReplayed)
        }
    };

    Device::touch(pool, device.id).await?;

    tracing::info!(
        device_id = %device.id,
        user_id = ?user_id,
        decision = ?reason.decision(),
        reason = reason.as_str(),
        "Access decision recorded"
    );

    Ok(AccessResult {
        decision: reason.decision(),
        reason,
        user_id,
        log_id: log.id,
    })
}

#[allow(clippy::too_many_arguments)]
async fn evaluate(
    pool: &PgPool,
    device: &Device,
    token: &str,
    signing_key: &[u8],
    utc_offset_minutes: i32,
    now: DateTime<Utc>,
    user_id: &mut Option<Uuid>,
    nonce: &mut Option<String>,
) -> Result<AccessReason, AccessControlError> {
    if !device.is_active() {
        return Ok(AccessReason::DeviceInactive);
    }

    let payload = match qr_generator::verify_token(token, signing_key, now) {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected access token");
            return Ok(rejection.into());
        }
    };

    *nonce = Some(payload.nonce.clone());

    // Logged user ids must reference an existing row.
    let user = User::find_by_id(pool, payload.uid).await?;
    *user_id = user.as_ref().map(|u| u.id);

    if AccessLog::nonce_was_granted(pool, &payload.nonce).await? {
        return Ok(AccessReason::TokenReplayed);
    }

    let membership = match &user {
        Some(user) => Membership::find_active_for_user(pool, user.id).await?,
        None => None,
    };
    let tier = match &membership {
        Some(membership) => AccessTier::find_by_id(pool, membership.tier_id).await?,
        None => None,
    };

    let local_hour = facility_local_hour(now, utc_offset_minutes);
    if let Err(reason) = check_member(
        user.as_ref(),
        membership.as_ref(),
        tier.as_ref(),
        local_hour,
        now,
    ) {
        return Ok(reason);
    }

    // check_member guarantees a tier past this point
    let Some(tier) = tier else {
        return Ok(AccessReason::NoActiveMembership);
    };

    let Some(space_id) = device.space_id else {
        return Ok(AccessReason::TierAccess);
    };

    let Some(space) = Space::find_by_id(pool, space_id).await? else {
        return Ok(AccessReason::SpaceInactive);
    };

    let has_covering_booking = if space.is_active && !tier.allows_space_type(space.space_type) {
        Booking::find_covering(pool, payload.uid, space.id, now, BOOKING_EARLY_ENTRY_MINUTES)
            .await?
            .is_some()
    } else {
        false
    };

    Ok(space_decision(&space, &tier, has_covering_booking))
}

/// Inserts the access log. `None` when a grant collides with an already granted nonce.
async fn record(
    pool: &PgPool,
    device: &Device,
    user_id: Option<Uuid>,
    reason: AccessReason,
    nonce: Option<String>,
) -> Result<Option<AccessLog>, AccessControlError> {
    let data = CreateAccessLogData {
        device_id: device.id,
        user_id,
        space_id: device.space_id,
        decision: reason.decision(),
        reason: reason.as_str().to_string(),
        method: AccessMethod::QrToken,
        token_nonce: nonce,
        operator_id: None,
    };

    match AccessLog::create(pool, data).await {
        Ok(log) => Ok(Some(log)),
        Err(e)
            if reason.decision() == AccessDecision::Granted
                && e.as_database_error()
                    .and_then(|db| db.code())
                    .as_deref()
                    == Some(PG_UNIQUE_VIOLATION) =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Records a staff-operated entry at a device.
pub async fn record_manual_entry(
    pool: &PgPool,
    device: &Device,
    user_id: Uuid,
    operator_id: Uuid,
    decision: AccessDecision,
    reason: String,
) -> Result<AccessLog, AccessControlError> {
    let log = AccessLog::create(
        pool,
        CreateAccessLogData {
            device_id: device.id,
            user_id: Some(user_id),
            space_id: device.space_id,
            decision,
            reason,
            method: AccessMethod::Manual,
            token_nonce: None,
            operator_id: Some(operator_id),
        },
    )
    .await?;

    tracing::info!(
        device_id = %device.id,
        user_id = %user_id,
        operator_id = %operator_id,
        decision = ?decision,
        "Manual access recorded"
    );

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        membership::MembershipStatus,
        space::SpaceType,
        user::{Role, UserSettings, UserStatus},
    };
    use chrono::TimeZone;
    use sqlx::types::Json;

    fn user(status: UserStatus) -> User {
        User {
            id: Uuid::new_v4(),
            email: "member@example.com".to_string(),
            password_hash: String::new(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone: None,
            role: Role::Member,
            status,
            settings: Json(UserSettings::default()),
            last_login_at: None,
            email_verified_at: None,
            failed_login_attempts: 0,
            locked_until: None,
            deactivated_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn membership(status: MembershipStatus, now: DateTime<Utc>) -> Membership {
        Membership {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            status,
            starts_at: Some(now - Duration::days(3)),
            ends_at: Some(now + Duration::days(27)),
            auto_renew: true,
            activated_at: Some(now - Duration::days(3)),
            paused_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn tier(start: i16, end: i16, types: &[SpaceType]) -> AccessTier {
        AccessTier {
            id: Uuid::new_v4(),
            name: "Flex".to_string(),
            description: None,
            monthly_price_cents: 15_000,
            max_booking_hours_per_week: Some(10),
            max_advance_booking_days: 14,
            allowed_space_types: types.iter().map(|t| t.as_str().to_string()).collect(),
            access_start_hour: start,
            access_end_hour: end,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn space(space_type: SpaceType, is_active: bool) -> Space {
        Space {
            id: Uuid::new_v4(),
            name: "Room".to_string(),
            space_type,
            capacity: 6,
            floor: None,
            hourly_rate_cents: 2_500,
            amenities: serde_json::json!([]),
            is_active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_access_hours_plain_window() {
        assert!(within_access_hours(8, 20, 8));
        assert!(within_access_hours(8, 20, 19));
        assert!(!within_access_hours(8, 20, 20));
        assert!(!within_access_hours(8, 20, 7));
    }

    #[test]
    fn test_access_hours_wrap_midnight() {
        assert!(within_access_hours(22, 6, 23));
        assert!(within_access_hours(22, 6, 0));
        assert!(within_access_hours(22, 6, 5));
        assert!(!within_access_hours(22, 6, 6));
        assert!(!within_access_hours(22, 6, 12));
    }

    #[test]
    fn test_access_hours_round_the_clock() {
        for hour in 0..24 {
            assert!(within_access_hours(0, 0, hour));
            assert!(within_access_hours(0, 24, hour));
            assert!(within_access_hours(9, 9, hour));
        }
    }

    #[test]
    fn test_facility_local_hour_applies_offset() {
        let now = Utc.with_ymd_and_hms(2024, 9, 2, 23, 30, 0).unwrap();
        assert_eq!(facility_local_hour(now, 0), 23);
        assert_eq!(facility_local_hour(now, 120), 1);
        assert_eq!(facility_local_hour(now, -300), 18);
    }

    #[test]
    fn test_member_checks_in_order() {
        let now = Utc::now();
        let active = user(UserStatus::Active);
        let current = membership(MembershipStatus::Active, now);
        let all_day = tier(0, 0, &[SpaceType::HotDesk]);

        assert_eq!(check_member(Some(&active), Some(&current), Some(&all_day), 10, now), Ok(()));
        assert_eq!(
            check_member(None, Some(&current), Some(&all_day), 10, now),
            Err(AccessReason::UserInactive)
        );
        assert_eq!(
            check_member(Some(&user(UserStatus::Suspended)), None, None, 10, now),
            Err(AccessReason::UserInactive)
        );
        assert_eq!(
            check_member(Some(&active), None, None, 10, now),
            Err(AccessReason::NoActiveMembership)
        );
        assert_eq!(
            check_member(
                Some(&active),
                Some(&membership(MembershipStatus::Paused, now)),
                Some(&all_day),
                10,
                now
            ),
            Err(AccessReason::NoActiveMembership)
        );
        assert_eq!(
            check_member(Some(&active), Some(&current), Some(&tier(8, 18, &[])), 20, now),
            Err(AccessReason::OutsideAccessHours)
        );
    }

    #[test]
    fn test_lapsed_membership_is_not_current() {
        let now = Utc::now();
        let mut lapsed = membership(MembershipStatus::Active, now);
        lapsed.ends_at = Some(now - Duration::minutes(1));

        assert_eq!(
            check_member(
                Some(&user(UserStatus::Active)),
                Some(&lapsed),
                Some(&tier(0, 0, &[])),
                10,
                now
            ),
            Err(AccessReason::NoActiveMembership)
        );
    }

    #[test]
    fn test_space_decision() {
        let flex = tier(0, 0, &[SpaceType::HotDesk]);

        assert_eq!(
            space_decision(&space(SpaceType::HotDesk, true), &flex, false),
            AccessReason::TierAccess
        );
        assert_eq!(
            space_decision(&space(SpaceType::MeetingRoom, true), &flex, true),
            AccessReason::Booking
        );
        assert_eq!(
            space_decision(&space(SpaceType::MeetingRoom, true), &flex, false),
            AccessReason::SpaceNotPermitted
        );
        assert_eq!(
            space_decision(&space(SpaceType::HotDesk, false), &flex, true),
            AccessReason::SpaceInactive
        );
    }

    #[test]
    fn test_reason_decisions() {
        assert_eq!(AccessReason::TierAccess.decision(), AccessDecision::Granted);
        assert_eq!(AccessReason::Booking.decision(), AccessDecision::Granted);
        assert_eq!(AccessReason::TokenReplayed.decision(), AccessDecision::Denied);
        assert_eq!(AccessReason::from(TokenRejection::BadSignature), AccessReason::InvalidToken);
        assert_eq!(AccessReason::from(TokenRejection::Expired), AccessReason::TokenExpired);
    }
}
