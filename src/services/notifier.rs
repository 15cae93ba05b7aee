use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    booking::Booking,
    membership::Membership,
    notification::{CreateNotificationData, Notification, NotificationKind},
    user_certification::UserCertification,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEvent {
    Confirmed,
    Rescheduled,
    Cancelled,
    NoShow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    Activated,
    Paused,
    Resumed,
    Cancelled,
    Expired,
    Renewed,
}

pub fn booking_message(event: BookingEvent, booking: &Booking) -> (String, String) {
    let when = booking.starts_at.format("%Y-%m-%d %H:%M UTC");
    match event {
        BookingEvent::Confirmed => (
            "Booking confirmed".to_string(),
            format!("Your booking starting {} is confirmed.", when),
        ),
        BookingEvent::Rescheduled => (
            "Booking rescheduled".to_string(),
            format!("Your booking now starts {}.", when),
        ),
        BookingEvent::Cancelled => (
            "Booking cancelled".to_string(),
            match &booking.cancellation_reason {
                Some(reason) => format!("Your booking starting {} was cancelled: {}", when, reason),
                None => format!("Your booking starting {} was cancelled.", when),
            },
        ),
        BookingEvent::NoShow => (
            "Missed booking".to_string(),
            format!(
                "You did not check in for your booking starting {}. It has been released.",
                when
            ),
        ),
    }
}

pub fn membership_message(event: MembershipEvent, membership: &Membership) -> (String, String) {
    let until = membership
        .ends_at
        .map(|e| e.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "further notice".to_string());

    match event {
        MembershipEvent::Activated => (
            "Membership active".to_string(),
            format!("Your membership is active until {}.", until),
        ),
        MembershipEvent::Paused => (
            "Membership paused".to_string(),
            "Your membership has been paused.".to_string(),
        ),
        MembershipEvent::Resumed => (
            "Membership resumed".to_string(),
            format!("Your membership is active again until {}.", until),
        ),
        MembershipEvent::Cancelled => (
            "Membership cancelled".to_string(),
            "Your membership has been cancelled.".to_string(),
        ),
        MembershipEvent::Expired => (
            "Membership expired".to_string(),
            "Your membership has expired. Contact staff to renew.".to_string(),
        ),
        MembershipEvent::Renewed => (
            "Membership renewed".to_string(),
            format!("Your membership was renewed until {}.", until),
        ),
    }
}

/// Stores a notification. Failures are logged and swallowed.
pub async fn notify(
    pool: &PgPool,
    user_id: Uuid,
    kind: NotificationKind,
    title: String,
    body: String,
    data: Option<serde_json::Value>,
) {
    let result = Notification::create(
        pool,
        CreateNotificationData {
            user_id,
            kind,
            title,
            body,
            data,
        },
    )
    .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, user_id = %user_id, kind = ?kind, "Failed to store notification");
    }
}

pub async fn booking_event(pool: &PgPool, event: BookingEvent, booking: &Booking) {
    let (title, body) = booking_message(event, booking);
    notify(
        pool,
        booking.user_id,
        NotificationKind::Booking,
        title,
        body,
        Some(json!({ "booking_id": booking.id })),
    )
    .await;
}

pub async fn membership_event(pool: &PgPool, event: MembershipEvent, membership: &Membership) {
    let (title, body) = membership_message(event, membership);
    notify(
        pool,
        membership.user_id,
        NotificationKind::Membership,
        title,
        body,
        Some(json!({ "membership_id": membership.id, "tier_id": membership.tier_id })),
    )
    .await;
}

pub async fn certification_granted(pool: &PgPool, certification: &UserCertification) {
    notify(
        pool,
        certification.user_id,
        NotificationKind::Certification,
        "Certification granted".to_string(),
        format!("You are now certified for {}.", certification.certification),
        Some(json!({ "certification_id": certification.id })),
    )
    .await;
}

pub async fn certification_revoked(pool: &PgPool, certification: &UserCertification) {
    notify(
        pool,
        certification.user_id,
        NotificationKind::Certification,
        "Certification revoked".to_string(),
        format!("Your {} certification was revoked.", certification.certification),
        Some(json!({ "certification_id": certification.id })),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{booking::BookingStatus, membership::MembershipStatus};
    use chrono::{TimeZone, Utc};

    fn booking(reason: Option<&str>) -> Booking {
        let starts_at = Utc.with_ymd_and_hms(2024, 9, 2, 9, 30, 0).unwrap();
        Booking {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            space_id: Some(Uuid::new_v4()),
            equipment_id: None,
            starts_at,
            ends_at: starts_at + chrono::Duration::hours(1),
            status: BookingStatus::Cancelled,
            attendee_count: 1,
            notes: None,
            checked_in_at: None,
            cancelled_at: None,
            cancellation_reason: reason.map(str::to_string),
            created_at: starts_at,
            updated_at: starts_at,
        }
    }

    #[test]
    fn test_booking_messages_include_start() {
        let (title, body) = booking_message(BookingEvent::Confirmed, &booking(None));
        assert_eq!(title, "Booking confirmed");
        assert!(body.contains("2024-09-02 09:30 UTC"));
    }

    #[test]
    fn test_cancellation_reason_is_shown() {
        let (_, body) = booking_message(BookingEvent::Cancelled, &booking(Some("room flooded")));
        assert!(body.ends_with("room flooded"));
    }

    #[test]
    fn test_membership_message_without_end_date() {
        let now = Utc::now();
        let membership = Membership {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            status: MembershipStatus::Active,
            starts_at: Some(now),
            ends_at: None,
            auto_renew: false,
            activated_at: Some(now),
            paused_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let (_, body) = membership_message(MembershipEvent::Activated, &membership);
        assert!(body.contains("further notice"));
    }
}
