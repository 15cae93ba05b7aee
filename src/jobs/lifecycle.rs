use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgPool;

use crate::models::{
    booking::Booking,
    membership::{period_end, Membership},
    refresh_token::RefreshToken,
};
use crate::services::{
    audit::{self, AuditContext},
    notifier::{self, BookingEvent, MembershipEvent},
};

/// Minutes after start before an unattended confirmed booking is released.
pub const NO_SHOW_GRACE_MINUTES: i32 = 30;
/// Revoked or expired refresh tokens are kept this long before deletion.
pub const TOKEN_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Default)]
pub struct BookingSweepStats {
    pub no_shows: usize,
    pub completed: u64,
}

#[derive(Debug, Default)]
pub struct MembershipSweepStats {
    pub total_checked: usize,
    pub renewed: usize,
    pub expired: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Releases unattended bookings and closes finished ones.
pub async fn sweep_bookings(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<BookingSweepStats, sqlx::Error> {
    let no_shows = Booking::mark_no_shows(pool, now, NO_SHOW_GRACE_MINUTES).await?;
    for booking in &no_shows {
        tracing::info!(booking_id = %booking.id, user_id = %booking.user_id, "Booking marked no-show");
        notifier::booking_event(pool, BookingEvent::NoShow, booking).await;
    }

    let completed = Booking::complete_finished(pool, now).await?;

    let stats = BookingSweepStats {
        no_shows: no_shows.len(),
        completed,
    };
    tracing::info!(?stats, "Booking sweep completed");

    Ok(stats)
}

enum LapseOutcome {
    Renewed,
    Expired,
    /// Left `active` between the scan and the update.
    Skipped,
}

/// Renews or expires active memberships whose period has ended.
///
/// For each lapsed membership:
/// 1. `auto_renew` set: extend by one month from the old end
/// 2. otherwise: mark expired
///
/// The member is notified either way.
pub async fn sweep_memberships(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<MembershipSweepStats, sqlx::Error> {
    let lapsed = Membership::find_lapsed(pool, now).await?;
    let mut stats = MembershipSweepStats {
        total_checked: lapsed.len(),
        ..Default::default()
    };

    for membership in lapsed {
        match settle_lapsed(pool, &membership, now).await {
            Ok(LapseOutcome::Renewed) => stats.renewed += 1,
            Ok(LapseOutcome::Expired) => stats.expired += 1,
            Ok(LapseOutcome::Skipped) => stats.skipped += 1,
            Err(e) => {
                tracing::error!(
                    membership_id = %membership.id,
                    error = %e,
                    "Failed to settle lapsed membership"
                );
                stats.errors += 1;
            }
        }
    }

    tracing::info!(?stats, "Membership sweep completed");
    Ok(stats)
}

/// Next period end for a renewal. Renewals chain from the previous end so a
/// late sweep does not shift the billing date, unless that is still in the past.
pub fn renewal_end(previous_end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = period_end(previous_end.unwrap_or(now));
    if next > now {
        next
    } else {
        period_end(now)
    }
}

async fn settle_lapsed(
    pool: &PgPool,
    membership: &Membership,
    now: DateTime<Utc>,
) -> Result<LapseOutcome, sqlx::Error> {
    if membership.auto_renew {
        let ends_at = renewal_end(membership.ends_at, now);
        if !Membership::renew(pool, membership.id, ends_at).await? {
            return Ok(LapseOutcome::Skipped);
        }

        let renewed = Membership {
            ends_at: Some(ends_at),
            ..membership.clone()
        };
        tracing::info!(membership_id = %membership.id, ends_at = %ends_at, "Membership renewed");
        notifier::membership_event(pool, MembershipEvent::Renewed, &renewed).await;
        audit::record(
            pool,
            &AuditContext::system(),
            "membership.renew",
            Some(membership.id),
            Some(json!({ "ends_at": ends_at })),
        )
        .await;

        Ok(LapseOutcome::Renewed)
    } else {
        if !Membership::expire(pool, membership.id).await? {
            return Ok(LapseOutcome::Skipped);
        }

        tracing::info!(membership_id = %membership.id, "Membership expired");
        notifier::membership_event(pool, MembershipEvent::Expired, membership).await;
        audit::record(
            pool,
            &AuditContext::system(),
            "membership.expire",
            Some(membership.id),
            None,
        )
        .await;

        Ok(LapseOutcome::Expired)
    }
}

/// Deletes refresh tokens that expired or were revoked before the retention window.
pub async fn purge_refresh_tokens(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let purged = RefreshToken::purge_stale(pool, now - Duration::days(TOKEN_RETENTION_DAYS)).await?;
    tracing::info!(purged = purged, "Stale refresh tokens purged");
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_renewal_chains_from_previous_end() {
        let previous = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 0, 40, 0).unwrap();

        assert_eq!(
            renewal_end(Some(previous), now),
            Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_long_overdue_renewal_starts_from_now() {
        let previous = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();

        assert_eq!(renewal_end(Some(previous), now), period_end(now));
        assert_eq!(renewal_end(None, now), period_end(now));
    }
}
