//! Status updates racing the lifecycle sweeps. Needs a disposable Postgres:
//! `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use cowork::db;
use cowork::models::{
    access_tier::{AccessTier, CreateTierData},
    booking::{Booking, BookingStatus, CreateBookingData},
    membership::{period_end, CreateMembershipData, Membership, MembershipStatus},
    space::{CreateSpaceData, Space, SpaceType},
    user::{CreateUserData, Role, User},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn pool() -> Result<PgPool, Box<dyn std::error::Error>> {
    let url = std::env::var("TEST_DATABASE_URL")?;
    let pool = db::create_pool(&url, 2).await?;
    db::run_migrations(&pool).await?;
    Ok(pool)
}

async fn member(pool: &PgPool) -> Result<User, sqlx::Error> {
    User::create(
        pool,
        CreateUserData {
            email: format!("member-{}@example.com", Uuid::new_v4()),
            password_hash: "unused".to_string(),
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            phone: None,
            role: Role::Member,
        },
    )
    .await
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_no_show_booking_cannot_be_cancelled_or_checked_in() -> TestResult {
    let pool = pool().await?;
    let user = member(&pool).await?;
    let space = Space::create(
        &pool,
        CreateSpaceData {
            name: format!("Desk {}", Uuid::new_v4()),
            space_type: SpaceType::HotDesk,
            capacity: 1,
            floor: None,
            hourly_rate_cents: 0,
            amenities: Vec::new(),
        },
    )
    .await?;

    let now = Utc::now();
    let mut conn = pool.acquire().await?;
    let booking = Booking::create(
        &mut conn,
        CreateBookingData {
            user_id: user.id,
            space_id: Some(space.id),
            equipment_id: None,
            starts_at: now - Duration::hours(2),
            ends_at: now + Duration::hours(1),
            attendee_count: 1,
            notes: None,
        },
    )
    .await?;
    drop(conn);
    assert_eq!(booking.status, BookingStatus::Confirmed);

    // Sweep lands between the handler's read and its write.
    let swept = Booking::mark_no_shows(&pool, now, 30).await?;
    assert!(swept.iter().any(|b| b.id == booking.id));

    let cancelled = Booking::cancel(&pool, booking.id, booking.status, None).await?;
    assert!(cancelled.is_none());
    assert!(Booking::check_in(&pool, booking.id).await?.is_none());

    let stored = Booking::find_by_id(&pool, booking.id)
        .await?
        .ok_or("booking disappeared")?;
    assert_eq!(stored.status, BookingStatus::NoShow);

    Ok(())
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn test_expired_membership_cannot_be_paused_or_cancelled() -> TestResult {
    let pool = pool().await?;
    let user = member(&pool).await?;
    let tier = AccessTier::create(
        &pool,
        CreateTierData {
            name: format!("Tier {}", Uuid::new_v4()),
            description: None,
            monthly_price_cents: 10_000,
            max_booking_hours_per_week: None,
            max_advance_booking_days: 14,
            allowed_space_types: vec![SpaceType::HotDesk],
            access_start_hour: 0,
            access_end_hour: 24,
        },
    )
    .await?;

    let membership = Membership::create(
        &pool,
        CreateMembershipData {
            user_id: user.id,
            tier_id: tier.id,
            auto_renew: false,
        },
    )
    .await?;

    let active = Membership::activate(
        &pool,
        membership.id,
        MembershipStatus::Pending,
        period_end(Utc::now()),
    )
    .await?
    .ok_or("pending membership did not activate")?;
    assert_eq!(active.status, MembershipStatus::Active);

    // A second activation from pending finds nothing to update.
    assert!(Membership::activate(
        &pool,
        membership.id,
        MembershipStatus::Pending,
        period_end(Utc::now()),
    )
    .await?
    .is_none());

    assert!(Membership::expire(&pool, membership.id).await?);
    assert!(!Membership::expire(&pool, membership.id).await?);
    assert!(!Membership::renew(&pool, membership.id, period_end(Utc::now())).await?);

    assert!(Membership::pause(&pool, membership.id).await?.is_none());
    assert!(Membership::cancel(&pool, membership.id, active.status, None)
        .await?
        .is_none());

    let stored = Membership::find_by_id(&pool, membership.id)
        .await?
        .ok_or("membership disappeared")?;
    assert_eq!(stored.status, MembershipStatus::Expired);

    Ok(())
}
