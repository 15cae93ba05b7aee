use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{AppState, AuthenticatedUser, RequestMeta};
use crate::api::{Page, Pagination};
use crate::error::{AppError, Result};
use crate::models::{
    access_tier::AccessTier,
    membership::{
        period_end, CreateMembershipData, Membership, MembershipFilter, MembershipStatus,
    },
    user::{Role, User},
};
use crate::services::{
    audit,
    notifier::{self, MembershipEvent},
};

#[derive(Debug, Serialize)]
struct MembershipWithTier {
    #[serde(flatten)]
    membership: Membership,
    tier: Option<AccessTier>,
}

#[derive(Debug, Deserialize)]
struct CreateMembershipRequest {
    tier_id: Uuid,
    user_id: Option<Uuid>,
    #[serde(default)]
    auto_renew: bool,
    #[serde(default)]
    activate: bool,
}

#[derive(Debug, Deserialize)]
struct MembershipListQuery {
    user_id: Option<Uuid>,
    tier_id: Option<Uuid>,
    status: Option<MembershipStatus>,
}

#[derive(Debug, Deserialize)]
struct UpdateMembershipRequest {
    tier_id: Option<Uuid>,
    ends_at: Option<DateTime<Utc>>,
    auto_renew: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/memberships", get(list_memberships).post(create_membership))
        .route("/memberships/me", get(my_memberships))
        .route(
            "/memberships/:id",
            get(get_membership).patch(update_membership),
        )
        .route("/memberships/:id/activate", post(activate_membership))
        .route("/memberships/:id/pause", post(pause_membership))
        .route("/memberships/:id/resume", post(resume_membership))
        .route("/memberships/:id/cancel", post(cancel_membership))
}

fn ensure_transition(membership: &Membership, next: MembershipStatus) -> Result<()> {
    if !membership.status.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "Cannot move membership from {} to {}",
            membership.status.as_str(),
            next.as_str()
        )));
    }
    Ok(())
}

/// Period end when a paused membership becomes active again: the remaining
/// period is kept unless it already ran out.
fn resumed_period_end(membership: &Membership, now: DateTime<Utc>) -> DateTime<Utc> {
    match membership.ends_at {
        Some(ends_at) if ends_at > now => ends_at,
        _ => period_end(now),
    }
}

async fn load(state: &AppState, id: Uuid) -> Result<Membership> {
    Membership::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Membership"))
}

async fn my_memberships(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<MembershipWithTier>>> {
    let memberships = Membership::list_by_user(&state.pool, user.user_id).await?;
    let tiers: HashMap<Uuid, AccessTier> = AccessTier::list(&state.pool, true)
        .await?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    Ok(Json(
        memberships
            .into_iter()
            .map(|membership| MembershipWithTier {
                tier: tiers.get(&membership.tier_id).cloned(),
                membership,
            })
            .collect(),
    ))
}

async fn list_memberships(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<MembershipListQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Page<Membership>>> {
    user.authorize(Role::Staff)?;

    let filter = MembershipFilter {
        user_id: query.user_id,
        tier_id: query.tier_id,
        status: query.status,
    };
    let memberships = Membership::list(
        &state.pool,
        &filter,
        pagination.limit(),
        pagination.offset(),
    )
    .await?;

    Ok(Json(Page::new(memberships, pagination)))
}

async fn get_membership(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MembershipWithTier>> {
    let membership = load(&state, id).await?;
    user.can_access(membership.user_id)?;

    let tier = AccessTier::find_by_id(&state.pool, membership.tier_id).await?;
    Ok(Json(MembershipWithTier { membership, tier }))
}

/// Members request a pending membership for themselves; staff may enrol
/// anyone and activate immediately.
async fn create_membership(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<CreateMembershipRequest>,
) -> Result<(StatusCode, Json<Membership>)> {
    let target_user = body.user_id.unwrap_or(user.user_id);
    if target_user != user.user_id || body.activate {
        user.authorize(Role::Staff)?;
    }

    let member = User::find_by_id(&state.pool, target_user)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    if !member.is_active() {
        return Err(AppError::Validation("User account is not active".to_string()));
    }

    let tier = AccessTier::find_by_id(&state.pool, body.tier_id)
        .await?
        .filter(|t| t.is_active)
        .ok_or_else(|| AppError::Validation("Tier does not exist or is inactive".to_string()))?;

    let mut membership = Membership::create(
        &state.pool,
        CreateMembershipData {
            user_id: member.id,
            tier_id: tier.id,
            auto_renew: body.auto_renew,
        },
    )
    .await?;

    if body.activate {
        membership = Membership::activate(
            &state.pool,
            membership.id,
            MembershipStatus::Pending,
            period_end(Utc::now()),
        )
        .await?
        .ok_or_else(|| AppError::status_changed("Membership"))?;
        notifier::membership_event(&state.pool, MembershipEvent::Activated, &membership).await;
    }

    tracing::info!(
        membership_id = %membership.id,
        user_id = %membership.user_id,
        status = membership.status.as_str(),
        "Membership created"
    );
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "membership.create",
        Some(membership.id),
        Some(json!({
            "user_id": membership.user_id,
            "tier_id": membership.tier_id,
            "status": membership.status,
        })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(membership)))
}

async fn update_membership(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateMembershipRequest>,
) -> Result<Json<Membership>> {
    user.authorize(Role::Staff)?;

    if let Some(tier_id) = body.tier_id {
        AccessTier::find_by_id(&state.pool, tier_id)
            .await?
            .filter(|t| t.is_active)
            .ok_or_else(|| AppError::Validation("Tier does not exist or is inactive".to_string()))?;
    }

    let membership = Membership::update(&state.pool, id, body.tier_id, body.ends_at, body.auto_renew)
        .await?
        .ok_or_else(|| AppError::not_found("Membership"))?;

    audit::record(
        &state.pool,
        &meta.audit(&user),
        "membership.update",
        Some(id),
        Some(json!({
            "tier_id": body.tier_id,
            "ends_at": body.ends_at,
            "auto_renew": body.auto_renew,
        })),
    )
    .await;

    Ok(Json(membership))
}

async fn activate_membership(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<Json<Membership>> {
    user.authorize(Role::Staff)?;

    let membership = load(&state, id).await?;
    if membership.status != MembershipStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Only pending memberships can be activated (current: {})",
            membership.status.as_str()
        )));
    }
    ensure_transition(&membership, MembershipStatus::Active)?;

    let membership = Membership::activate(
        &state.pool,
        id,
        MembershipStatus::Pending,
        period_end(Utc::now()),
    )
    .await?
    .ok_or_else(|| AppError::status_changed("Membership"))?;

    tracing::info!(membership_id = %id, "Membership activated");
    notifier::membership_event(&state.pool, MembershipEvent::Activated, &membership).await;
    audit::record(&state.pool, &meta.audit(&user), "membership.activate", Some(id), None).await;

    Ok(Json(membership))
}

async fn pause_membership(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<Json<Membership>> {
    user.authorize(Role::Staff)?;

    let membership = load(&state, id).await?;
    ensure_transition(&membership, MembershipStatus::Paused)?;

    let membership = Membership::pause(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::status_changed("Membership"))?;

    tracing::info!(membership_id = %id, "Membership paused");
    notifier::membership_event(&state.pool, MembershipEvent::Paused, &membership).await;
    audit::record(&state.pool, &meta.audit(&user), "membership.pause", Some(id), None).await;

    Ok(Json(membership))
}

async fn resume_membership(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<Json<Membership>> {
    user.authorize(Role::Staff)?;

    let membership = load(&state, id).await?;
    if membership.status != MembershipStatus::Paused {
        return Err(AppError::Conflict(format!(
            "Only paused memberships can be resumed (current: {})",
            membership.status.as_str()
        )));
    }
    ensure_transition(&membership, MembershipStatus::Active)?;

    let ends_at = resumed_period_end(&membership, Utc::now());
    let membership = Membership::activate(&state.pool, id, MembershipStatus::Paused, ends_at)
        .await?
        .ok_or_else(|| AppError::status_changed("Membership"))?;

    tracing::info!(membership_id = %id, "Membership resumed");
    notifier::membership_event(&state.pool, MembershipEvent::Resumed, &membership).await;
    audit::record(&state.pool, &meta.audit(&user), "membership.resume", Some(id), None).await;

    Ok(Json(membership))
}

async fn cancel_membership(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Membership>> {
    let membership = load(&state, id).await?;
    user.can_access(membership.user_id)?;
    ensure_transition(&membership, MembershipStatus::Cancelled)?;

    let reason = body.and_then(|Json(b)| b.reason);
    let membership = Membership::cancel(&state.pool, id, membership.status, reason.clone())
        .await?
        .ok_or_else(|| AppError::status_changed("Membership"))?;

    tracing::info!(membership_id = %id, "Membership cancelled");
    notifier::membership_event(&state.pool, MembershipEvent::Cancelled, &membership).await;
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "membership.cancel",
        Some(id),
        Some(json!({ "reason": reason })),
    )
    .await;

    Ok(Json(membership))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn membership(status: MembershipStatus, ends_at: Option<DateTime<Utc>>) -> Membership {
        let now = Utc::now();
        Membership {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            status,
            starts_at: Some(now - Duration::days(10)),
            ends_at,
            auto_renew: false,
            activated_at: Some(now - Duration::days(10)),
            paused_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_terminal_membership_transition_conflicts() {
        let expired = membership(MembershipStatus::Expired, None);
        let err = ensure_transition(&expired, MembershipStatus::Active).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let active = membership(MembershipStatus::Active, None);
        assert!(ensure_transition(&active, MembershipStatus::Paused).is_ok());
    }

    #[test]
    fn test_resume_keeps_remaining_period() {
        let now = Utc::now();
        let remaining = now + Duration::days(12);
        let paused = membership(MembershipStatus::Paused, Some(remaining));
        assert_eq!(resumed_period_end(&paused, now), remaining);

        let lapsed = membership(MembershipStatus::Paused, Some(now - Duration::days(1)));
        assert_eq!(resumed_period_end(&lapsed, now), period_end(now));
    }
}
