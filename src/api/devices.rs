use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{auth::require_admin, AppState, AuthenticatedUser, RequestMeta};
use crate::api::required_text;
use crate::error::{AppError, Result};
use crate::models::device::{CreateDeviceData, Device, DeviceStatus, DeviceType, UpdateDeviceData};
use crate::services::{audit, signature};

pub const DEVICE_KEY_PREFIX: &str = "dev_";
const DEVICE_KEY_BYTES: usize = 32;

#[derive(Debug, Deserialize)]
struct DeviceListQuery {
    space_id: Option<Uuid>,
    status: Option<DeviceStatus>,
}

#[derive(Debug, Deserialize)]
struct CreateDeviceRequest {
    name: String,
    device_type: DeviceType,
    space_id: Option<Uuid>,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateDeviceRequest {
    name: Option<String>,
    device_type: Option<DeviceType>,
    space_id: Option<Uuid>,
    location: Option<String>,
}

/// Returned once on activation; only the hash of `device_key` is stored.
#[derive(Debug, Serialize)]
struct ActivationResponse {
    device: Device,
    device_key: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices", get(list_devices).post(create_device))
        .route(
            "/devices/:id",
            get(get_device).patch(update_device).delete(delete_device),
        )
        .route("/devices/:id/activate", post(activate_device))
        .route("/devices/:id/deactivate", post(deactivate_device))
        .route_layer(from_fn(require_admin))
}

/// New device key and the hash to store for it.
pub fn generate_device_key() -> Result<(String, String)> {
    let key = format!(
        "{}{}",
        DEVICE_KEY_PREFIX,
        signature::random_hex(DEVICE_KEY_BYTES)?
    );
    let hash = signature::sha256_hex(&key);
    Ok((key, hash))
}

async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DeviceListQuery>,
) -> Result<Json<Vec<Device>>> {
    Ok(Json(
        Device::list(&state.pool, query.space_id, query.status).await?,
    ))
}

async fn get_device(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Device>> {
    Device::find_by_id(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Device"))
}

async fn create_device(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<Device>)> {
    let device = Device::create(
        &state.pool,
        CreateDeviceData {
            name: required_text("name", &body.name)?,
            device_type: body.device_type,
            space_id: body.space_id,
            location: body.location,
        },
    )
    .await?;

    tracing::info!(device_id = %device.id, "Device registered");
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "device.create",
        Some(device.id),
        serde_json::to_value(&device).ok(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(device)))
}

async fn update_device(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateDeviceRequest>,
) -> Result<Json<Device>> {
    let name = body
        .name
        .as_deref()
        .map(|n| required_text("name", n))
        .transpose()?;
    let changes = json!({
        "name": name,
        "device_type": body.device_type,
        "space_id": body.space_id,
        "location": body.location,
    });

    let device = Device::update(
        &state.pool,
        id,
        UpdateDeviceData {
            name,
            device_type: body.device_type,
            space_id: body.space_id,
            location: body.location,
        },
    )
    .await?
    .ok_or_else(|| AppError::not_found("Device"))?;

    audit::record(&state.pool, &meta.audit(&user), "device.update", Some(id), Some(changes)).await;

    Ok(Json(device))
}

async fn delete_device(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !Device::delete(&state.pool, id).await? {
        return Err(AppError::not_found("Device"));
    }

    tracing::info!(device_id = %id, "Device deleted");
    audit::record(&state.pool, &meta.audit(&user), "device.delete", Some(id), None).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Issues a fresh device key. Re-activating rotates the key and invalidates the old one.
async fn activate_device(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<Json<ActivationResponse>> {
    let existing = Device::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Device"))?;

    let (device_key, key_hash) = generate_device_key()?;
    let device = Device::activate(&state.pool, id, &key_hash).await?;

    let rotated = existing.api_key_hash.is_some();
    tracing::info!(device_id = %id, rotated = rotated, "Device activated");
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "device.activate",
        Some(id),
        Some(json!({ "key_rotated": rotated })),
    )
    .await;

    Ok(Json(ActivationResponse { device, device_key }))
}

async fn deactivate_device(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<Json<Device>> {
    let device = Device::deactivate(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Device"))?;

    tracing::info!(device_id = %id, "Device deactivated");
    audit::record(&state.pool, &meta.audit(&user), "device.deactivate", Some(id), None).await;

    Ok(Json(device))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_key_shape() {
        let (key, hash) = generate_device_key().unwrap();

        assert!(key.starts_with(DEVICE_KEY_PREFIX));
        assert_eq!(key.len(), DEVICE_KEY_PREFIX.len() + DEVICE_KEY_BYTES * 2);
        assert_eq!(hash, signature::sha256_hex(&key));
        assert_ne!(hash, key);
    }

    #[test]
    fn test_device_keys_are_unique() {
        let (a, _) = generate_device_key().unwrap();
        let (b, _) = generate_device_key().unwrap();
        assert_ne!(a, b);
    }
}
