use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::{auth::require_staff, AppState, AuthenticatedUser, RequestMeta};
use crate::api::required_text;
use crate::error::{AppError, Result};
use crate::models::equipment::{
    CreateEquipmentData, Equipment, EquipmentStatus, UpdateEquipmentData,
};
use crate::services::audit;

#[derive(Debug, Deserialize)]
struct EquipmentListQuery {
    space_id: Option<Uuid>,
    status: Option<EquipmentStatus>,
}

#[derive(Debug, Deserialize)]
struct CreateEquipmentRequest {
    name: String,
    equipment_type: String,
    serial_number: Option<String>,
    space_id: Option<Uuid>,
    required_certification: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateEquipmentRequest {
    name: Option<String>,
    equipment_type: Option<String>,
    serial_number: Option<String>,
    space_id: Option<Uuid>,
    status: Option<EquipmentStatus>,
    required_certification: Option<String>,
}

pub fn router() -> Router<AppState> {
    let staff = Router::new()
        .route("/equipment", post(create_equipment))
        .route("/equipment/:id", patch(update_equipment).delete(retire_equipment))
        .route_layer(from_fn(require_staff));

    Router::new()
        .route("/equipment", get(list_equipment))
        .route("/equipment/:id", get(get_equipment))
        .merge(staff)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn list_equipment(
    State(state): State<AppState>,
    Query(query): Query<EquipmentListQuery>,
) -> Result<Json<Vec<Equipment>>> {
    Ok(Json(
        Equipment::list(&state.pool, query.space_id, query.status).await?,
    ))
}

async fn get_equipment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Equipment>> {
    Equipment::find_by_id(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Equipment"))
}

async fn create_equipment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Json(body): Json<CreateEquipmentRequest>,
) -> Result<(StatusCode, Json<Equipment>)> {
    let equipment = Equipment::create(
        &state.pool,
        CreateEquipmentData {
            name: required_text("name", &body.name)?,
            equipment_type: required_text("equipment_type", &body.equipment_type)?,
            serial_number: non_blank(body.serial_number),
            space_id: body.space_id,
            required_certification: non_blank(body.required_certification),
        },
    )
    .await?;

    tracing::info!(equipment_id = %equipment.id, "Equipment created");
    audit::record(
        &state.pool,
        &meta.audit(&user),
        "equipment.create",
        Some(equipment.id),
        serde_json::to_value(&equipment).ok(),
    )
    .await;

    Ok((StatusCode::CREATED, Json(equipment)))
}

async fn update_equipment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateEquipmentRequest>,
) -> Result<Json<Equipment>> {
    let data = UpdateEquipmentData {
        name: body
            .name
            .as_deref()
            .map(|n| required_text("name", n))
            .transpose()?,
        equipment_type: body
            .equipment_type
            .as_deref()
            .map(|t| required_text("equipment_type", t))
            .transpose()?,
        serial_number: non_blank(body.serial_number),
        space_id: body.space_id,
        status: body.status,
        required_certification: non_blank(body.required_certification),
    };
    let changes = json!({
        "name": data.name,
        "equipment_type": data.equipment_type,
        "serial_number": data.serial_number,
        "space_id": data.space_id,
        "status": data.status,
        "required_certification": data.required_certification,
    });

    let equipment = Equipment::update(&state.pool, id, data)
        .await?
        .ok_or_else(|| AppError::not_found("Equipment"))?;

    audit::record(
        &state.pool,
        &meta.audit(&user),
        "equipment.update",
        Some(id),
        Some(changes),
    )
    .await;

    Ok(Json(equipment))
}

async fn retire_equipment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: RequestMeta,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !Equipment::set_status(&state.pool, id, EquipmentStatus::Retired).await? {
        return Err(AppError::not_found("Equipment"));
    }

    tracing::info!(equipment_id = %id, "Equipment retired");
    audit::record(&state.pool, &meta.audit(&user), "equipment.retire", Some(id), None).await;

    Ok(StatusCode::NO_CONTENT)
}
