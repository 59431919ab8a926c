use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde_json::Value;
use uuid::Uuid;

use super::MergeRequest;
use crate::auth::AuthStaff;
use crate::database::{
    models::{ColonyObservation, Place},
    Paged,
};
use crate::handlers::{pool, JsonBody};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::colony::{NewObservation, PlaceColony};
use crate::services::merge::MergeOutcome;
use crate::services::patch::PatchOutcome;
use crate::services::places::{self, PlaceDetail, PlaceFilter};
use crate::types::StaffRole;

/// GET /api/places
pub async fn list(Query(filter): Query<PlaceFilter>) -> ApiResult<Paged<Place>> {
    let pool = pool().await?;
    Ok(ApiResponse::success(places::list_places(&pool, &filter).await?))
}

/// GET /api/places/:id
pub async fn show(Path(id): Path<Uuid>) -> ApiResult<PlaceDetail> {
    let pool = pool().await?;
    Ok(ApiResponse::success(places::get_place(&pool, id).await?))
}

/// PATCH /api/places/:id
pub async fn update(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<Value>,
) -> ApiResult<PatchOutcome> {
    let Json(body) = body?;
    let pool = pool().await?;
    Ok(ApiResponse::success(places::patch_place(&pool, id, &body, staff.staff_id).await?))
}

/// POST /api/places/:id/merge
pub async fn merge(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<MergeRequest>,
) -> ApiResult<MergeOutcome> {
    staff.require_role(StaffRole::Staff)?;
    let Json(body) = body?;
    let pool = pool().await?;
    let outcome = places::merge_place(&pool, id, body.into, staff.staff_id, body.reason).await?;
    Ok(ApiResponse::success(outcome))
}

/// GET /api/places/:id/colony
pub async fn colony(Path(id): Path<Uuid>) -> ApiResult<PlaceColony> {
    let pool = pool().await?;
    Ok(ApiResponse::success(places::place_colony(&pool, id).await?))
}

/// POST /api/places/:id/colony-observations
pub async fn add_observation(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<NewObservation>,
) -> ApiResult<ColonyObservation> {
    let Json(observation) = body?;
    let pool = pool().await?;
    let row = places::add_observation(&pool, id, &observation, staff.staff_id).await?;
    Ok(ApiResponse::created(row))
}
