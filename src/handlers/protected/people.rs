use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde_json::Value;
use uuid::Uuid;

use super::MergeRequest;
use crate::auth::AuthStaff;
use crate::database::{models::Person, Paged};
use crate::handlers::{pool, JsonBody};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::merge::MergeOutcome;
use crate::services::patch::PatchOutcome;
use crate::services::people::{self, PersonDetail, PersonFilter};
use crate::types::StaffRole;

/// GET /api/people
pub async fn list(Query(filter): Query<PersonFilter>) -> ApiResult<Paged<Person>> {
    let pool = pool().await?;
    Ok(ApiResponse::success(people::list_people(&pool, &filter).await?))
}

/// GET /api/people/:id
pub async fn show(Path(id): Path<Uuid>) -> ApiResult<PersonDetail> {
    let pool = pool().await?;
    Ok(ApiResponse::success(people::get_person(&pool, id).await?))
}

/// PATCH /api/people/:id
pub async fn update(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<Value>,
) -> ApiResult<PatchOutcome> {
    let Json(body) = body?;
    let pool = pool().await?;
    Ok(ApiResponse::success(people::patch_person(&pool, id, &body, staff.staff_id).await?))
}

/// POST /api/people/:id/merge
pub async fn merge(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<MergeRequest>,
) -> ApiResult<MergeOutcome> {
    staff.require_role(StaffRole::Staff)?;
    let Json(body) = body?;
    let pool = pool().await?;
    let outcome = people::merge_person(&pool, id, body.into, staff.staff_id, body.reason).await?;
    Ok(ApiResponse::success(outcome))
}
