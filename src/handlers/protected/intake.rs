use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthStaff;
use crate::database::{models::IntakeSubmission, Paged};
use crate::handlers::{pool, JsonBody};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::intake::{self, ConvertOutcome, IntakeFilter};
use crate::services::patch::PatchOutcome;

/// GET /api/intake - triage queue
pub async fn list(Query(filter): Query<IntakeFilter>) -> ApiResult<Paged<IntakeSubmission>> {
    let query = intake::list_query(&filter)?;
    let pool = pool().await?;
    Ok(ApiResponse::success(query.fetch_page(&pool).await?))
}

/// GET /api/intake/:id
pub async fn show(Path(id): Path<Uuid>) -> ApiResult<IntakeSubmission> {
    let pool = pool().await?;
    Ok(ApiResponse::success(intake::get_intake(&pool, id).await?))
}

/// PATCH /api/intake/:id
pub async fn update(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<Value>,
) -> ApiResult<PatchOutcome> {
    let Json(body) = body?;
    let pool = pool().await?;
    Ok(ApiResponse::success(intake::patch_intake(&pool, id, &body, staff.staff_id).await?))
}

/// POST /api/intake/:id/convert
pub async fn convert(Extension(staff): Extension<AuthStaff>, Path(id): Path<Uuid>) -> ApiResult<ConvertOutcome> {
    let pool = pool().await?;
    let outcome = intake::convert_intake(&pool, id, staff.staff_id).await?;
    Ok(ApiResponse::created(outcome))
}
