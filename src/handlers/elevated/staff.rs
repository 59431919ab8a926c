use axum::{extract::Path, Extension, Json};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthStaff;
use crate::database::models::Staff;
use crate::handlers::{pool, JsonBody};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::patch::PatchOutcome;
use crate::services::staff::{self, NewStaff};

/// GET /api/admin/staff
pub async fn list() -> ApiResult<Vec<Staff>> {
    let pool = pool().await?;
    Ok(ApiResponse::success(staff::list_staff(&pool).await?))
}

/// POST /api/admin/staff
pub async fn create(body: JsonBody<NewStaff>) -> ApiResult<Staff> {
    let Json(input) = body?;
    let pool = pool().await?;
    Ok(ApiResponse::created(staff::create_staff(&pool, &input).await?))
}

/// PATCH /api/admin/staff/:id
pub async fn update(
    Extension(admin): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<Value>,
) -> ApiResult<PatchOutcome> {
    let Json(body) = body?;
    let pool = pool().await?;
    Ok(ApiResponse::success(staff::patch_staff(&pool, id, &body, admin.staff_id).await?))
}
