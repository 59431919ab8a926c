use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthStaff;
use crate::database::{models::Cat, Paged};
use crate::handlers::{pool, JsonBody};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::cats::{self, CatDetail, CatFilter};
use crate::services::patch::PatchOutcome;

/// GET /api/cats
pub async fn list(Query(filter): Query<CatFilter>) -> ApiResult<Paged<Cat>> {
    let query = cats::list_query(&filter)?;
    let pool = pool().await?;
    Ok(ApiResponse::success(query.fetch_page(&pool).await?))
}

/// GET /api/cats/:id
pub async fn show(Path(id): Path<Uuid>) -> ApiResult<CatDetail> {
    let pool = pool().await?;
    Ok(ApiResponse::success(cats::get_cat(&pool, id).await?))
}

/// PATCH /api/cats/:id
pub async fn update(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<Value>,
) -> ApiResult<PatchOutcome> {
    let Json(body) = body?;
    let pool = pool().await?;
    Ok(ApiResponse::success(cats::patch_cat(&pool, id, &body, staff.staff_id).await?))
}
