use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthStaff;
use crate::database::{
    models::{Request, RequestNote},
    Paged,
};
use crate::handlers::{pool, JsonBody};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::patch::PatchOutcome;
use crate::services::requests::{self, NewNote, NewRequest, RequestDetail, RequestFilter};
use crate::types::ArchiveReason;

#[derive(Debug, Deserialize)]
pub struct ArchiveBody {
    pub reason: ArchiveReason,
    pub note: Option<String>,
}

/// GET /api/requests
pub async fn list(Query(filter): Query<RequestFilter>) -> ApiResult<Paged<Request>> {
    let query = requests::list_query(&filter)?;
    let pool = pool().await?;
    Ok(ApiResponse::success(query.fetch_page(&pool).await?))
}

/// POST /api/requests
pub async fn create(Extension(staff): Extension<AuthStaff>, body: JsonBody<NewRequest>) -> ApiResult<Request> {
    let Json(input) = body?;
    let pool = pool().await?;
    let request = requests::create_request(&pool, input, staff.staff_id).await?;
    Ok(ApiResponse::created(request))
}

/// GET /api/requests/:id
pub async fn show(Path(id): Path<Uuid>) -> ApiResult<RequestDetail> {
    let pool = pool().await?;
    Ok(ApiResponse::success(requests::get_request(&pool, id).await?))
}

/// PATCH /api/requests/:id
pub async fn update(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<Value>,
) -> ApiResult<PatchOutcome> {
    let Json(body) = body?;
    let pool = pool().await?;
    Ok(ApiResponse::success(requests::patch_request(&pool, id, &body, staff.staff_id).await?))
}

/// POST /api/requests/:id/notes
pub async fn add_note(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<NewNote>,
) -> ApiResult<RequestNote> {
    let Json(note) = body?;
    let pool = pool().await?;
    let row = requests::add_note(&pool, id, &note, staff.staff_id).await?;
    Ok(ApiResponse::created(row))
}

/// POST /api/requests/:id/archive
pub async fn archive(
    Extension(staff): Extension<AuthStaff>,
    Path(id): Path<Uuid>,
    body: JsonBody<ArchiveBody>,
) -> ApiResult<PatchOutcome> {
    let Json(body) = body?;
    let pool = pool().await?;
    let outcome = requests::archive_request(&pool, id, body.reason, staff.staff_id, body.note).await?;
    Ok(ApiResponse::success(outcome))
}
