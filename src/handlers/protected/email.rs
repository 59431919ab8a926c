use axum::{extract::Path, Extension, Json};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::AuthStaff;
use crate::config;
use crate::database::models::EmailTemplate;
use crate::error::ApiError;
use crate::handlers::{pool, JsonBody};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::email::{
    batch::{self, BatchDetail, RecipientInput},
    transport_from_config, RenderedEmail,
};
use crate::types::StaffRole;

#[derive(Debug, Default, Deserialize)]
pub struct PreviewBody {
    #[serde(default)]
    pub vars: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct NewBatch {
    pub template_key: String,
    pub recipients: Vec<RecipientInput>,
}

/// GET /api/email/templates
pub async fn templates() -> ApiResult<Vec<EmailTemplate>> {
    let pool = pool().await?;
    Ok(ApiResponse::success(batch::list_templates(&pool).await?))
}

/// POST /api/email/templates/:key/preview
pub async fn preview(Path(key): Path<String>, body: JsonBody<PreviewBody>) -> ApiResult<RenderedEmail> {
    let Json(body) = body?;
    let pool = pool().await?;
    let template = batch::find_template(&pool, &key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Email template '{}' not found", key)))?;
    Ok(ApiResponse::success(template.render(&body.vars)?))
}

/// POST /api/email/batches
pub async fn create_batch(Extension(staff): Extension<AuthStaff>, body: JsonBody<NewBatch>) -> ApiResult<BatchDetail> {
    staff.require_role(StaffRole::Staff)?;
    let Json(body) = body?;
    let pool = pool().await?;
    let max = config::config().email.max_batch_size;
    let detail = batch::create_batch(&pool, &body.template_key, body.recipients, max, staff.staff_id).await?;
    Ok(ApiResponse::created(detail))
}

/// GET /api/email/batches/:id
pub async fn show_batch(Path(id): Path<Uuid>) -> ApiResult<BatchDetail> {
    let pool = pool().await?;
    Ok(ApiResponse::success(batch::get_batch(&pool, id).await?))
}

/// POST /api/email/batches/:id/send
pub async fn send_batch(Extension(staff): Extension<AuthStaff>, Path(id): Path<Uuid>) -> ApiResult<BatchDetail> {
    staff.require_role(StaffRole::Staff)?;
    let email = &config::config().email;
    let transport = transport_from_config(email)?;
    let pool = pool().await?;
    tracing::info!(batch_id = %id, transport = transport.name(), staff_id = %staff.staff_id, "Sending email batch");
    let detail = batch::send_batch(&pool, transport.as_ref(), &email.from_address, id).await?;
    Ok(ApiResponse::success(detail))
}
