use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::handlers::{pool, JsonBody};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::intake::{self, NewIntake};

/// POST /api/intake - public submission form
pub async fn submit_intake(body: JsonBody<NewIntake>) -> ApiResult<Value> {
    let Json(input) = body?;
    input
        .validate()
        .map_err(|errors| ApiError::unprocessable("Invalid intake submission", errors))?;

    let pool = pool().await?;
    let id = intake::submit_intake(&pool, &input).await?;
    Ok(ApiResponse::created(json!({ "id": id })))
}
