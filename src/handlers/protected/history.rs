use axum::extract::{Path, Query};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::EntityEdit;
use crate::handlers::pool;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::audit;
use crate::types::EntityType;

const DEFAULT_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// GET /api/history/:entity_type/:id - field edits, newest first
pub async fn show(
    Path((entity_type, id)): Path<(String, Uuid)>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<EntityEdit>> {
    let entity_type: EntityType = entity_type.parse()?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 1000);
    let pool = pool().await?;
    Ok(ApiResponse::success(audit::history(&pool, entity_type, id, limit).await?))
}
