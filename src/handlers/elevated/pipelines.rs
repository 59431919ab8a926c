use axum::extract::{Path, Query};
use serde::{Deserialize, Serialize};

use crate::database::{models::PipelineRun, Paged};
use crate::handlers::pool;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::pipeline::{self, RunReport, REGISTRY};

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PipelineInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// GET /api/admin/pipelines
pub async fn list() -> ApiResult<Vec<PipelineInfo>> {
    let infos = REGISTRY
        .iter()
        .map(|p| PipelineInfo { name: p.name, description: p.description })
        .collect();
    Ok(ApiResponse::success(infos))
}

/// POST /api/admin/pipelines/:name/run
pub async fn run(Path(name): Path<String>) -> ApiResult<RunReport> {
    pipeline::find(&name)?;
    let pool = pool().await?;
    Ok(ApiResponse::success(pipeline::run_pipeline(&pool, &name).await?))
}

/// GET /api/admin/pipeline-runs
pub async fn runs(Query(query): Query<RunsQuery>) -> ApiResult<Paged<PipelineRun>> {
    let pool = pool().await?;
    Ok(ApiResponse::success(pipeline::list_runs(&pool, query.limit, query.offset).await?))
}
