//! Named batch pipelines with run bookkeeping in `ops.pipeline_runs`.

use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::PipelineRun;
use crate::database::{DatabaseError, ListQuery, Paged};
use crate::services::ingest::{self, IngestError};
use crate::services::matching::{self, MatchSource};
use crate::types::PipelineRunStatus;

pub const AIRTABLE_REQUESTS_CSV_ENV: &str = "ATLAS_AIRTABLE_REQUESTS_CSV";
pub const CLINICHQ_APPOINTMENTS_XLSX_ENV: &str = "ATLAS_CLINICHQ_APPOINTMENTS_XLSX";

const MATCH_SOURCE_LIMIT: i64 = 1000;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown pipeline '{name}' (available: {})", available.join(", "))]
    Unknown { name: String, available: Vec<&'static str> },

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Database(DatabaseError::classify(err))
    }
}

/// What a pipeline body reports back
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Ok(Value),
    Skipped(String),
}

type PipelineFn = for<'a> fn(&'a PgPool) -> BoxFuture<'a, Result<PipelineOutcome, PipelineError>>;

pub struct Pipeline {
    pub name: &'static str,
    pub description: &'static str,
    run: PipelineFn,
}

pub static REGISTRY: &[Pipeline] = &[
    Pipeline {
        name: "airtable_requests",
        description: "Import Airtable trapping requests from ATLAS_AIRTABLE_REQUESTS_CSV",
        run: |pool| Box::pin(run_airtable_requests(pool)),
    },
    Pipeline {
        name: "clinichq_appointments",
        description: "Import ClinicHQ upcoming appointments from ATLAS_CLINICHQ_APPOINTMENTS_XLSX",
        run: |pool| Box::pin(run_clinichq_appointments(pool)),
    },
    Pipeline {
        name: "match_candidates",
        description: "Generate person match candidates from every source",
        run: |pool| Box::pin(run_match_candidates(pool)),
    },
];

pub fn names() -> Vec<&'static str> {
    REGISTRY.iter().map(|p| p.name).collect()
}

pub fn find(name: &str) -> Result<&'static Pipeline, PipelineError> {
    REGISTRY.iter().find(|p| p.name == name).ok_or_else(|| PipelineError::Unknown {
        name: name.to_string(),
        available: names(),
    })
}

/// Input file named by `var`, or the reason the pipeline has nothing to do
fn input_file(var: &str) -> Result<PathBuf, String> {
    let Some(path) = std::env::var(var).ok().filter(|v| !v.trim().is_empty()) else {
        return Err(format!("{} is not set", var));
    };
    let path = PathBuf::from(path.trim());
    if !path.exists() {
        return Err(format!("{} does not exist", path.display()));
    }
    Ok(path)
}

async fn run_airtable_requests(pool: &PgPool) -> Result<PipelineOutcome, PipelineError> {
    let path = match input_file(AIRTABLE_REQUESTS_CSV_ENV) {
        Ok(path) => path,
        Err(reason) => return Ok(PipelineOutcome::Skipped(reason)),
    };
    let summary = ingest::import_trapping_requests(pool, &path, false).await?;
    Ok(PipelineOutcome::Ok(json!(summary)))
}

async fn run_clinichq_appointments(pool: &PgPool) -> Result<PipelineOutcome, PipelineError> {
    let path = match input_file(CLINICHQ_APPOINTMENTS_XLSX_ENV) {
        Ok(path) => path,
        Err(reason) => return Ok(PipelineOutcome::Skipped(reason)),
    };
    let summary = ingest::import_clinichq_appointments(pool, &path, false).await?;
    Ok(PipelineOutcome::Ok(json!(summary)))
}

async fn run_match_candidates(pool: &PgPool) -> Result<PipelineOutcome, PipelineError> {
    let stats = matching::generate_candidates(pool, MatchSource::ALL, MATCH_SOURCE_LIMIT, false).await?;
    Ok(PipelineOutcome::Ok(json!(stats)))
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: &'static str,
    pub status: PipelineRunStatus,
    pub row_counts: Value,
    pub error: Option<String>,
}

/// Run one pipeline and record it. A failing body is recorded as `error`
/// and returned in the report, not as `Err`.
pub async fn run_pipeline(pool: &PgPool, name: &str) -> Result<RunReport, PipelineError> {
    let pipeline = find(name)?;
    let run_id: Uuid = sqlx::query_scalar(
        "INSERT INTO ops.pipeline_runs (pipeline_name, status) VALUES ($1, 'running') RETURNING id",
    )
    .bind(pipeline.name)
    .fetch_one(pool)
    .await?;
    tracing::info!(pipeline = pipeline.name, %run_id, "Pipeline started");

    let (status, row_counts, details, error) = match (pipeline.run)(pool).await {
        Ok(PipelineOutcome::Ok(counts)) => (PipelineRunStatus::Ok, counts, json!({}), None),
        Ok(PipelineOutcome::Skipped(reason)) => {
            tracing::warn!(pipeline = pipeline.name, "Pipeline skipped: {}", reason);
            (PipelineRunStatus::Skipped, json!({}), json!({ "reason": reason }), None)
        }
        Err(err) => {
            tracing::error!(pipeline = pipeline.name, "Pipeline failed: {}", err);
            (PipelineRunStatus::Error, json!({}), json!({}), Some(err.to_string()))
        }
    };

    sqlx::query(
        "UPDATE ops.pipeline_runs SET status = $2, row_counts = $3, details = $4, error_message = $5, \
         finished_at = now() WHERE id = $1",
    )
    .bind(run_id)
    .bind(status.as_str())
    .bind(&row_counts)
    .bind(&details)
    .bind(error.as_deref())
    .execute(pool)
    .await?;

    Ok(RunReport {
        run_id,
        pipeline: pipeline.name,
        status,
        row_counts,
        error,
    })
}

pub async fn run_all(pool: &PgPool) -> Result<Vec<RunReport>, PipelineError> {
    let mut reports = Vec::with_capacity(REGISTRY.len());
    for pipeline in REGISTRY {
        reports.push(run_pipeline(pool, pipeline.name).await?);
    }
    Ok(reports)
}

pub async fn list_runs(pool: &PgPool, limit: Option<i64>, offset: Option<i64>) -> Result<Paged<PipelineRun>, DatabaseError> {
    let mut q = ListQuery::new(
        "SELECT pr.id, pr.pipeline_name, pr.status, pr.details, pr.row_counts, pr.error_message, \
         pr.started_at, pr.finished_at FROM ops.pipeline_runs pr",
    );
    q.order_by("pr.started_at DESC").paginate(limit, offset)?;
    q.fetch_page(pool).await
}
