use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MatchCandidateRow {
    pub id: Uuid,
    pub source_system: String,
    pub source_record_id: String,
    pub candidate_person_id: Uuid,
    pub candidate_name: Option<String>,
    pub confidence: f64,
    pub evidence: Value,
    pub status: String,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
