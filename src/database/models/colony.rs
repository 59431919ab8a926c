use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ColonyObservation {
    pub id: Uuid,
    pub place_id: Uuid,
    pub source_type: String,
    pub observed_on: NaiveDate,
    pub total_cats: Option<i32>,
    pub altered_count: Option<i32>,
    pub eartipped_seen: Option<i32>,
    pub notes: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
