use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const INTAKE_COLUMNS: &str = "i.id, i.status, i.first_name, i.last_name, i.email, i.phone, \
     i.cats_address, i.cat_count_estimate, i.has_kittens, i.is_feeding, i.situation, i.triage_notes, \
     i.converted_request_id, i.submitted_at, i.updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct IntakeSubmission {
    pub id: Uuid,
    pub status: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cats_address: String,
    pub cat_count_estimate: Option<i32>,
    pub has_kittens: Option<bool>,
    pub is_feeding: Option<bool>,
    pub situation: Option<String>,
    pub triage_notes: Option<String>,
    pub converted_request_id: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
