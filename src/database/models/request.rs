use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const REQUEST_COLUMNS: &str = "r.id, r.case_number, r.source_record_id, r.primary_place_id, \
     r.primary_contact_person_id, r.status, r.priority, r.priority_label, r.summary, r.notes, \
     r.estimated_cat_count, r.archive_reason, r.archived_at, r.merged_into_case_number, \
     r.resolved_at, r.created_at, r.updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Request {
    pub id: Uuid,
    pub case_number: String,
    pub source_record_id: Option<String>,
    pub primary_place_id: Option<Uuid>,
    pub primary_contact_person_id: Option<Uuid>,
    pub status: Option<String>,
    pub priority: Option<i32>,
    pub priority_label: Option<String>,
    pub summary: Option<String>,
    pub notes: Option<String>,
    pub estimated_cat_count: Option<i32>,
    pub archive_reason: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
    pub merged_into_case_number: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RequestNote {
    pub id: Uuid,
    pub note_kind: String,
    pub note_body: String,
    pub source_system: String,
    pub author_staff_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RequestParty {
    pub person_id: Uuid,
    pub role: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}
