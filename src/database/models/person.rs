use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const PERSON_COLUMNS: &str = "p.id, p.first_name, p.last_name, p.display_name, p.email, p.phone, \
     p.phone_normalized, p.notes, p.do_not_contact, p.merged_into_person_id, p.created_at, p.updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Person {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub phone_normalized: Option<String>,
    pub notes: Option<String>,
    pub do_not_contact: bool,
    pub merged_into_person_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
