use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const CAT_COLUMNS: &str = "c.id, c.name, c.microchip, c.sex, c.altered_status, c.altered_on, \
     c.primary_color, c.ear_tipped, c.place_id, c.owner_person_id, c.notes, c.created_at, c.updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Cat {
    pub id: Uuid,
    pub name: Option<String>,
    pub microchip: Option<String>,
    pub sex: String,
    pub altered_status: String,
    pub altered_on: Option<NaiveDate>,
    pub primary_color: Option<String>,
    pub ear_tipped: bool,
    pub place_id: Option<Uuid>,
    pub owner_person_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
