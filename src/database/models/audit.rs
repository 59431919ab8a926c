use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EntityEdit {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub field_name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub edited_by: Option<Uuid>,
    pub editor_name: Option<String>,
    pub edit_source: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
