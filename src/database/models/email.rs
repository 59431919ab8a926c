use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub template_key: String,
    pub name: String,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EmailBatch {
    pub id: Uuid,
    pub template_id: Uuid,
    pub status: String,
    pub recipient_count: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BatchRecipient {
    pub id: Uuid,
    pub email: String,
    pub person_id: Option<Uuid>,
    pub variables: Value,
    pub status: String,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}
