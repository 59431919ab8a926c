use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

pub const STAFF_COLUMNS: &str =
    "s.id, s.email, s.display_name, s.role, s.password_hash, s.is_active, s.last_login_at, s.created_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Staff {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StaffSession {
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub staff_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
}
