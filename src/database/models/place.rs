use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Place joined with its address (`pl` / `a` aliases)
pub const PLACE_SELECT: &str = "SELECT pl.id, pl.display_name, pl.place_kind, pl.notes, pl.address_id, \
     a.raw_address, a.formatted_address, a.latitude, a.longitude, pl.merged_into_place_id, \
     pl.created_at, pl.updated_at \
     FROM sot.places pl LEFT JOIN sot.addresses a ON a.id = pl.address_id";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Place {
    pub id: Uuid,
    pub display_name: String,
    pub place_kind: Option<String>,
    pub notes: Option<String>,
    pub address_id: Option<Uuid>,
    pub raw_address: Option<String>,
    pub formatted_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub merged_into_place_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
