use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::models::cat::CAT_COLUMNS;
use crate::database::models::place::PLACE_SELECT;
use crate::database::models::request::REQUEST_COLUMNS;
use crate::database::models::{Cat, ColonyObservation, Place, Request};
use crate::database::{DatabaseError, ListQuery, Paged, SqlParam};
use crate::error::ApiError;
use crate::services::audit::EditContext;
use crate::services::colony::{self, ColonyEstimate, NewObservation, PlaceColony};
use crate::services::ingest::normalize::{address_key, norm_ws, place_key};
use crate::services::merge::{self, MergeOutcome, MergeTarget};
use crate::services::patch::{self, FieldKind, FieldSpec, PatchOutcome, PatchTarget};
use crate::types::EntityType;

pub static PLACE_PATCH: PatchTarget = PatchTarget {
    entity: EntityType::Place,
    table: "sot.places",
    fields: &[
        FieldSpec::required("display_name", FieldKind::Text),
        FieldSpec::new("place_kind", FieldKind::Text),
        FieldSpec::new("notes", FieldKind::Text),
    ],
};

pub static PLACE_MERGE: MergeTarget = MergeTarget {
    entity: EntityType::Place,
    table: "sot.places",
    pointer: "merged_into_place_id",
    repoint: &[
        "UPDATE ops.requests SET primary_place_id = $2, updated_at = now() WHERE primary_place_id = $1",
        "UPDATE sot.cats SET place_id = $2, updated_at = now() WHERE place_id = $1",
        "UPDATE ops.colony_observations SET place_id = $2 WHERE place_id = $1",
    ],
};

#[derive(Debug, Default, Deserialize)]
pub struct PlaceFilter {
    pub q: Option<String>,
    pub place_kind: Option<String>,
    pub include_merged: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PlaceDetail {
    #[serde(flatten)]
    pub place: Place,
    pub cats: Vec<Cat>,
    pub requests: Vec<Request>,
    pub colony: ColonyEstimate,
}

pub fn list_query(filter: &PlaceFilter) -> Result<ListQuery, DatabaseError> {
    let mut q = ListQuery::new(PLACE_SELECT);
    if !filter.include_merged.unwrap_or(false) {
        q.where_static("pl.merged_into_place_id IS NULL");
    }
    if let Some(kind) = filter.place_kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        q.where_eq("pl.place_kind", SqlParam::Text(kind.to_string()));
    }
    q.search(&["pl.display_name", "a.raw_address", "a.formatted_address"], filter.q.as_deref())
        .order_by("pl.display_name, pl.created_at DESC")
        .paginate(filter.limit, filter.offset)?;
    Ok(q)
}

pub async fn list_places(pool: &PgPool, filter: &PlaceFilter) -> Result<Paged<Place>, DatabaseError> {
    list_query(filter)?.fetch_page(pool).await
}

pub async fn find_place(pool: &PgPool, id: Uuid) -> Result<Option<Place>, DatabaseError> {
    let sql = format!("{} WHERE pl.id = $1", PLACE_SELECT);
    Ok(sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?)
}

async fn require_place(pool: &PgPool, id: Uuid) -> Result<Place, ApiError> {
    find_place(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("place {} not found", id)))
}

/// Place with its cats, requests and current colony estimate
pub async fn get_place(pool: &PgPool, id: Uuid) -> Result<PlaceDetail, ApiError> {
    let place = require_place(pool, id).await?;

    let sql = format!("SELECT {} FROM sot.cats c WHERE c.place_id = $1 ORDER BY c.name", CAT_COLUMNS);
    let cats = sqlx::query_as(&sql).bind(id).fetch_all(pool).await.map_err(DatabaseError::from)?;

    let sql = format!(
        "SELECT {} FROM ops.requests r WHERE r.primary_place_id = $1 ORDER BY r.created_at DESC",
        REQUEST_COLUMNS
    );
    let requests = sqlx::query_as(&sql).bind(id).fetch_all(pool).await.map_err(DatabaseError::from)?;

    let colony = colony::load_place_colony(pool, id).await?.estimate;
    Ok(PlaceDetail { place, cats, requests, colony })
}

pub async fn patch_place(pool: &PgPool, id: Uuid, body: &Value, editor: Uuid) -> Result<PatchOutcome, ApiError> {
    let patch = patch::parse_patch(&PLACE_PATCH, body, &["reason"])?;
    let reason = patch::reason_of(body);
    let ctx = EditContext::api(editor).with_reason(reason.as_deref());
    patch::patch_entity(pool, &PLACE_PATCH, id, patch, ctx).await
}

pub async fn merge_place(
    pool: &PgPool,
    id: Uuid,
    into: Uuid,
    editor: Uuid,
    reason: Option<String>,
) -> Result<MergeOutcome, ApiError> {
    merge::merge(pool, &PLACE_MERGE, id, into, editor, reason).await
}

pub async fn place_colony(pool: &PgPool, id: Uuid) -> Result<PlaceColony, ApiError> {
    require_place(pool, id).await?;
    Ok(colony::load_place_colony(pool, id).await?)
}

pub async fn add_observation(
    pool: &PgPool,
    place_id: Uuid,
    observation: &NewObservation,
    recorded_by: Uuid,
) -> Result<ColonyObservation, ApiError> {
    observation
        .validate()
        .map_err(|errors| ApiError::unprocessable("Invalid colony observation", errors))?;
    require_place(pool, place_id).await?;
    let mut conn = pool.acquire().await.map_err(DatabaseError::from)?;
    let row = colony::insert_observation(&mut conn, place_id, observation, Some(recorded_by)).await?;
    tracing::info!(%place_id, source = %observation.source_type, "Recorded colony observation");
    Ok(row)
}

/// Find or create the place behind a free-text address. Existing rows keep
/// their names and coordinates.
pub async fn upsert_address_place(
    conn: &mut PgConnection,
    raw_address: &str,
    place_name: Option<&str>,
) -> Result<Uuid, DatabaseError> {
    let raw = norm_ws(raw_address);
    let name = place_name.map(norm_ws).unwrap_or_default();
    let key = place_key(&name, &raw).ok_or_else(|| DatabaseError::InvalidInput("address is blank".to_string()))?;

    let address_id: Uuid = sqlx::query_scalar(
        "INSERT INTO sot.addresses (address_key, raw_address) VALUES ($1, $2) \
         ON CONFLICT (address_key) DO UPDATE SET raw_address = sot.addresses.raw_address \
         RETURNING id",
    )
    .bind(address_key(&raw))
    .bind(&raw)
    .fetch_one(&mut *conn)
    .await?;

    let display_name = if name.is_empty() { raw.as_str() } else { name.as_str() };
    let place_id: Uuid = sqlx::query_scalar(
        "INSERT INTO sot.places (place_key, display_name, address_id) VALUES ($1, $2, $3) \
         ON CONFLICT (place_key) DO UPDATE SET address_id = coalesce(sot.places.address_id, EXCLUDED.address_id) \
         RETURNING id",
    )
    .bind(&key)
    .bind(display_name)
    .bind(address_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(place_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_name_cannot_be_cleared() {
        let err = patch::parse_patch(&PLACE_PATCH, &json!({"display_name": "  "}), &[]).unwrap_err();
        assert!(err.to_json()["field_errors"]["display_name"].is_string());
    }

    #[test]
    fn search_covers_address_columns() {
        let filter = PlaceFilter { q: Some("elm".into()), ..Default::default() };
        let sql = list_query(&filter).unwrap().to_sql();
        assert!(sql.contains("a.raw_address ILIKE"));
        assert!(sql.contains("pl.merged_into_place_id IS NULL"));
    }
}
