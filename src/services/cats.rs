use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::cat::CAT_COLUMNS;
use crate::database::models::{Cat, Place};
use crate::database::{DatabaseError, ListQuery, Paged, SqlParam};
use crate::error::ApiError;
use crate::services::audit::EditContext;
use crate::services::patch::{self, FieldKind, FieldSpec, PatchOutcome, PatchTarget};
use crate::services::places;
use crate::types::{AlteredStatus, CatSex, EntityType};

static CAT_SELECT: Lazy<String> = Lazy::new(|| format!("SELECT {} FROM sot.cats c", CAT_COLUMNS));

pub static CAT_PATCH: PatchTarget = PatchTarget {
    entity: EntityType::Cat,
    table: "sot.cats",
    fields: &[
        FieldSpec::new("name", FieldKind::Text),
        FieldSpec::new("microchip", FieldKind::Text),
        FieldSpec::required("sex", FieldKind::Enum(CatSex::ALL)),
        FieldSpec::required("altered_status", FieldKind::Enum(AlteredStatus::ALL)),
        FieldSpec::new("altered_on", FieldKind::Date),
        FieldSpec::new("primary_color", FieldKind::Text),
        FieldSpec::required("ear_tipped", FieldKind::Bool),
        FieldSpec::new("place_id", FieldKind::Uuid),
        FieldSpec::new("owner_person_id", FieldKind::Uuid),
        FieldSpec::new("notes", FieldKind::Text),
    ],
};

#[derive(Debug, Default, Deserialize)]
pub struct CatFilter {
    pub q: Option<String>,
    pub place_id: Option<Uuid>,
    pub altered_status: Option<String>,
    pub sex: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CatDetail {
    #[serde(flatten)]
    pub cat: Cat,
    pub place: Option<Place>,
}

pub fn list_query(filter: &CatFilter) -> Result<ListQuery, ApiError> {
    let mut q = ListQuery::new(CAT_SELECT.as_str());
    if let Some(place_id) = filter.place_id {
        q.where_eq("c.place_id", SqlParam::Uuid(place_id));
    }
    if let Some(status) = filter.altered_status.as_deref() {
        let status: AlteredStatus = status.parse()?;
        q.where_eq("c.altered_status", SqlParam::Text(status.as_str().to_string()));
    }
    if let Some(sex) = filter.sex.as_deref() {
        let sex: CatSex = sex.parse()?;
        q.where_eq("c.sex", SqlParam::Text(sex.as_str().to_string()));
    }
    q.search(&["c.name", "c.microchip", "c.primary_color"], filter.q.as_deref())
        .order_by("c.created_at DESC")
        .paginate(filter.limit, filter.offset)?;
    Ok(q)
}

pub async fn list_cats(pool: &PgPool, filter: &CatFilter) -> Result<Paged<Cat>, ApiError> {
    Ok(list_query(filter)?.fetch_page(pool).await?)
}

pub async fn get_cat(pool: &PgPool, id: Uuid) -> Result<CatDetail, ApiError> {
    let sql = format!("{} WHERE c.id = $1", CAT_SELECT.as_str());
    let cat: Cat = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(DatabaseError::from)?
        .ok_or_else(|| ApiError::not_found(format!("cat {} not found", id)))?;
    let place = match cat.place_id {
        Some(place_id) => places::find_place(pool, place_id).await?,
        None => None,
    };
    Ok(CatDetail { cat, place })
}

pub async fn patch_cat(pool: &PgPool, id: Uuid, body: &Value, editor: Uuid) -> Result<PatchOutcome, ApiError> {
    let patch = patch::parse_patch(&CAT_PATCH, body, &["reason"])?;
    let reason = patch::reason_of(body);
    let ctx = EditContext::api(editor).with_reason(reason.as_deref());
    patch::patch_entity(pool, &CAT_PATCH, id, patch, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bad_filter_enum_is_422() {
        let filter = CatFilter { altered_status: Some("spayed".into()), ..Default::default() };
        let err = list_query(&filter).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn patch_validates_enums() {
        let err = patch::parse_patch(&CAT_PATCH, &json!({"altered_status": "fixed"}), &["reason"]).unwrap_err();
        assert!(err.to_json()["field_errors"]["altered_status"].is_string());
        assert!(patch::parse_patch(&CAT_PATCH, &json!({"ear_tipped": true, "reason": "seen"}), &["reason"]).is_ok());
    }
}
