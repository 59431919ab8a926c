use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::models::cat::CAT_COLUMNS;
use crate::database::models::person::PERSON_COLUMNS;
use crate::database::models::request::REQUEST_COLUMNS;
use crate::database::models::{Cat, Person, Request};
use crate::database::{DatabaseError, ListQuery, Paged, SqlParam};
use crate::error::ApiError;
use crate::services::audit::EditContext;
use crate::services::email::is_valid_email;
use crate::services::ingest::normalize::{normalize_phone, person_key};
use crate::services::merge::{self, MergeOutcome, MergeTarget};
use crate::services::patch::{self, FieldKind, FieldSpec, PatchOutcome, PatchTarget};
use crate::types::EntityType;

static PERSON_SELECT: Lazy<String> = Lazy::new(|| format!("SELECT {} FROM sot.people p", PERSON_COLUMNS));

pub static PERSON_PATCH: PatchTarget = PatchTarget {
    entity: EntityType::Person,
    table: "sot.people",
    fields: &[
        FieldSpec::new("first_name", FieldKind::Text),
        FieldSpec::new("last_name", FieldKind::Text),
        FieldSpec::new("email", FieldKind::Text),
        FieldSpec::new("phone", FieldKind::Text),
        FieldSpec::new("notes", FieldKind::Text),
        FieldSpec::required("do_not_contact", FieldKind::Bool),
    ],
};

static PHONE_NORMALIZED: FieldSpec = FieldSpec::new("phone_normalized", FieldKind::Text);

pub static PERSON_MERGE: MergeTarget = MergeTarget {
    entity: EntityType::Person,
    table: "sot.people",
    pointer: "merged_into_person_id",
    repoint: &[
        "UPDATE ops.requests SET primary_contact_person_id = $2, updated_at = now() \
         WHERE primary_contact_person_id = $1",
        "INSERT INTO ops.request_parties (request_id, person_id, role, created_at) \
         SELECT request_id, $2, role, created_at FROM ops.request_parties WHERE person_id = $1 \
         ON CONFLICT DO NOTHING",
        "DELETE FROM ops.request_parties WHERE person_id = $1",
        "UPDATE sot.cats SET owner_person_id = $2, updated_at = now() WHERE owner_person_id = $1",
    ],
};

#[derive(Debug, Default, Deserialize)]
pub struct PersonFilter {
    pub q: Option<String>,
    pub do_not_contact: Option<bool>,
    pub include_merged: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PersonDetail {
    #[serde(flatten)]
    pub person: Person,
    pub requests: Vec<Request>,
    pub cats: Vec<Cat>,
}

pub fn list_query(filter: &PersonFilter) -> Result<ListQuery, DatabaseError> {
    let mut q = ListQuery::new(PERSON_SELECT.as_str());
    if !filter.include_merged.unwrap_or(false) {
        q.where_static("p.merged_into_person_id IS NULL");
    }
    if let Some(flag) = filter.do_not_contact {
        q.where_eq("p.do_not_contact", SqlParam::Bool(flag));
    }
    q.search(&["p.display_name", "p.email", "p.phone", "p.phone_normalized"], filter.q.as_deref())
        .order_by("p.display_name NULLS LAST, p.created_at DESC")
        .paginate(filter.limit, filter.offset)?;
    Ok(q)
}

pub async fn list_people(pool: &PgPool, filter: &PersonFilter) -> Result<Paged<Person>, DatabaseError> {
    list_query(filter)?.fetch_page(pool).await
}

pub async fn find_person(pool: &PgPool, id: Uuid) -> Result<Option<Person>, DatabaseError> {
    let sql = format!("{} WHERE p.id = $1", PERSON_SELECT.as_str());
    Ok(sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?)
}

/// Person with the requests they are party to and the cats they own
pub async fn get_person(pool: &PgPool, id: Uuid) -> Result<PersonDetail, ApiError> {
    let person = find_person(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("person {} not found", id)))?;

    let sql = format!(
        "SELECT {} FROM ops.requests r \
         WHERE r.primary_contact_person_id = $1 \
            OR EXISTS (SELECT 1 FROM ops.request_parties rp WHERE rp.request_id = r.id AND rp.person_id = $1) \
         ORDER BY r.created_at DESC",
        REQUEST_COLUMNS
    );
    let requests = sqlx::query_as(&sql).bind(id).fetch_all(pool).await.map_err(DatabaseError::from)?;

    let sql = format!("SELECT {} FROM sot.cats c WHERE c.owner_person_id = $1 ORDER BY c.name", CAT_COLUMNS);
    let cats = sqlx::query_as(&sql).bind(id).fetch_all(pool).await.map_err(DatabaseError::from)?;

    Ok(PersonDetail { person, requests, cats })
}

/// Parse a person patch. Email is checked and lowercased; a phone change
/// recomputes `phone_normalized`.
pub fn prepare_patch(body: &Value) -> Result<patch::Patch, ApiError> {
    let mut patch = patch::parse_patch(&PERSON_PATCH, body, &["reason"])?;

    if let Some(Value::String(email)) = patch.get("email").cloned() {
        if !is_valid_email(&email) {
            return Err(ApiError::invalid_field("email", "must be a valid email address"));
        }
        if let Some(field) = PERSON_PATCH.field("email") {
            patch.set(field, Value::String(email.to_lowercase()));
        }
    }

    if let Some(phone) = patch.get("phone").cloned() {
        let digits = phone.as_str().map(normalize_phone).unwrap_or_default();
        let normalized = if digits.is_empty() { Value::Null } else { Value::String(digits) };
        patch.set(&PHONE_NORMALIZED, normalized);
    }
    Ok(patch)
}

pub async fn patch_person(pool: &PgPool, id: Uuid, body: &Value, editor: Uuid) -> Result<PatchOutcome, ApiError> {
    let patch = prepare_patch(body)?;
    let reason = patch::reason_of(body);
    let ctx = EditContext::api(editor).with_reason(reason.as_deref());
    patch::patch_entity(pool, &PERSON_PATCH, id, patch, ctx).await
}

pub async fn merge_person(
    pool: &PgPool,
    id: Uuid,
    into: Uuid,
    editor: Uuid,
    reason: Option<String>,
) -> Result<MergeOutcome, ApiError> {
    merge::merge(pool, &PERSON_MERGE, id, into, editor, reason).await
}

/// Contact details arriving from a form or import
#[derive(Debug, Clone, Default)]
pub struct ContactInput<'a> {
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
}

/// Column values for a contact: trimmed text, lowercased email, and the
/// phone kept as entered next to its digits-only form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactColumns {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub phone_normalized: Option<String>,
}

impl ContactInput<'_> {
    pub fn columns(&self) -> ContactColumns {
        let text = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        ContactColumns {
            first_name: text(self.first_name),
            last_name: text(self.last_name),
            email: text(self.email).map(|e| e.to_lowercase()),
            phone: text(self.phone),
            phone_normalized: self.phone.map(normalize_phone).filter(|p| !p.is_empty()),
        }
    }
}

/// Find or create a person by natural key (email, then phone, then name).
/// Blank fields never overwrite stored values. `None` when nothing identifies them.
pub async fn upsert_contact(conn: &mut PgConnection, contact: &ContactInput<'_>) -> Result<Option<Uuid>, DatabaseError> {
    let cols = contact.columns();
    let Some(key) = person_key(
        cols.first_name.as_deref().unwrap_or_default(),
        cols.last_name.as_deref().unwrap_or_default(),
        cols.email.as_deref().unwrap_or_default(),
        cols.phone_normalized.as_deref().unwrap_or_default(),
    ) else {
        return Ok(None);
    };

    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO sot.people (person_key, first_name, last_name, email, phone, phone_normalized) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (person_key) DO UPDATE SET \
           first_name = coalesce(EXCLUDED.first_name, sot.people.first_name), \
           last_name = coalesce(EXCLUDED.last_name, sot.people.last_name), \
           email = coalesce(EXCLUDED.email, sot.people.email), \
           phone = coalesce(EXCLUDED.phone, sot.people.phone), \
           phone_normalized = coalesce(EXCLUDED.phone_normalized, sot.people.phone_normalized), \
           updated_at = now() \
         RETURNING id",
    )
    .bind(&key)
    .bind(cols.first_name)
    .bind(cols.last_name)
    .bind(cols.email)
    .bind(cols.phone)
    .bind(cols.phone_normalized)
    .fetch_one(&mut *conn)
    .await?;
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phone_change_recomputes_normalized() {
        let patch = prepare_patch(&json!({"phone": "+1 (707) 555-0100"})).unwrap();
        assert_eq!(patch.get("phone_normalized"), Some(&json!("7075550100")));

        let cleared = prepare_patch(&json!({"phone": null})).unwrap();
        assert_eq!(cleared.get("phone_normalized"), Some(&Value::Null));
    }

    #[test]
    fn email_is_validated_and_lowercased() {
        let patch = prepare_patch(&json!({"email": " Ann@Example.ORG "})).unwrap();
        assert_eq!(patch.get("email"), Some(&json!("ann@example.org")));
        let err = prepare_patch(&json!({"email": "not-an-email"})).unwrap_err();
        assert!(err.to_json()["field_errors"]["email"].is_string());
    }

    #[test]
    fn normalized_phone_is_not_client_editable() {
        let err = prepare_patch(&json!({"phone_normalized": "1"})).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn contact_keeps_phone_as_entered() {
        let contact = ContactInput {
            first_name: Some("  Ann "),
            last_name: Some(""),
            email: Some(" Ann@Example.ORG"),
            phone: Some(" (707) 555-0100 "),
        };
        let cols = contact.columns();
        assert_eq!(cols.first_name.as_deref(), Some("Ann"));
        assert_eq!(cols.last_name, None);
        assert_eq!(cols.email.as_deref(), Some("ann@example.org"));
        assert_eq!(cols.phone.as_deref(), Some("(707) 555-0100"));
        assert_eq!(cols.phone_normalized.as_deref(), Some("7075550100"));

        let no_digits = ContactInput { phone: Some("n/a"), ..Default::default() }.columns();
        assert_eq!(no_digits.phone.as_deref(), Some("n/a"));
        assert_eq!(no_digits.phone_normalized, None);
    }

    #[test]
    fn list_hides_merged_by_default() {
        let sql = list_query(&PersonFilter::default()).unwrap().to_sql();
        assert!(sql.contains("p.merged_into_person_id IS NULL"));
        let filter = PersonFilter { include_merged: Some(true), ..Default::default() };
        assert!(!list_query(&filter).unwrap().to_sql().contains("merged_into_person_id IS NULL"));
    }
}
