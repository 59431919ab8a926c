//! Trapping requests: listing, creation, audited edits with status
//! transitions, journal notes and archiving.

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::models::person::PERSON_COLUMNS;
use crate::database::models::request::REQUEST_COLUMNS;
use crate::database::models::{Person, Place, Request, RequestNote, RequestParty};
use crate::database::{with_transaction, DatabaseError, ListQuery, Paged, SqlParam};
use crate::error::{ApiError, FieldErrors};
use crate::services::audit::EditContext;
use crate::services::patch::{self, FieldKind, FieldSpec, Patch, PatchOutcome, PatchTarget};
use crate::services::places;
use crate::types::{allowed_transitions, can_transition, ArchiveReason, EntityType, NoteKind, RequestPriority, RequestStatus};

static REQUEST_SELECT: Lazy<String> = Lazy::new(|| format!("SELECT {} FROM ops.requests r", REQUEST_COLUMNS));

pub static REQUEST_PATCH: PatchTarget = PatchTarget {
    entity: EntityType::Request,
    table: "ops.requests",
    fields: &[
        FieldSpec::required("status", FieldKind::Enum(RequestStatus::ALL)),
        FieldSpec::new("priority", FieldKind::Int { min: RequestPriority::MIN as i64, max: RequestPriority::MAX as i64 }),
        FieldSpec::new("priority_label", FieldKind::Text),
        FieldSpec::new("summary", FieldKind::Text),
        FieldSpec::new("notes", FieldKind::Text),
        FieldSpec::new("estimated_cat_count", FieldKind::Int { min: 0, max: 10_000 }),
        FieldSpec::new("primary_place_id", FieldKind::Uuid),
        FieldSpec::new("primary_contact_person_id", FieldKind::Uuid),
    ],
};

static ARCHIVE_REASON: FieldSpec = FieldSpec::new("archive_reason", FieldKind::Enum(ArchiveReason::ALL));

const SET_RESOLVED: &str = "resolved_at = now()";
const CLEAR_RESOLVED: &str = "resolved_at = NULL";

#[derive(Debug, Default, Deserialize)]
pub struct RequestFilter {
    pub q: Option<String>,
    /// One status or a comma-separated list
    pub status: Option<String>,
    pub priority: Option<i32>,
    pub place_id: Option<Uuid>,
    pub include_archived: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn list_query(filter: &RequestFilter) -> Result<ListQuery, ApiError> {
    let mut q = ListQuery::new(REQUEST_SELECT.as_str());
    if !filter.include_archived.unwrap_or(false) {
        q.where_static("r.archived_at IS NULL");
    }
    if let Some(raw) = filter.status.as_deref().filter(|s| !s.trim().is_empty()) {
        let statuses = raw
            .split(',')
            .map(|s| s.parse::<RequestStatus>().map(|s| s.as_str().to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        q.where_any("r.status", statuses);
    }
    if let Some(priority) = filter.priority {
        let priority = RequestPriority::new(priority)
            .ok_or_else(|| ApiError::invalid_field("priority", "must be between 1 and 5"))?;
        q.where_eq("r.priority", SqlParam::Int(priority.value() as i64));
    }
    if let Some(place_id) = filter.place_id {
        q.where_eq("r.primary_place_id", SqlParam::Uuid(place_id));
    }
    q.search(&["r.case_number", "r.summary", "r.notes"], filter.q.as_deref())
        .order_by("r.priority DESC NULLS LAST, r.created_at DESC")
        .paginate(filter.limit, filter.offset)?;
    Ok(q)
}

pub async fn list_requests(pool: &PgPool, filter: &RequestFilter) -> Result<Paged<Request>, ApiError> {
    Ok(list_query(filter)?.fetch_page(pool).await?)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRequest {
    pub case_number: Option<String>,
    pub primary_place_id: Option<Uuid>,
    pub address: Option<String>,
    pub primary_contact_person_id: Option<Uuid>,
    pub status: Option<String>,
    pub priority: Option<i32>,
    pub summary: Option<String>,
    pub notes: Option<String>,
    pub estimated_cat_count: Option<i32>,
}

fn has_text(s: &Option<String>) -> bool {
    s.as_deref().map_or(false, |s| !s.trim().is_empty())
}

impl NewRequest {
    /// Checked status, or the field errors
    pub fn validate(&self) -> Result<RequestStatus, FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.primary_place_id.is_none() && !has_text(&self.address) {
            errors.insert("primary_place_id".into(), "primary_place_id or address is required".into());
        }
        if matches!(&self.case_number, Some(c) if c.trim().is_empty()) {
            errors.insert("case_number".into(), "may not be blank".into());
        }
        if matches!(self.priority, Some(p) if RequestPriority::new(p).is_none()) {
            errors.insert("priority".into(), "must be between 1 and 5".into());
        }
        if matches!(self.estimated_cat_count, Some(n) if n < 0) {
            errors.insert("estimated_cat_count".into(), "must be 0 or greater".into());
        }
        let status = match self.status.as_deref() {
            None => RequestStatus::New,
            Some(s) => match s.parse::<RequestStatus>() {
                Ok(status) => status,
                Err(e) => {
                    errors.insert("status".into(), e.to_string());
                    RequestStatus::New
                }
            },
        };
        if errors.is_empty() {
            Ok(status)
        } else {
            Err(errors)
        }
    }
}

pub fn format_case_number(year: i32, seq: i64) -> String {
    format!("REQ-{}-{:05}", year, seq)
}

/// Insert a request row on an open connection. Terminal statuses start resolved.
pub async fn insert_request(
    conn: &mut PgConnection,
    input: &NewRequest,
    status: RequestStatus,
    place_id: Option<Uuid>,
) -> Result<Request, DatabaseError> {
    let case_number = match input.case_number.as_deref().map(str::trim) {
        Some(case) => case.to_string(),
        None => {
            let seq: i64 = sqlx::query_scalar("SELECT nextval('ops.request_case_seq')")
                .fetch_one(&mut *conn)
                .await?;
            format_case_number(Utc::now().year(), seq)
        }
    };
    let priority_label = input.priority.and_then(RequestPriority::new).map(|p| p.label());

    let sql = format!(
        "INSERT INTO ops.requests AS r \
           (case_number, primary_place_id, primary_contact_person_id, status, priority, priority_label, \
            summary, notes, estimated_cat_count, resolved_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, CASE WHEN $10 THEN now() END) \
         RETURNING {}",
        REQUEST_COLUMNS
    );
    let request: Request = sqlx::query_as(&sql)
        .bind(&case_number)
        .bind(place_id)
        .bind(input.primary_contact_person_id)
        .bind(status.as_str())
        .bind(input.priority)
        .bind(priority_label)
        .bind(input.summary.as_deref().map(str::trim))
        .bind(input.notes.as_deref().map(str::trim))
        .bind(input.estimated_cat_count)
        .bind(status.is_terminal())
        .fetch_one(&mut *conn)
        .await?;
    Ok(request)
}

pub async fn create_request(pool: &PgPool, input: NewRequest, editor: Uuid) -> Result<Request, ApiError> {
    let status = input
        .validate()
        .map_err(|errors| ApiError::unprocessable("Invalid request", errors))?;

    let request = with_transaction(pool, move |tx| {
        Box::pin(async move {
            let place_id = match (input.primary_place_id, input.address.as_deref()) {
                (Some(id), _) => Some(id),
                (None, Some(address)) => Some(places::upsert_address_place(tx, address, None).await?),
                (None, None) => None,
            };
            insert_request(tx, &input, status, place_id).await
        })
    })
    .await?;
    tracing::info!(case_number = %request.case_number, created_by = %editor, "Created request");
    Ok(request)
}

#[derive(Debug, Serialize)]
pub struct RequestDetail {
    #[serde(flatten)]
    pub request: Request,
    pub place: Option<Place>,
    pub primary_contact: Option<Person>,
    pub parties: Vec<RequestParty>,
    pub notes: Vec<RequestNote>,
}

pub async fn find_request(pool: &PgPool, id: Uuid) -> Result<Option<Request>, DatabaseError> {
    let sql = format!("{} WHERE r.id = $1", REQUEST_SELECT.as_str());
    Ok(sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?)
}

pub async fn get_request(pool: &PgPool, id: Uuid) -> Result<RequestDetail, ApiError> {
    let request = find_request(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("request {} not found", id)))?;

    let place = match request.primary_place_id {
        Some(place_id) => places::find_place(pool, place_id).await?,
        None => None,
    };
    let primary_contact = match request.primary_contact_person_id {
        Some(person_id) => {
            let sql = format!("SELECT {} FROM sot.people p WHERE p.id = $1", PERSON_COLUMNS);
            sqlx::query_as(&sql)
                .bind(person_id)
                .fetch_optional(pool)
                .await
                .map_err(DatabaseError::from)?
        }
        None => None,
    };
    let parties = sqlx::query_as(
        "SELECT rp.person_id, rp.role, p.display_name, p.email, p.phone \
         FROM ops.request_parties rp JOIN sot.people p ON p.id = rp.person_id \
         WHERE rp.request_id = $1 ORDER BY rp.created_at",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::from)?;
    let notes = sqlx::query_as(
        "SELECT id, note_kind, note_body, source_system, author_staff_id, created_at, updated_at \
         FROM ops.request_notes WHERE request_id = $1 ORDER BY created_at DESC",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::from)?;

    Ok(RequestDetail { request, place, primary_contact, parties, notes })
}

/// Extra assignment a status move needs, or 422 when the move is not allowed
pub fn status_change(from: Option<RequestStatus>, to: RequestStatus) -> Result<Option<&'static str>, ApiError> {
    let Some(from) = from else {
        return Ok(to.is_terminal().then_some(SET_RESOLVED));
    };
    if !can_transition(from, to) {
        let allowed: Vec<&str> = allowed_transitions(from).iter().map(|s| s.as_str()).collect();
        return Err(ApiError::invalid_field(
            "status",
            format!("cannot move from {} to {} (allowed: {})", from, to, allowed.join(", ")),
        ));
    }
    Ok(match (from.is_terminal(), to.is_terminal()) {
        (false, true) => Some(SET_RESOLVED),
        (true, false) => Some(CLEAR_RESOLVED),
        _ => None,
    })
}

fn current_status(record: &Value) -> Option<RequestStatus> {
    record.get("status").and_then(Value::as_str).and_then(|s| s.parse().ok())
}

/// Parse a request patch; a new priority without a label gets the standard label
pub fn prepare_patch(body: &Value) -> Result<Patch, ApiError> {
    let mut patch = patch::parse_patch(&REQUEST_PATCH, body, &["reason"])?;
    if !patch.contains("priority_label") {
        if let Some(priority) = patch.get("priority").and_then(Value::as_i64) {
            let label = RequestPriority::new(priority as i32).map(|p| p.label());
            if let (Some(label), Some(field)) = (label, REQUEST_PATCH.field("priority_label")) {
                patch.set(field, json!(label));
            }
        }
    }
    Ok(patch)
}

pub async fn patch_request(pool: &PgPool, id: Uuid, body: &Value, editor: Uuid) -> Result<PatchOutcome, ApiError> {
    let patch = prepare_patch(body)?;
    let reason = patch::reason_of(body);

    with_transaction(pool, move |tx| {
        Box::pin(async move {
            let ctx = EditContext::api(editor).with_reason(reason.as_deref());
            let before = patch::lock_row(tx, &REQUEST_PATCH, id).await?;
            let mut raw_sets = vec![];
            if let Some(to) = patch.get("status").and_then(Value::as_str) {
                let to: RequestStatus = to.parse()?;
                if let Some(set) = status_change(current_status(&before), to)? {
                    raw_sets.push(set);
                }
            }
            patch::apply_patch(tx, &REQUEST_PATCH, id, &before, &patch, &raw_sets, ctx).await
        })
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct NewNote {
    pub note_kind: NoteKind,
    pub note_body: String,
}

pub async fn add_note(pool: &PgPool, request_id: Uuid, note: &NewNote, author: Uuid) -> Result<RequestNote, ApiError> {
    let body = note.note_body.trim();
    if body.is_empty() {
        return Err(ApiError::invalid_field("note_body", "may not be blank"));
    }
    if find_request(pool, request_id).await?.is_none() {
        return Err(ApiError::not_found(format!("request {} not found", request_id)));
    }
    let row = sqlx::query_as(
        "INSERT INTO ops.request_notes (request_id, note_kind, note_body, author_staff_id) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, note_kind, note_body, source_system, author_staff_id, created_at, updated_at",
    )
    .bind(request_id)
    .bind(note.note_kind.as_str())
    .bind(body)
    .bind(author)
    .fetch_one(pool)
    .await
    .map_err(DatabaseError::from)?;
    Ok(row)
}

/// Patch that archives a request for `reason`
pub fn archive_patch(reason: ArchiveReason) -> Patch {
    let mut patch = Patch::default();
    if let Some(status) = REQUEST_PATCH.field("status") {
        patch.set(status, json!(reason.closing_status().as_str()));
    }
    patch.set(&ARCHIVE_REASON, json!(reason.as_str()));
    patch
}

/// Archive with `reason`. Repeating the same archive changes nothing.
pub async fn archive_request(
    pool: &PgPool,
    id: Uuid,
    reason: ArchiveReason,
    editor: Uuid,
    note: Option<String>,
) -> Result<PatchOutcome, ApiError> {
    let patch = archive_patch(reason);
    with_transaction(pool, move |tx| {
        Box::pin(async move {
            let ctx = EditContext::api(editor).with_reason(note.as_deref());
            let before = patch::lock_row(tx, &REQUEST_PATCH, id).await?;
            let raw_sets = ["archived_at = coalesce(archived_at, now())", "resolved_at = coalesce(resolved_at, now())"];
            patch::apply_patch(tx, &REQUEST_PATCH, id, &before, &patch, &raw_sets, ctx).await
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn case_numbers_are_zero_padded() {
        assert_eq!(format_case_number(2026, 42), "REQ-2026-00042");
        assert_eq!(format_case_number(2026, 123456), "REQ-2026-123456");
    }

    #[test]
    fn create_requires_place_or_address() {
        let errors = NewRequest::default().validate().unwrap_err();
        assert!(errors.contains_key("primary_place_id"));

        let ok = NewRequest { address: Some("1 Elm St".into()), ..Default::default() };
        assert_eq!(ok.validate().unwrap(), RequestStatus::New);
    }

    #[test]
    fn create_validates_priority_and_status() {
        let input = NewRequest {
            primary_place_id: Some(Uuid::new_v4()),
            priority: Some(9),
            status: Some("archived".into()),
            ..Default::default()
        };
        let errors = input.validate().unwrap_err();
        assert!(errors.contains_key("priority"));
        assert!(errors["status"].contains("archived"));
    }

    #[test]
    fn illegal_transition_names_allowed_targets() {
        let err = status_change(Some(RequestStatus::Closed), RequestStatus::InProgress).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.to_json()["field_errors"]["status"].as_str().unwrap().contains("allowed: active"));
    }

    #[test]
    fn resolved_at_follows_terminal_moves() {
        assert_eq!(status_change(Some(RequestStatus::Active), RequestStatus::Resolved).unwrap(), Some(SET_RESOLVED));
        assert_eq!(status_change(Some(RequestStatus::Closed), RequestStatus::Active).unwrap(), Some(CLEAR_RESOLVED));
        assert_eq!(status_change(Some(RequestStatus::Resolved), RequestStatus::Closed).unwrap(), None);
        assert_eq!(status_change(Some(RequestStatus::New), RequestStatus::Scheduled).unwrap(), None);
        assert_eq!(status_change(None, RequestStatus::Closed).unwrap(), Some(SET_RESOLVED));
    }

    #[test]
    fn priority_gets_default_label() {
        let patch = prepare_patch(&json!({"priority": 4})).unwrap();
        assert_eq!(patch.get("priority_label"), Some(&json!("urgent")));
        let patch = prepare_patch(&json!({"priority": 4, "priority_label": "4 - ASAP"})).unwrap();
        assert_eq!(patch.get("priority_label"), Some(&json!("4 - ASAP")));
    }

    #[test]
    fn archive_sets_status_by_reason() {
        let patch = archive_patch(ArchiveReason::ReferredElsewhere);
        assert_eq!(patch.get("status"), Some(&json!("resolved")));
        assert_eq!(patch.get("archive_reason"), Some(&json!("referred_elsewhere")));
        assert_eq!(archive_patch(ArchiveReason::Denied).get("status"), Some(&json!("closed")));
    }

    #[test]
    fn status_filter_accepts_lists() {
        let filter = RequestFilter { status: Some("new, active".into()), ..Default::default() };
        let q = list_query(&filter).unwrap();
        assert_eq!(q.params()[0], SqlParam::TextArray(vec!["new".into(), "active".into()]));
        let bad = RequestFilter { status: Some("new,bogus".into()), ..Default::default() };
        assert!(list_query(&bad).is_err());
    }
}
