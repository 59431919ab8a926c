//! Public intake submissions and their conversion into requests.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::intake::INTAKE_COLUMNS;
use crate::database::models::{IntakeSubmission, Request};
use crate::database::{with_transaction, DatabaseError, ListQuery, Paged, SqlParam};
use crate::error::{ApiError, FieldErrors};
use crate::services::audit::{self, EditContext, FieldChange};
use crate::services::colony::{self, NewObservation};
use crate::services::email::is_valid_email;
use crate::services::patch::{self, FieldKind, FieldSpec, PatchOutcome, PatchTarget};
use crate::services::people::{self, ContactInput};
use crate::services::places;
use crate::services::requests::{self, NewRequest};
use crate::types::{EntityType, IntakeStatus, ObservationSource, RequestStatus};

pub const MAX_CAT_COUNT: i32 = 500;

static INTAKE_SELECT: Lazy<String> =
    Lazy::new(|| format!("SELECT {} FROM ops.intake_submissions i", INTAKE_COLUMNS));

pub static INTAKE_PATCH: PatchTarget = PatchTarget {
    entity: EntityType::IntakeSubmission,
    table: "ops.intake_submissions",
    fields: &[
        FieldSpec::required("status", FieldKind::Enum(IntakeStatus::ALL)),
        FieldSpec::new("triage_notes", FieldKind::Text),
    ],
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIntake {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cats_address: Option<String>,
    pub cat_count_estimate: Option<i32>,
    pub has_kittens: Option<bool>,
    pub is_feeding: Option<bool>,
    pub situation: Option<String>,
}

fn trimmed(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl NewIntake {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        let email = trimmed(&self.email);
        if email.is_none() && trimmed(&self.phone).is_none() {
            errors.insert("contact".into(), "email or phone is required".into());
        }
        if matches!(email, Some(e) if !is_valid_email(e)) {
            errors.insert("email".into(), "must be a valid email address".into());
        }
        if trimmed(&self.cats_address).is_none() {
            errors.insert("cats_address".into(), "is required".into());
        }
        if matches!(self.cat_count_estimate, Some(n) if !(0..=MAX_CAT_COUNT).contains(&n)) {
            errors.insert("cat_count_estimate".into(), format!("must be between 0 and {}", MAX_CAT_COUNT));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub async fn submit_intake(pool: &PgPool, input: &NewIntake) -> Result<Uuid, ApiError> {
    input
        .validate()
        .map_err(|errors| ApiError::unprocessable("Invalid intake submission", errors))?;

    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO ops.intake_submissions \
           (first_name, last_name, email, phone, cats_address, cat_count_estimate, has_kittens, is_feeding, situation) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id",
    )
    .bind(trimmed(&input.first_name))
    .bind(trimmed(&input.last_name))
    .bind(trimmed(&input.email).map(str::to_lowercase))
    .bind(trimmed(&input.phone))
    .bind(trimmed(&input.cats_address))
    .bind(input.cat_count_estimate)
    .bind(input.has_kittens)
    .bind(input.is_feeding)
    .bind(trimmed(&input.situation))
    .fetch_one(pool)
    .await
    .map_err(DatabaseError::from)?;
    tracing::info!(intake_id = %id, "Intake submission received");
    Ok(id)
}

#[derive(Debug, Default, Deserialize)]
pub struct IntakeFilter {
    /// One status, a comma-separated list, or `all`; defaults to the open queue
    pub status: Option<String>,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn list_query(filter: &IntakeFilter) -> Result<ListQuery, ApiError> {
    let mut q = ListQuery::new(INTAKE_SELECT.as_str());
    match filter.status.as_deref().map(str::trim) {
        Some("all") => {}
        Some(raw) if !raw.is_empty() => {
            let statuses = raw
                .split(',')
                .map(|s| s.parse::<IntakeStatus>().map(|s| s.as_str().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            q.where_any("i.status", statuses);
        }
        _ => {
            q.where_any("i.status", IntakeStatus::OPEN.iter().map(|s| s.as_str().to_string()).collect());
        }
    }
    q.search(&["i.first_name", "i.last_name", "i.email", "i.phone", "i.cats_address"], filter.q.as_deref())
        .order_by("i.submitted_at DESC")
        .paginate(filter.limit, filter.offset)?;
    Ok(q)
}

pub async fn list_intake(pool: &PgPool, filter: &IntakeFilter) -> Result<Paged<IntakeSubmission>, ApiError> {
    Ok(list_query(filter)?.fetch_page(pool).await?)
}

pub async fn get_intake(pool: &PgPool, id: Uuid) -> Result<IntakeSubmission, ApiError> {
    let sql = format!("{} WHERE i.id = $1", INTAKE_SELECT.as_str());
    sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(DatabaseError::from)?
        .ok_or_else(|| ApiError::not_found(format!("intake submission {} not found", id)))
}

/// Triage edits. `converted` is reserved for the convert operation.
pub fn prepare_patch(body: &Value) -> Result<patch::Patch, ApiError> {
    let patch = patch::parse_patch(&INTAKE_PATCH, body, &["reason"])?;
    if patch.get("status").and_then(Value::as_str) == Some(IntakeStatus::Converted.as_str()) {
        return Err(ApiError::invalid_field("status", "use the convert action to convert a submission"));
    }
    Ok(patch)
}

pub async fn patch_intake(pool: &PgPool, id: Uuid, body: &Value, editor: Uuid) -> Result<PatchOutcome, ApiError> {
    let patch = prepare_patch(body)?;
    let reason = patch::reason_of(body);
    let ctx = EditContext::api(editor).with_reason(reason.as_deref());
    patch::patch_entity(pool, &INTAKE_PATCH, id, patch, ctx).await
}

#[derive(Debug, Serialize)]
pub struct ConvertOutcome {
    pub intake_id: Uuid,
    pub person_id: Option<Uuid>,
    pub place_id: Uuid,
    pub request: Request,
    pub observation_id: Option<Uuid>,
}

/// Request notes assembled from the submission
pub fn conversion_notes(intake: &IntakeSubmission) -> Option<String> {
    let mut lines = vec![];
    if let Some(situation) = intake.situation.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(situation.trim().to_string());
    }
    if let Some(kittens) = intake.has_kittens {
        lines.push(format!("Kittens present: {}", if kittens { "yes" } else { "no" }));
    }
    if let Some(feeding) = intake.is_feeding {
        lines.push(format!("Caller is feeding: {}", if feeding { "yes" } else { "no" }));
    }
    if let Some(triage) = intake.triage_notes.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(format!("Triage: {}", triage.trim()));
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Person, place, request and optional colony observation in one transaction
pub async fn convert_intake(pool: &PgPool, id: Uuid, editor: Uuid) -> Result<ConvertOutcome, ApiError> {
    with_transaction(pool, move |tx| {
        Box::pin(async move {
            let sql = format!("{} WHERE i.id = $1 FOR UPDATE", INTAKE_SELECT.as_str());
            let intake: IntakeSubmission = sqlx::query_as(&sql)
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(DatabaseError::from)?
                .ok_or_else(|| ApiError::not_found(format!("intake submission {} not found", id)))?;
            if intake.status == IntakeStatus::Converted.as_str() {
                return Err(ApiError::conflict(format!(
                    "Intake submission already converted to request {}",
                    intake.converted_request_id.map(|r| r.to_string()).unwrap_or_default()
                )));
            }

            let contact = ContactInput {
                first_name: intake.first_name.as_deref(),
                last_name: intake.last_name.as_deref(),
                email: intake.email.as_deref(),
                phone: intake.phone.as_deref(),
            };
            let person_id = people::upsert_contact(tx, &contact).await?;
            let place_id = places::upsert_address_place(tx, &intake.cats_address, None).await?;

            let input = NewRequest {
                primary_contact_person_id: person_id,
                summary: Some(format!("Intake: {}", intake.cats_address.trim())),
                notes: conversion_notes(&intake),
                estimated_cat_count: intake.cat_count_estimate,
                ..Default::default()
            };
            let request = requests::insert_request(tx, &input, RequestStatus::New, Some(place_id)).await?;

            if let Some(person_id) = person_id {
                sqlx::query(
                    "INSERT INTO ops.request_parties (request_id, person_id, role) VALUES ($1, $2, 'reporter') \
                     ON CONFLICT DO NOTHING",
                )
                .bind(request.id)
                .bind(person_id)
                .execute(&mut **tx)
                .await
                .map_err(DatabaseError::from)?;
            }

            let observation_id = match intake.cat_count_estimate {
                Some(count) => {
                    let observation = NewObservation {
                        source_type: ObservationSource::IntakeForm,
                        observed_on: Some(intake.submitted_at.date_naive()),
                        total_cats: Some(count),
                        altered_count: None,
                        eartipped_seen: None,
                        notes: Some(format!("From intake submission {}", intake.id)),
                    };
                    Some(colony::insert_observation(tx, place_id, &observation, Some(editor)).await?.id)
                }
                None => None,
            };

            sqlx::query(
                "UPDATE ops.intake_submissions SET status = 'converted', converted_request_id = $2, updated_at = now() \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(request.id)
            .execute(&mut **tx)
            .await
            .map_err(DatabaseError::from)?;

            let changes = [
                FieldChange { field: "status".into(), old: json!(intake.status), new: json!("converted") },
                FieldChange { field: "converted_request_id".into(), old: Value::Null, new: json!(request.id) },
            ];
            audit::record_edits(&mut **tx, EntityType::IntakeSubmission, id, &changes, EditContext::api(editor)).await?;

            tracing::info!(intake_id = %id, case_number = %request.case_number, "Converted intake submission");
            Ok(ConvertOutcome { intake_id: id, person_id, place_id, request, observation_id })
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> NewIntake {
        NewIntake {
            email: Some("caller@example.org".into()),
            cats_address: Some("12 Oak Ave".into()),
            cat_count_estimate: Some(6),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_minimal_submission() {
        assert!(valid().validate().is_ok());
        let phone_only = NewIntake { email: None, phone: Some("707 555 0100".into()), ..valid() };
        assert!(phone_only.validate().is_ok());
    }

    #[test]
    fn requires_contact_and_address() {
        let errors = NewIntake { email: Some("  ".into()), cats_address: None, ..valid() }.validate().unwrap_err();
        assert!(errors.contains_key("contact"));
        assert!(errors.contains_key("cats_address"));
    }

    #[test]
    fn checks_email_and_count() {
        let errors = NewIntake { email: Some("nope".into()), cat_count_estimate: Some(501), ..valid() }
            .validate()
            .unwrap_err();
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("cat_count_estimate"));
        assert!(NewIntake { cat_count_estimate: Some(-1), ..valid() }.validate().is_err());
        assert!(NewIntake { cat_count_estimate: Some(500), ..valid() }.validate().is_ok());
    }

    #[test]
    fn default_queue_is_open_statuses() {
        let q = list_query(&IntakeFilter::default()).unwrap();
        assert_eq!(
            q.params()[0],
            SqlParam::TextArray(vec!["new".into(), "in_review".into(), "contacted".into()])
        );
        let all = list_query(&IntakeFilter { status: Some("all".into()), ..Default::default() }).unwrap();
        assert!(all.params().is_empty());
    }

    #[test]
    fn converted_is_not_a_triage_status() {
        let err = prepare_patch(&json!({"status": "converted"})).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert!(prepare_patch(&json!({"status": "contacted", "triage_notes": "left voicemail"})).is_ok());
    }
}
