//! Airtable trapping-request CSV import.
//!
//! Rows upsert addresses, places, people and requests by natural key and
//! journal `Case Info` / `Internal Notes` as request notes.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use csv::StringRecord;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::normalize::{self, first_number, normalize_phone, normalize_text, parse_float, HeaderMap};
use super::{read_csv, IngestError};
use crate::types::{ArchiveReason, RequestPriority, RequestStatus};

pub const SOURCE_SYSTEM: &str = "airtable_trapping_requests";

const CASE_NUMBER: &[&str] = &["Case Number", "case_number", "Case #", "CaseNumber"];
const RECORD_ID: &[&str] = &["Record ID", "record_id", "Airtable Record ID", "source_record_id"];
const MERGE_TARGET: &[&str] = &[
    "LookupRecordIDPrimaryReq",
    "Lookup Record ID Primary Req",
    "Primary Request Record ID",
    "MergedIntoRecordID",
];

/// Airtable `Case Status` text to a request status
pub fn coerce_request_status(raw: &str) -> Option<RequestStatus> {
    let s = normalize::norm_ws(&raw.to_lowercase());
    if s.is_empty() {
        return None;
    }
    let mapped = match s.as_str() {
        "new" | "requested" => Some(RequestStatus::New),
        "needs attention" | "need to re-book" | "need to re book" => Some(RequestStatus::NeedsReview),
        "in progress" | "partially complete" => Some(RequestStatus::InProgress),
        "revisit" => Some(RequestStatus::Active),
        "complete/closed" | "complete / closed" | "complete" | "closed" => Some(RequestStatus::Closed),
        "hold" => Some(RequestStatus::Paused),
        "referred elsewhere" => Some(RequestStatus::Resolved),
        "duplicate request" | "duplicate" | "denied" => Some(RequestStatus::Closed),
        _ => None,
    };
    mapped.or_else(|| {
        let snake: String = s
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        snake.parse().ok()
    })
}

/// Digits win (`2 - Medium` is 2), otherwise the word scale
pub fn coerce_priority(raw: &str) -> Option<i32> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(n) = first_number(s) {
        return Some(n);
    }
    match normalize::norm_ws(&s.to_lowercase()).as_str() {
        "low" => Some(1),
        "medium" | "med" => Some(2),
        "high" => Some(3),
        "urgent" => Some(4),
        "critical" => Some(5),
        _ => None,
    }
}

pub fn coerce_archive_reason(raw: &str) -> Option<ArchiveReason> {
    match normalize::norm_ws(&raw.to_lowercase()).as_str() {
        "duplicate request" | "duplicate" | "dup" => Some(ArchiveReason::Duplicate),
        "denied" => Some(ArchiveReason::Denied),
        "referred elsewhere" | "referred" | "refer elsewhere" => Some(ArchiveReason::ReferredElsewhere),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows_read: usize,
    pub addresses_inserted: usize,
    pub places_inserted: usize,
    pub people_inserted: usize,
    pub requests_inserted: usize,
    pub requests_updated: usize,
    pub request_parties_inserted: usize,
    pub notes_inserted: usize,
    pub notes_updated: usize,
    pub skipped_blank_rows: usize,
    pub skipped_missing_case_number: usize,
    pub skipped_dupe_case_in_file: usize,
    pub merged_links_set: usize,
    pub merged_case_resolved: usize,
    pub merged_case_unresolved: usize,
    pub unmapped_statuses: usize,
    pub ignored_priorities: usize,
    pub dry_run: bool,
}

/// One importable row after coercion, before merge-target resolution
#[derive(Debug, Clone, PartialEq)]
pub struct TrappingRow {
    pub case_number: String,
    pub source_record_id: Option<String>,
    pub raw_address: String,
    pub place_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub raw_status: String,
    pub status: Option<RequestStatus>,
    pub archive_reason: Option<ArchiveReason>,
    pub merged_into_source_record_id: Option<String>,
    pub merged_into_case_number: Option<String>,
    pub priority: Option<i32>,
    pub priority_label: Option<String>,
    pub notes: Option<String>,
    pub case_info: Option<String>,
    pub internal_notes: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

impl TrappingRow {
    pub fn parse(headers: &HeaderMap, record: &StringRecord, case_number: String) -> Self {
        let get = |keys: &[&str]| headers.get_field(record, keys);

        let raw_status = get(&["Case Status", "Status", "status"]);
        let raw_priority = get(&["Priority (Final Shown)", "Priority", "priority", "Intake Priority"]);

        Self {
            case_number,
            source_record_id: non_empty(get(RECORD_ID)),
            raw_address: get(&["Address", "Primary Address", "address", "primary_address"]),
            place_name: get(&["Request Place Name", "Place Name", "place_name", "Location Name", "Colony Name"]),
            first_name: get(&["First Name", "first_name"]),
            last_name: get(&["Last Name", "last_name"]),
            email: get(&["Clean Email", "Email", "email", "Client Email (LK)"]),
            phone: get(&["Clean Phone", "Client Phone (LK)", "Business Phone", "Phone", "phone"]),
            status: coerce_request_status(&raw_status),
            archive_reason: coerce_archive_reason(&raw_status),
            raw_status,
            merged_into_source_record_id: non_empty(get(MERGE_TARGET)),
            merged_into_case_number: None,
            priority: coerce_priority(&raw_priority),
            priority_label: non_empty(raw_priority),
            notes: non_empty(get(&["Internal Notes", "Notes", "notes", "internal_notes"])),
            case_info: non_empty(get(&["Case Info"])),
            internal_notes: non_empty(get(&["Internal Notes"])),
            latitude: parse_float(&get(&["Latitude", "lat", "latitude"])),
            longitude: parse_float(&get(&["Longitude", "lng", "longitude"])),
        }
    }

    /// A merge target makes the row a closed duplicate regardless of its status text
    pub fn apply_merge_rule(&mut self) {
        if self.merged_into_source_record_id.is_some() {
            self.archive_reason = Some(ArchiveReason::Duplicate);
            self.status = Some(RequestStatus::Closed);
        }
        if self.status.is_none() {
            self.status = self.archive_reason.map(|r| r.closing_status());
        }
    }

    /// Priority the schema accepts (1..=5); other numbers are dropped
    pub fn valid_priority(&self) -> Option<i32> {
        self.priority.and_then(RequestPriority::new).map(|p| p.value())
    }
}

/// Record ID to Case Number across the whole file
pub fn record_id_map(headers: &HeaderMap, records: &[StringRecord]) -> HashMap<String, String> {
    records
        .iter()
        .filter_map(|r| {
            let rid = headers.get_field(r, RECORD_ID);
            let case = headers.get_field(r, CASE_NUMBER);
            (!rid.is_empty() && !case.is_empty()).then_some((rid, case))
        })
        .collect()
}

/// Skip blank, case-less and repeated-case rows, counting each
pub fn plan_rows(headers: &HeaderMap, records: &[StringRecord], summary: &mut ImportSummary) -> Vec<TrappingRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for record in records {
        summary.rows_read += 1;
        if normalize::is_blank_row(record) {
            summary.skipped_blank_rows += 1;
            continue;
        }
        let case_number = headers.get_field(record, CASE_NUMBER);
        if case_number.is_empty() {
            summary.skipped_missing_case_number += 1;
            continue;
        }
        if !seen.insert(case_number.clone()) {
            summary.skipped_dupe_case_in_file += 1;
            continue;
        }
        let mut row = TrappingRow::parse(headers, record, case_number);
        row.apply_merge_rule();
        if !row.raw_status.is_empty() && row.status.is_none() {
            summary.unmapped_statuses += 1;
            tracing::warn!(case = %row.case_number, raw = %row.raw_status, "Unmapped status; leaving empty");
        }
        if row.priority_label.is_some() && row.valid_priority().is_none() {
            summary.ignored_priorities += 1;
            tracing::warn!(case = %row.case_number, raw = ?row.priority_label, "Ignoring priority");
        }
        rows.push(row);
    }
    rows
}

/// Import the CSV in one transaction. `dry_run` rolls it back at the end.
pub async fn import_trapping_requests(pool: &PgPool, path: &Path, dry_run: bool) -> Result<ImportSummary, IngestError> {
    let (headers, records) = read_csv(path)?;
    let rid_to_case = record_id_map(&headers, &records);
    tracing::info!("Pre-scan found {} record id mappings", rid_to_case.len());

    let mut summary = ImportSummary { dry_run, ..Default::default() };
    let rows = plan_rows(&headers, &records, &mut summary);

    let mut tx = pool.begin().await?;
    for mut row in rows {
        if let Some(target) = row.merged_into_source_record_id.clone() {
            summary.merged_links_set += 1;
            let resolved = match rid_to_case.get(&target) {
                Some(case) => Some(case.clone()),
                None => lookup_case_number(&mut tx, &target).await?,
            };
            match resolved {
                Some(case) => {
                    summary.merged_case_resolved += 1;
                    row.merged_into_case_number = Some(case);
                }
                None => {
                    summary.merged_case_unresolved += 1;
                    tracing::warn!(case = %row.case_number, %target, "Merge target not found in file or database");
                }
            }
        }
        import_row(&mut tx, &row, &mut summary).await?;
    }

    if dry_run {
        tx.rollback().await?;
        tracing::info!("Dry run: rolled back trapping-request import");
    } else {
        tx.commit().await?;
    }
    Ok(summary)
}

async fn lookup_case_number(conn: &mut PgConnection, source_record_id: &str) -> Result<Option<String>, IngestError> {
    Ok(
        sqlx::query_scalar("SELECT case_number FROM ops.requests WHERE source_record_id = $1 LIMIT 1")
            .bind(source_record_id)
            .fetch_optional(conn)
            .await?,
    )
}

async fn import_row(conn: &mut PgConnection, row: &TrappingRow, summary: &mut ImportSummary) -> Result<(), IngestError> {
    let address_id = if row.raw_address.is_empty() {
        None
    } else {
        let (id, inserted) = upsert_address(conn, &row.raw_address, row.latitude, row.longitude).await?;
        summary.addresses_inserted += usize::from(inserted);
        Some(id)
    };

    let place_id = match normalize::place_key(&row.place_name, &row.raw_address) {
        Some(key) => {
            let display = if row.place_name.is_empty() { &row.raw_address } else { &row.place_name };
            let (id, inserted) = upsert_place(conn, &key, display, address_id).await?;
            summary.places_inserted += usize::from(inserted);
            Some(id)
        }
        None => None,
    };

    let person_id = match normalize::person_key(&row.first_name, &row.last_name, &row.email, &row.phone) {
        Some(key) => {
            let (id, inserted) = upsert_person(conn, &key, row).await?;
            summary.people_inserted += usize::from(inserted);
            Some(id)
        }
        None => None,
    };

    let (request_id, inserted) = upsert_request(conn, row, place_id, person_id).await?;
    if inserted {
        summary.requests_inserted += 1;
    } else {
        summary.requests_updated += 1;
    }

    if let Some(person_id) = person_id {
        let added = sqlx::query(
            "INSERT INTO ops.request_parties (request_id, person_id, role) VALUES ($1, $2, 'reporter') \
             ON CONFLICT DO NOTHING",
        )
        .bind(request_id)
        .bind(person_id)
        .execute(&mut *conn)
        .await?;
        summary.request_parties_inserted += added.rows_affected() as usize;
    }

    for (kind, body) in [("case_info", &row.case_info), ("internal", &row.internal_notes)] {
        let Some(body) = body.as_deref().map(str::trim).filter(|b| !b.is_empty()) else {
            continue;
        };
        let note_key = format!("{}::{}::{}", SOURCE_SYSTEM, row.case_number, kind);
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO ops.request_notes (request_id, note_kind, note_body, note_key, source_system) \
             VALUES ($1, $2, $3, $4, 'airtable') \
             ON CONFLICT (note_key) WHERE note_key IS NOT NULL \
             DO UPDATE SET note_body = EXCLUDED.note_body, updated_at = now() \
             RETURNING (xmax = 0)",
        )
        .bind(request_id)
        .bind(kind)
        .bind(body)
        .bind(&note_key)
        .fetch_one(&mut *conn)
        .await?;
        if inserted {
            summary.notes_inserted += 1;
        } else {
            summary.notes_updated += 1;
        }
    }
    Ok(())
}

async fn upsert_address(
    conn: &mut PgConnection,
    raw: &str,
    lat: Option<f64>,
    lng: Option<f64>,
) -> Result<(Uuid, bool), IngestError> {
    Ok(sqlx::query_as(
        "INSERT INTO sot.addresses (address_key, raw_address, latitude, longitude) VALUES ($1, $2, $3, $4) \
         ON CONFLICT (address_key) DO UPDATE SET \
           raw_address = EXCLUDED.raw_address, \
           latitude = coalesce(EXCLUDED.latitude, sot.addresses.latitude), \
           longitude = coalesce(EXCLUDED.longitude, sot.addresses.longitude) \
         RETURNING id, (xmax = 0)",
    )
    .bind(normalize::address_key(raw))
    .bind(raw)
    .bind(lat)
    .bind(lng)
    .fetch_one(conn)
    .await?)
}

async fn upsert_place(
    conn: &mut PgConnection,
    place_key: &str,
    display_name: &str,
    address_id: Option<Uuid>,
) -> Result<(Uuid, bool), IngestError> {
    Ok(sqlx::query_as(
        "INSERT INTO sot.places (place_key, display_name, address_id) VALUES ($1, $2, $3) \
         ON CONFLICT (place_key) DO UPDATE SET \
           display_name = coalesce(sot.places.display_name, EXCLUDED.display_name), \
           address_id = coalesce(EXCLUDED.address_id, sot.places.address_id) \
         RETURNING id, (xmax = 0)",
    )
    .bind(place_key)
    .bind(display_name)
    .bind(address_id)
    .fetch_one(conn)
    .await?)
}

async fn upsert_person(conn: &mut PgConnection, person_key: &str, row: &TrappingRow) -> Result<(Uuid, bool), IngestError> {
    let email = row.email.trim().to_lowercase();
    let phone_normalized = normalize_phone(&row.phone);
    Ok(sqlx::query_as(
        "INSERT INTO sot.people (person_key, first_name, last_name, email, phone, phone_normalized) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (person_key) DO UPDATE SET \
           first_name = coalesce(EXCLUDED.first_name, sot.people.first_name), \
           last_name = coalesce(EXCLUDED.last_name, sot.people.last_name), \
           email = coalesce(EXCLUDED.email, sot.people.email), \
           phone = coalesce(EXCLUDED.phone, sot.people.phone), \
           phone_normalized = coalesce(EXCLUDED.phone_normalized, sot.people.phone_normalized) \
         RETURNING id, (xmax = 0)",
    )
    .bind(person_key)
    .bind(non_empty(row.first_name.clone()))
    .bind(non_empty(row.last_name.clone()))
    .bind(non_empty(email))
    .bind(non_empty(row.phone.trim().to_string()))
    .bind(non_empty(phone_normalized))
    .fetch_one(conn)
    .await?)
}

async fn upsert_request(
    conn: &mut PgConnection,
    row: &TrappingRow,
    place_id: Option<Uuid>,
    person_id: Option<Uuid>,
) -> Result<(Uuid, bool), IngestError> {
    let status = row.status.map(|s| s.as_str());
    let archive_reason = row.archive_reason.map(|r| r.as_str());
    Ok(sqlx::query_as(
        "INSERT INTO ops.requests \
           (case_number, source_record_id, primary_place_id, primary_contact_person_id, status, priority, \
            priority_label, notes, archive_reason, archived_at, merged_into_case_number, \
            merged_into_source_record_id, resolved_at) \
         VALUES ($1, $2, $3, $4, coalesce($5::text, 'new'), $6, $7, $8, $9, \
                 CASE WHEN $9::text IS NOT NULL THEN now() END, $10, $11, \
                 CASE WHEN $5::text IN ('resolved', 'closed') THEN now() END) \
         ON CONFLICT (case_number) DO UPDATE SET \
           source_record_id = coalesce(EXCLUDED.source_record_id, ops.requests.source_record_id), \
           primary_place_id = coalesce(EXCLUDED.primary_place_id, ops.requests.primary_place_id), \
           primary_contact_person_id = coalesce(EXCLUDED.primary_contact_person_id, ops.requests.primary_contact_person_id), \
           status = coalesce($5::text, ops.requests.status), \
           priority = coalesce(EXCLUDED.priority, ops.requests.priority), \
           priority_label = coalesce(EXCLUDED.priority_label, ops.requests.priority_label), \
           notes = coalesce(EXCLUDED.notes, ops.requests.notes), \
           archive_reason = coalesce(EXCLUDED.archive_reason, ops.requests.archive_reason), \
           archived_at = coalesce(ops.requests.archived_at, EXCLUDED.archived_at), \
           merged_into_case_number = coalesce(EXCLUDED.merged_into_case_number, ops.requests.merged_into_case_number), \
           merged_into_source_record_id = coalesce(EXCLUDED.merged_into_source_record_id, ops.requests.merged_into_source_record_id), \
           resolved_at = CASE WHEN coalesce($5::text, ops.requests.status) IN ('resolved', 'closed') \
                              THEN coalesce(ops.requests.resolved_at, now()) END, \
           updated_at = now() \
         RETURNING id, (xmax = 0)",
    )
    .bind(&row.case_number)
    .bind(row.source_record_id.as_deref())
    .bind(place_id)
    .bind(person_id)
    .bind(status)
    .bind(row.valid_priority())
    .bind(row.priority_label.as_deref())
    .bind(row.notes.as_deref())
    .bind(archive_reason)
    .bind(row.merged_into_case_number.as_deref())
    .bind(row.merged_into_source_record_id.as_deref())
    .fetch_one(conn)
    .await?)
}
