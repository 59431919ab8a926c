//! Appointment-request CSV staging into `source.appointment_requests`.
//!
//! Rows are keyed by `source_pk`; a stored `row_hash` decides between
//! update and unchanged.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

use super::normalize::{self, normalize_phone, parse_leading_int, sha256_hex32, HeaderMap};
use super::{read_csv, source_file_name, IngestError};

const SUBMITTED: &[&str] = &["New Submitted", "New Submitted / Former Created Date", "Former Created Date", "submitted_at"];
const PHONE: &[&str] = &["Best phone number to reach you", "Phone", "phone"];
const CATS_ADDRESS: &[&str] = &["Street address where cats are located", "cats_address", "Clean Address (Cats)"];
const CLEAN_ADDRESS: &[&str] = &["Clean Address (Cats)", "Clean Address"];
const CAT_COUNT: &[&str] = &["Estimated number of unowned/feral/stray cats", "cat_count"];
const NOTES: &[&str] = &["Notes", "notes", "Describe the Situation", "situation"];
const STATUS: &[&str] = &["Submission Status", "Status"];
const APPOINTMENT_DATE: &[&str] = &["Appointment Date", "appointment_date"];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentSummary {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_blank: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentRow {
    pub source_pk: String,
    pub row_hash: String,
    pub submitted_at: Option<NaiveDateTime>,
    pub requester_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cats_address: Option<String>,
    pub cat_count: Option<i32>,
    pub notes: Option<String>,
    pub submission_status: Option<String>,
    pub appointment_date: Option<NaiveDate>,
    pub raw: Value,
}

fn opt(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Record ID when present, otherwise a hash of submission time and contact fields
pub fn compute_source_pk(headers: &HeaderMap, record: &StringRecord) -> String {
    let record_id = headers.get_field(record, &["Record ID", "record_id"]);
    if !record_id.is_empty() {
        return record_id;
    }
    let submitted = headers.get_field(record, SUBMITTED);
    let email = headers.get_field(record, &["Email", "email"]).to_lowercase();
    let phone = normalize_phone(&headers.get_field(record, PHONE));
    let address = normalize::norm_ws(&headers.get_field(record, CATS_ADDRESS)).to_lowercase();
    format!("hash:{}", sha256_hex32(&format!("{}|{}|{}|{}", submitted, email, phone, address)))
}

/// Fingerprint of the fields that matter for change detection
pub fn compute_row_hash(headers: &HeaderMap, record: &StringRecord) -> String {
    let parts = [
        headers.get_field(record, SUBMITTED),
        headers.get_field(record, &["Name"]),
        headers.get_field(record, &["First Name"]),
        headers.get_field(record, &["Last Name"]),
        headers.get_field(record, &["Email", "email"]),
        headers.get_field(record, PHONE),
        headers.get_field(record, CATS_ADDRESS),
        headers.get_field(record, CLEAN_ADDRESS),
        headers.get_field(record, NOTES),
        headers.get_field(record, STATUS),
        headers.get_field(record, APPOINTMENT_DATE),
    ];
    sha256_hex32(&parts.join("|"))
}

impl AppointmentRow {
    pub fn parse(headers: &HeaderMap, record: &StringRecord) -> Self {
        let get = |keys: &[&str]| headers.get_field(record, keys);
        let phone = normalize_phone(&get(PHONE));
        Self {
            source_pk: compute_source_pk(headers, record),
            row_hash: compute_row_hash(headers, record),
            submitted_at: normalize::parse_datetime(&get(SUBMITTED)),
            requester_name: opt(get(&["Name"])),
            first_name: opt(get(&["First Name", "first_name"])),
            last_name: opt(get(&["Last Name", "last_name"])),
            email: opt(get(&["Email", "email"]).to_lowercase()),
            phone: opt(phone),
            cats_address: opt(get(CATS_ADDRESS)),
            cat_count: parse_leading_int(&get(CAT_COUNT)),
            notes: opt(get(NOTES)),
            submission_status: opt(get(STATUS)),
            appointment_date: normalize::parse_date(&get(APPOINTMENT_DATE)),
            raw: headers.to_json(record),
        }
    }
}

pub async fn import_appointment_requests(
    pool: &PgPool,
    path: &Path,
    dry_run: bool,
) -> Result<AppointmentSummary, IngestError> {
    let (headers, records) = read_csv(path)?;
    let source_file = source_file_name(path);
    let mut summary = AppointmentSummary { dry_run, ..Default::default() };

    let mut tx = pool.begin().await?;
    for record in &records {
        if normalize::is_blank_row(record) {
            summary.skipped_blank += 1;
            continue;
        }
        summary.processed += 1;
        let row = AppointmentRow::parse(&headers, record);

        let existing: Option<String> =
            sqlx::query_scalar("SELECT row_hash FROM source.appointment_requests WHERE source_pk = $1 FOR UPDATE")
                .bind(&row.source_pk)
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            Some(hash) if hash == row.row_hash => {
                summary.unchanged += 1;
                continue;
            }
            Some(_) => summary.updated += 1,
            None => summary.inserted += 1,
        }

        sqlx::query(
            "INSERT INTO source.appointment_requests \
               (source_pk, row_hash, source_file, submitted_at, requester_name, first_name, last_name, \
                email, phone, cats_address, cat_count, notes, submission_status, appointment_date, raw) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (source_pk) DO UPDATE SET \
               row_hash = EXCLUDED.row_hash, source_file = EXCLUDED.source_file, \
               submitted_at = EXCLUDED.submitted_at, requester_name = EXCLUDED.requester_name, \
               first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name, \
               email = EXCLUDED.email, phone = EXCLUDED.phone, cats_address = EXCLUDED.cats_address, \
               cat_count = EXCLUDED.cat_count, notes = EXCLUDED.notes, \
               submission_status = EXCLUDED.submission_status, appointment_date = EXCLUDED.appointment_date, \
               raw = EXCLUDED.raw, updated_at = now()",
        )
        .bind(&row.source_pk)
        .bind(&row.row_hash)
        .bind(&source_file)
        .bind(row.submitted_at)
        .bind(row.requester_name.as_deref())
        .bind(row.first_name.as_deref())
        .bind(row.last_name.as_deref())
        .bind(row.email.as_deref())
        .bind(row.phone.as_deref())
        .bind(row.cats_address.as_deref())
        .bind(row.cat_count)
        .bind(row.notes.as_deref())
        .bind(row.submission_status.as_deref())
        .bind(row.appointment_date)
        .bind(&row.raw)
        .execute(&mut *tx)
        .await?;
    }

    if dry_run {
        tx.rollback().await?;
    } else {
        tx.commit().await?;
    }
    tracing::info!(
        processed = summary.processed,
        inserted = summary.inserted,
        updated = summary.updated,
        unchanged = summary.unchanged,
        "Staged appointment requests from {}",
        source_file
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> HeaderMap {
        HeaderMap::from_headers(&StringRecord::from(vec![
            "\u{feff}Record ID",
            "New Submitted",
            "Name",
            "Email",
            "Best phone number to reach you",
            "Street address where cats are located",
            "Estimated number of unowned/feral/stray cats",
            "Appointment Date",
        ]))
    }

    #[test]
    fn record_id_wins_for_source_pk() {
        let r = StringRecord::from(vec!["recABC", "", "", "", "", "", "", ""]);
        assert_eq!(compute_source_pk(&headers(), &r), "recABC");
    }

    #[test]
    fn hash_source_pk_ignores_formatting() {
        let h = headers();
        let a = StringRecord::from(vec!["", "1/2/2024", "", "A@X.org", "(707) 555-1212", "1  Elm St", "", ""]);
        let b = StringRecord::from(vec!["", "1/2/2024", "", "a@x.org", "707.555.1212", "1 elm st", "", ""]);
        let pk = compute_source_pk(&h, &a);
        assert!(pk.starts_with("hash:"));
        assert_eq!(pk.len(), "hash:".len() + 32);
        assert_eq!(pk, compute_source_pk(&h, &b));
    }

    #[test]
    fn row_hash_tracks_content() {
        let h = headers();
        let a = StringRecord::from(vec!["rec1", "1/2/2024", "Ann", "a@x.org", "", "1 Elm", "3", ""]);
        let b = StringRecord::from(vec!["rec1", "1/2/2024", "Ann", "a@x.org", "", "2 Elm", "3", ""]);
        assert_ne!(compute_row_hash(&h, &a), compute_row_hash(&h, &b));
        assert_eq!(compute_row_hash(&h, &a), compute_row_hash(&h, &a.clone()));
    }

    #[test]
    fn parses_row_fields() {
        let r = StringRecord::from(vec![
            "rec1",
            "03/14/2024 9:05AM",
            "Ann Lee",
            "Ann@X.org",
            "707-555-1212",
            "1 Elm St",
            "3-5",
            "2024-04-01",
        ]);
        let row = AppointmentRow::parse(&headers(), &r);
        assert_eq!(row.email.as_deref(), Some("ann@x.org"));
        assert_eq!(row.phone.as_deref(), Some("7075551212"));
        assert_eq!(row.cat_count, Some(3));
        assert_eq!(row.appointment_date, NaiveDate::from_ymd_opt(2024, 4, 1));
        assert!(row.submitted_at.is_some());
        assert_eq!(row.raw["Record ID"], "rec1");
        assert_eq!(row.notes, None);
    }
}
