//! ClinicHQ upcoming-appointment XLSX exports into `source.clinichq_appointments`.
//!
//! An export covers a date window, taken from the first two `YYYY-MM-DD`
//! dates in the file name or else from the dates in the sheet. Rows inside
//! that window that this run did not see are marked stale; rows outside it
//! are left alone.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{Data, DataType, Reader, Xlsx};
use chrono::NaiveDate;
use csv::StringRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::normalize::{self, norm_ws, normalize_phone, sha256_hex32, HeaderMap};
use super::{source_file_name, IngestError};

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClinicAppointmentSummary {
    pub run_id: Uuid,
    pub coverage_start: Option<NaiveDate>,
    pub coverage_end: Option<NaiveDate>,
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub staled: u64,
    pub skipped_blank: usize,
    pub skipped_no_date: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClinicAppointmentRow {
    pub source_pk: String,
    pub row_hash: String,
    pub appt_date: Option<NaiveDate>,
    pub appt_number: Option<i64>,
    pub animal_name: String,
    pub ownership_type: String,
    pub client_type: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub cell_phone: String,
    pub phone: String,
    pub email: String,
    pub raw: Value,
}

/// `MM/DD/YYYY`, ISO, then `DD/MM/YYYY`
pub fn parse_appt_date(s: &str) -> Option<NaiveDate> {
    normalize::parse_date(s).or_else(|| NaiveDate::parse_from_str(s.trim(), "%d/%m/%Y").ok())
}

/// First two ISO dates in names like `clinichq_appts_2025-08-01_2026-02-28.xlsx`
pub fn coverage_window_from_filename(name: &str) -> Option<(NaiveDate, NaiveDate)> {
    let mut dates = ISO_DATE
        .find_iter(name)
        .map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok());
    match (dates.next(), dates.next()) {
        (Some(Some(start)), Some(Some(end))) => Some((start, end)),
        _ => None,
    }
}

fn opt(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

impl ClinicAppointmentRow {
    pub fn parse(headers: &HeaderMap, record: &StringRecord) -> Self {
        let get = |key: &str| norm_ws(&headers.get_field(record, &[key]));
        let appt_date = parse_appt_date(&get("Date"));
        let appt_number = get("Number").parse::<i64>().ok();
        let mut row = Self {
            source_pk: String::new(),
            row_hash: String::new(),
            appt_date,
            appt_number,
            animal_name: get("Animal Name"),
            ownership_type: get("Ownership"),
            client_type: get("ClientType"),
            first_name: get("Owner First Name"),
            last_name: get("Owner Last Name"),
            address: get("Owner Address"),
            cell_phone: normalize_phone(&get("Owner Cell Phone")),
            phone: normalize_phone(&get("Owner Phone")),
            email: get("Owner Email"),
            raw: headers.to_json(record),
        };
        row.source_pk = row.compute_source_pk();
        row.row_hash = row.compute_row_hash();
        row
    }

    fn date_text(&self) -> String {
        self.appt_date.map(|d| d.to_string()).unwrap_or_default()
    }

    /// Appointment number when positive, else a hash of date, client, address and animal
    pub fn compute_source_pk(&self) -> String {
        if let Some(n) = self.appt_number.filter(|n| *n > 0) {
            return n.to_string();
        }
        let client = format!("{} {}", self.first_name, self.last_name).to_lowercase();
        let key = format!(
            "{}|{}|{}|{}",
            self.date_text(),
            client,
            self.address.to_lowercase(),
            self.animal_name.to_lowercase()
        );
        format!("hash:{}", sha256_hex32(&key))
    }

    pub fn compute_row_hash(&self) -> String {
        let parts = [
            self.date_text(),
            self.appt_number.map(|n| n.to_string()).unwrap_or_default(),
            self.first_name.clone(),
            self.last_name.clone(),
            self.address.clone(),
            self.animal_name.clone(),
            self.email.clone(),
            self.cell_phone.clone(),
            self.phone.clone(),
        ];
        sha256_hex32(&parts.join("|"))
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(_) => cell.as_date().map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
        other => other.to_string(),
    }
}

/// First worksheet as header map plus string records
pub fn read_xlsx(path: &Path) -> Result<(HeaderMap, Vec<StringRecord>), IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })?;
    let mut workbook: Xlsx<_> = Xlsx::new(BufReader::new(file))?;
    let range = workbook.worksheet_range_at(0).ok_or(IngestError::MissingHeaders)??;

    let mut rows = range.rows().map(|cells| StringRecord::from(cells.iter().map(cell_text).collect::<Vec<_>>()));
    let headers = rows.next().map(|h| HeaderMap::from_headers(&h)).unwrap_or_default();
    if headers.is_empty() {
        return Err(IngestError::MissingHeaders);
    }
    let records: Vec<_> = rows.collect();
    tracing::debug!("Read {} rows from {}", records.len(), path.display());
    Ok((headers, records))
}

pub async fn import_clinichq_appointments(
    pool: &PgPool,
    path: &Path,
    dry_run: bool,
) -> Result<ClinicAppointmentSummary, IngestError> {
    let (headers, records) = read_xlsx(path)?;
    let source_file = source_file_name(path);
    let run_id = Uuid::new_v4();
    let mut summary = ClinicAppointmentSummary {
        run_id,
        coverage_start: None,
        coverage_end: None,
        processed: 0,
        inserted: 0,
        updated: 0,
        unchanged: 0,
        staled: 0,
        skipped_blank: 0,
        skipped_no_date: 0,
        dry_run,
    };
    let mut data_window: Option<(NaiveDate, NaiveDate)> = None;

    let mut tx = pool.begin().await?;
    for record in &records {
        if normalize::is_blank_row(record) {
            summary.skipped_blank += 1;
            continue;
        }
        summary.processed += 1;
        let row = ClinicAppointmentRow::parse(&headers, record);
        let Some(appt_date) = row.appt_date else {
            summary.skipped_no_date += 1;
            continue;
        };
        data_window = Some(match data_window {
            Some((lo, hi)) => (lo.min(appt_date), hi.max(appt_date)),
            None => (appt_date, appt_date),
        });

        let existing: Option<String> =
            sqlx::query_scalar("SELECT row_hash FROM source.clinichq_appointments WHERE source_pk = $1 FOR UPDATE")
                .bind(&row.source_pk)
                .fetch_optional(&mut *tx)
                .await?;

        if existing.as_deref() == Some(row.row_hash.as_str()) {
            sqlx::query(
                "UPDATE source.clinichq_appointments \
                 SET last_seen_run_id = $2, last_seen_at = now(), is_current = true, stale_at = NULL \
                 WHERE source_pk = $1",
            )
            .bind(&row.source_pk)
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
            summary.unchanged += 1;
            continue;
        }

        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO source.clinichq_appointments \
               (source_pk, row_hash, source_file, appt_date, appt_number, client_first_name, client_last_name, \
                client_address, client_cell_phone, client_phone, client_email, client_type, animal_name, \
                ownership_type, raw, last_seen_run_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (source_pk) DO UPDATE SET \
               row_hash = EXCLUDED.row_hash, source_file = EXCLUDED.source_file, appt_date = EXCLUDED.appt_date, \
               appt_number = coalesce(EXCLUDED.appt_number, source.clinichq_appointments.appt_number), \
               client_first_name = coalesce(EXCLUDED.client_first_name, source.clinichq_appointments.client_first_name), \
               client_last_name = coalesce(EXCLUDED.client_last_name, source.clinichq_appointments.client_last_name), \
               client_address = coalesce(EXCLUDED.client_address, source.clinichq_appointments.client_address), \
               client_cell_phone = coalesce(EXCLUDED.client_cell_phone, source.clinichq_appointments.client_cell_phone), \
               client_phone = coalesce(EXCLUDED.client_phone, source.clinichq_appointments.client_phone), \
               client_email = coalesce(EXCLUDED.client_email, source.clinichq_appointments.client_email), \
               client_type = coalesce(EXCLUDED.client_type, source.clinichq_appointments.client_type), \
               animal_name = coalesce(EXCLUDED.animal_name, source.clinichq_appointments.animal_name), \
               ownership_type = coalesce(EXCLUDED.ownership_type, source.clinichq_appointments.ownership_type), \
               raw = EXCLUDED.raw, last_seen_run_id = EXCLUDED.last_seen_run_id, last_seen_at = now(), \
               is_current = true, stale_at = NULL, updated_at = now() \
             RETURNING (xmax = 0)",
        )
        .bind(&row.source_pk)
        .bind(&row.row_hash)
        .bind(&source_file)
        .bind(appt_date)
        .bind(row.appt_number)
        .bind(opt(&row.first_name))
        .bind(opt(&row.last_name))
        .bind(opt(&row.address))
        .bind(opt(&row.cell_phone))
        .bind(opt(&row.phone))
        .bind(opt(&row.email))
        .bind(opt(&row.client_type))
        .bind(opt(&row.animal_name))
        .bind(opt(&row.ownership_type))
        .bind(&row.raw)
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await?;

        if inserted {
            summary.inserted += 1;
        } else {
            summary.updated += 1;
        }
    }

    if let Some((start, end)) = coverage_window_from_filename(&source_file).or(data_window) {
        summary.coverage_start = Some(start);
        summary.coverage_end = Some(end);
        let staled = sqlx::query(
            "UPDATE source.clinichq_appointments SET is_current = false, stale_at = now() \
             WHERE is_current AND appt_date BETWEEN $1 AND $2 AND last_seen_run_id <> $3",
        )
        .bind(start)
        .bind(end)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
        summary.staled = staled.rows_affected();
    }

    if dry_run {
        tx.rollback().await?;
    } else {
        tx.commit().await?;
    }
    tracing::info!(
        %run_id,
        processed = summary.processed,
        inserted = summary.inserted,
        updated = summary.updated,
        staled = summary.staled,
        "Imported ClinicHQ appointments from {}",
        source_file
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> HeaderMap {
        HeaderMap::from_headers(&StringRecord::from(vec![
            "Date",
            "Number",
            "Animal Name",
            "Owner First Name",
            "Owner Last Name",
            "Owner Address",
            "Owner Cell Phone",
            "Owner Email",
        ]))
    }

    fn record(fields: [&str; 8]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn appointment_number_is_the_key() {
        let row = ClinicAppointmentRow::parse(
            &headers(),
            &record(["03/14/2025", "48211", "Smudge", "Ann", "Lee", "1 Elm St", "", ""]),
        );
        assert_eq!(row.source_pk, "48211");
        assert_eq!(row.appt_date, NaiveDate::from_ymd_opt(2025, 3, 14));
    }

    #[test]
    fn missing_or_zero_number_hashes_identity_fields() {
        let h = headers();
        let a = ClinicAppointmentRow::parse(&h, &record(["2025-03-14", "0", "Smudge", "Ann", "Lee", "1 Elm  St", "", ""]));
        let b = ClinicAppointmentRow::parse(&h, &record(["03/14/2025", "", "SMUDGE", "ANN", "LEE", "1 elm st", "", ""]));
        assert!(a.source_pk.starts_with("hash:"));
        assert_eq!(a.source_pk.len(), "hash:".len() + 32);
        assert_eq!(a.source_pk, b.source_pk);
        assert_ne!(a.row_hash, b.row_hash);
    }

    #[test]
    fn row_hash_sees_contact_changes() {
        let h = headers();
        let a = ClinicAppointmentRow::parse(&h, &record(["2025-03-14", "7", "Smudge", "Ann", "Lee", "1 Elm", "707-555-0100", ""]));
        let b = ClinicAppointmentRow::parse(&h, &record(["2025-03-14", "7", "Smudge", "Ann", "Lee", "1 Elm", "(707) 555-0100", ""]));
        let c = ClinicAppointmentRow::parse(&h, &record(["2025-03-14", "7", "Smudge", "Ann", "Lee", "1 Elm", "", "a@x.org"]));
        assert_eq!(a.cell_phone, "7075550100");
        assert_eq!(a.row_hash, b.row_hash);
        assert_ne!(a.row_hash, c.row_hash);
    }

    #[test]
    fn dates_accept_day_first_fallback() {
        assert_eq!(parse_appt_date("2025-03-14"), NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(parse_appt_date("03/04/2025"), NaiveDate::from_ymd_opt(2025, 3, 4));
        assert_eq!(parse_appt_date("25/12/2025"), NaiveDate::from_ymd_opt(2025, 12, 25));
        assert_eq!(parse_appt_date("soon"), None);
        let row = ClinicAppointmentRow::parse(&headers(), &record(["", "12", "Smudge", "", "", "", "", ""]));
        assert_eq!(row.appt_date, None);
    }

    #[test]
    fn coverage_window_needs_two_dates() {
        assert_eq!(
            coverage_window_from_filename("clinichq_appts_2025-08-01_2026-02-28__pending.xlsx"),
            Some((NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()))
        );
        assert_eq!(coverage_window_from_filename("appts_2025-08-01.xlsx"), None);
        assert_eq!(coverage_window_from_filename("appts_2025-13-01_2025-14-01.xlsx"), None);
        assert_eq!(coverage_window_from_filename("upcoming.xlsx"), None);
    }

    #[test]
    fn cells_render_as_import_text() {
        assert_eq!(cell_text(&Data::Float(48211.0)), "48211");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::String("  Smudge ".into())), "Smudge");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn missing_workbook_is_an_io_error() {
        let err = read_xlsx(Path::new("/nonexistent/clinichq.xlsx")).unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }
}
