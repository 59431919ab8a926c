use std::io::Write;

use atlas::services::ingest::airtable_requests::{plan_rows, record_id_map, ImportSummary};
use atlas::services::ingest::appointment_requests::AppointmentRow;
use atlas::services::ingest::{read_csv, source_file_name, IngestError};
use atlas::types::{ArchiveReason, RequestStatus};

fn csv_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn plans_trapping_requests_from_export() {
    let file = csv_file(
        "\u{feff}Case Number,Record ID,Case Status,First Name,Last Name,Email,Address,LookupRecordIDPrimaryReq\n\
         REQ-1,rec1,In Progress,Dana,Reyes,dana@example.org,12 Orchard Ln,\n\
         REQ-2,rec2,Hold,Sam,Ito,,40 Mill St,rec1\n\
         REQ-1,rec9,New,Dup,Row,,1 Elm St,\n\
         ,rec3,New,No,Case,,2 Elm St,\n\
         ,,,,,,,\n\
         REQ-3,rec4,Mystery Status,,,,3 Elm St,\n",
    );

    let (headers, records) = read_csv(file.path()).unwrap();
    let ids = record_id_map(&headers, &records);
    assert_eq!(ids.get("rec2").map(String::as_str), Some("REQ-2"));

    let mut summary = ImportSummary::default();
    let rows = plan_rows(&headers, &records, &mut summary);

    assert_eq!(summary.rows_read, 6);
    assert_eq!(summary.skipped_dupe_case_in_file, 1);
    assert_eq!(summary.skipped_missing_case_number, 1);
    assert_eq!(summary.skipped_blank_rows, 1);
    assert_eq!(summary.unmapped_statuses, 1);
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].case_number, "REQ-1");
    assert_eq!(rows[0].status, Some(RequestStatus::InProgress));
    assert_eq!(rows[1].merged_into_source_record_id.as_deref(), Some("rec1"));
    assert_eq!(rows[1].status, Some(RequestStatus::Closed));
    assert_eq!(rows[1].archive_reason, Some(ArchiveReason::Duplicate));
    assert_eq!(rows[2].status, None);
}

#[test]
fn appointment_rows_fall_back_to_hashed_key() {
    let file = csv_file(
        "Record ID,New Submitted,Email,Best phone number to reach you,Street address where cats are located\n\
         recA,2024-03-01 09:30:00,A@Example.org,(707) 555-0101,9 Bay Rd\n\
         ,2024-03-02 10:00:00,b@example.org,707-555-0102,10 Bay Rd\n",
    );
    let (headers, records) = read_csv(file.path()).unwrap();

    let first = AppointmentRow::parse(&headers, &records[0]);
    assert_eq!(first.source_pk, "recA");
    assert_eq!(first.email.as_deref(), Some("a@example.org"));
    assert_eq!(first.phone.as_deref(), Some("7075550101"));

    let second = AppointmentRow::parse(&headers, &records[1]);
    assert!(second.source_pk.starts_with("hash:"));
    assert_eq!(second.source_pk.len(), "hash:".len() + 32);
    assert_ne!(first.row_hash, second.row_hash);
}

#[test]
fn missing_file_reports_path() {
    let err = read_csv(std::path::Path::new("/nonexistent/requests.csv")).unwrap_err();
    match err {
        IngestError::Io { path, .. } => assert!(path.ends_with("requests.csv")),
        other => panic!("expected io error, got {}", other),
    }
    assert_eq!(source_file_name(std::path::Path::new("/data/export.csv")), "export.csv");
}
