pub mod airtable_requests;
pub mod appointment_requests;
pub mod clinichq_appointments;
pub mod normalize;

use std::path::{Path, PathBuf};

use csv::StringRecord;
use thiserror::Error;

use crate::database::DatabaseError;
use normalize::HeaderMap;

pub use airtable_requests::{import_trapping_requests, ImportSummary};
pub use appointment_requests::{import_appointment_requests, AppointmentSummary};
pub use clinichq_appointments::{import_clinichq_appointments, ClinicAppointmentSummary};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed workbook: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("file has no header row")]
    MissingHeaders,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Database(DatabaseError::classify(err))
    }
}

/// Whole file as header map plus records. Rows may be ragged.
pub fn read_csv(path: &Path) -> Result<(HeaderMap, Vec<StringRecord>), IngestError> {
    let file = std::fs::File::open(path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = HeaderMap::from_headers(reader.headers()?);
    if headers.is_empty() {
        return Err(IngestError::MissingHeaders);
    }
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    tracing::debug!("Read {} rows from {}", records.len(), path.display());
    Ok((headers, records))
}

/// File name for provenance columns
pub fn source_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
