use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;

use crate::cli::utils::{connect, output_success};
use crate::cli::OutputFormat;
use crate::services::ingest;

#[derive(Subcommand)]
pub enum IngestCommands {
    #[command(about = "Import an Airtable trapping-requests CSV export")]
    AirtableRequests {
        #[arg(long, help = "Path to the CSV export")]
        csv: PathBuf,
        #[arg(long, help = "Run inside a transaction and roll it back")]
        dry_run: bool,
    },

    #[command(about = "Stage an Airtable appointment-requests CSV export")]
    AppointmentRequests {
        #[arg(long, help = "Path to the CSV export")]
        file: PathBuf,
        #[arg(long, help = "Count changes without writing")]
        dry_run: bool,
    },

    #[command(about = "Import a ClinicHQ upcoming-appointments XLSX export")]
    ClinichqAppointments {
        #[arg(long, help = "Path to the XLSX export")]
        file: PathBuf,
        #[arg(long, help = "Count changes without writing")]
        dry_run: bool,
    },
}

pub async fn handle(cmd: IngestCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let pool = connect().await?;
    match cmd {
        IngestCommands::AirtableRequests { csv, dry_run } => {
            let summary = ingest::import_trapping_requests(&pool, &csv, dry_run)
                .await
                .with_context(|| format!("importing {}", csv.display()))?;
            let verb = if dry_run { "Dry run of" } else { "Imported" };
            output_success(
                output_format,
                &format!("{} {} ({} rows read)", verb, csv.display(), summary.rows_read),
                &summary,
            )
        }
        IngestCommands::AppointmentRequests { file, dry_run } => {
            let summary = ingest::import_appointment_requests(&pool, &file, dry_run)
                .await
                .with_context(|| format!("importing {}", file.display()))?;
            let verb = if dry_run { "Dry run of" } else { "Staged" };
            output_success(
                output_format,
                &format!("{} {} ({} rows processed)", verb, file.display(), summary.processed),
                &summary,
            )
        }
        IngestCommands::ClinichqAppointments { file, dry_run } => {
            let summary = ingest::import_clinichq_appointments(&pool, &file, dry_run)
                .await
                .with_context(|| format!("importing {}", file.display()))?;
            let verb = if dry_run { "Dry run of" } else { "Imported" };
            output_success(
                output_format,
                &format!(
                    "{} {} ({} rows processed, {} staled)",
                    verb,
                    file.display(),
                    summary.processed,
                    summary.staled
                ),
                &summary,
            )
        }
    }
}
