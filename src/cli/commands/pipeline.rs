use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::{connect, output_error, output_success};
use crate::cli::OutputFormat;
use crate::services::pipeline::{self, RunReport, REGISTRY};
use crate::types::PipelineRunStatus;

#[derive(Subcommand)]
pub enum PipelineCommands {
    #[command(about = "List registered pipelines")]
    List,

    #[command(about = "Run one pipeline, or every pipeline with --all")]
    Run {
        #[arg(help = "Pipeline name", required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,
        #[arg(long, help = "Run every registered pipeline in order")]
        all: bool,
    },
}

fn report_failed(report: &RunReport) -> bool {
    report.status == PipelineRunStatus::Error
}

pub async fn handle(cmd: PipelineCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        PipelineCommands::List => {
            let listing: Vec<_> = REGISTRY
                .iter()
                .map(|p| json!({ "name": p.name, "description": p.description }))
                .collect();
            match output_format {
                OutputFormat::Json => output_success(output_format, "Registered pipelines", &listing),
                OutputFormat::Text => {
                    for p in REGISTRY {
                        println!("{:<20} {}", p.name, p.description);
                    }
                    Ok(())
                }
            }
        }
        PipelineCommands::Run { name, all } => {
            let pool = connect().await?;
            let reports = match name {
                Some(name) if !all => vec![pipeline::run_pipeline(&pool, &name).await?],
                _ => pipeline::run_all(&pool).await?,
            };
            for report in &reports {
                let message = format!("{} finished: {}", report.pipeline, report.status);
                if report_failed(report) {
                    output_error(output_format, &format!("{} ({})", message, report.error.as_deref().unwrap_or("")))?;
                } else {
                    output_success(output_format, &message, report)?;
                }
            }
            if reports.iter().any(report_failed) {
                anyhow::bail!("one or more pipelines failed");
            }
            Ok(())
        }
    }
}
