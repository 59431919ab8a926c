use anyhow::anyhow;
use clap::Subcommand;

use crate::cli::utils::{connect, output_success};
use crate::cli::OutputFormat;
use crate::services::matching::{self, MatchSource};

#[derive(Subcommand)]
pub enum MatchCommands {
    #[command(about = "Score unlinked source contacts against canonical people")]
    People {
        #[arg(long, default_value = "all", help = "appointment_requests, intake or all")]
        source: String,
        #[arg(long, default_value_t = 1000, help = "Maximum source records per system")]
        limit: i64,
        #[arg(long, help = "Score without writing candidates")]
        dry_run: bool,
        #[arg(long, help = "Debug logging")]
        verbose: bool,
    },
}

pub async fn handle(cmd: MatchCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        MatchCommands::People { source, limit, dry_run, .. } => {
            let sources = MatchSource::parse_selection(&source)
                .ok_or_else(|| anyhow!("unknown source '{}' (expected appointment_requests, intake or all)", source))?;
            if limit < 1 {
                return Err(anyhow!("--limit must be at least 1"));
            }
            let pool = connect().await?;
            let stats = matching::generate_candidates(&pool, &sources, limit, dry_run).await?;
            output_success(
                output_format,
                &format!(
                    "{} candidates from {} source records",
                    stats.candidates_generated, stats.sources_processed
                ),
                &stats,
            )
        }
    }
}
