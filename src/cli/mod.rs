pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "atlas")]
#[command(about = "Atlas CLI - imports, matching, pipelines and admin tasks")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Import source CSV exports")]
    Ingest {
        #[command(subcommand)]
        cmd: commands::ingest::IngestCommands,
    },

    #[command(about = "Generate person match candidates")]
    Match {
        #[command(subcommand)]
        cmd: commands::matching::MatchCommands,
    },

    #[command(about = "List and run named pipelines")]
    Pipeline {
        #[command(subcommand)]
        cmd: commands::pipeline::PipelineCommands,
    },

    #[command(about = "Staff account management")]
    Staff {
        #[command(subcommand)]
        cmd: commands::staff::StaffCommands,
    },

    #[command(about = "Check environment configuration")]
    Doctor,
}

impl Cli {
    /// Debug logging was requested by a subcommand flag
    pub fn verbose(&self) -> bool {
        matches!(
            &self.command,
            Commands::Match { cmd: commands::matching::MatchCommands::People { verbose: true, .. } }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Ingest { cmd } => commands::ingest::handle(cmd, output_format).await,
        Commands::Match { cmd } => commands::matching::handle(cmd, output_format).await,
        Commands::Pipeline { cmd } => commands::pipeline::handle(cmd, output_format).await,
        Commands::Staff { cmd } => commands::staff::handle(cmd, output_format).await,
        Commands::Doctor => commands::doctor::handle(output_format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_json_after_subcommand() {
        let cli = Cli::try_parse_from(["atlas", "pipeline", "list", "--json"]).unwrap();
        assert_eq!(OutputFormat::from_cli(&cli), OutputFormat::Json);
    }

    #[test]
    fn verbose_only_for_match_people() {
        let cli = Cli::try_parse_from(["atlas", "match", "people", "--verbose"]).unwrap();
        assert!(cli.verbose());
        let cli = Cli::try_parse_from(["atlas", "doctor"]).unwrap();
        assert!(!cli.verbose());
    }

    #[test]
    fn ingest_requires_csv_path() {
        assert!(Cli::try_parse_from(["atlas", "ingest", "airtable-requests"]).is_err());
        assert!(Cli::try_parse_from(["atlas", "ingest", "airtable-requests", "--csv", "x.csv", "--dry-run"]).is_ok());
    }

    #[test]
    fn clinichq_ingest_takes_a_file() {
        assert!(Cli::try_parse_from(["atlas", "ingest", "clinichq-appointments"]).is_err());
        let args = ["atlas", "ingest", "clinichq-appointments", "--file", "appts_2025-08-01_2025-09-30.xlsx", "--dry-run"];
        assert!(Cli::try_parse_from(args).is_ok());
    }

    #[test]
    fn pipeline_run_needs_name_or_all() {
        assert!(Cli::try_parse_from(["atlas", "pipeline", "run"]).is_err());
        assert!(Cli::try_parse_from(["atlas", "pipeline", "run", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["atlas", "pipeline", "run", "match_candidates", "--all"]).is_err());
    }
}
