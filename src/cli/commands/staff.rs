use anyhow::{anyhow, Context};
use clap::Subcommand;

use crate::cli::utils::{connect, output_success};
use crate::cli::OutputFormat;
use crate::services::staff::{self, NewStaff};
use crate::types::StaffRole;

pub const PASSWORD_ENV: &str = "ATLAS_NEW_STAFF_PASSWORD";

#[derive(Subcommand)]
pub enum StaffCommands {
    #[command(about = "Create a staff account (password from ATLAS_NEW_STAFF_PASSWORD)")]
    Create {
        #[arg(long)]
        email: String,
        #[arg(long, help = "Display name")]
        name: String,
        #[arg(long, default_value = "staff", help = "admin, staff or volunteer")]
        role: String,
    },
}

pub async fn handle(cmd: StaffCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        StaffCommands::Create { email, name, role } => {
            let role: StaffRole = role.parse().map_err(|e| anyhow!("{}", e))?;
            let password = std::env::var(PASSWORD_ENV).with_context(|| format!("{} is not set", PASSWORD_ENV))?;
            let input = NewStaff { email, display_name: name, role, password };
            let pool = connect().await?;
            let created = staff::create_staff(&pool, &input).await.map_err(|e| anyhow!("{}", e))?;
            output_success(output_format, &format!("Created {} {}", created.role, created.email), &created)
        }
    }
}
