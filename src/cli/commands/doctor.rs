use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::services::doctor;

pub async fn handle(output_format: OutputFormat) -> anyhow::Result<()> {
    let report = doctor::run();
    match output_format {
        OutputFormat::Json => output_success(output_format, "Environment check", &report)?,
        OutputFormat::Text => {
            for var in &report.vars {
                let marker = if !var.state.is_problem() {
                    "ok"
                } else if var.required {
                    "ERROR"
                } else {
                    "warn"
                };
                let state = serde_json::to_value(var.state)?;
                println!(
                    "[{:<5}] {:<30} {:<10} {}",
                    marker,
                    var.name,
                    state.as_str().unwrap_or_default(),
                    var.masked.as_deref().or(var.detail.as_deref()).unwrap_or("")
                );
            }
            for (key, lines) in &report.duplicates {
                println!("[ERROR] {} is defined more than once in .env (lines {:?})", key, lines);
            }
        }
    }
    if report.has_errors() {
        anyhow::bail!("environment has problems");
    }
    Ok(())
}
