use clap::Parser;
use atlas::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    atlas::logging::init_cli(cli.verbose());

    if let Err(e) = atlas::cli::run(cli).await {
        match std::env::var("ATLAS_CLI_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => eprintln!("Error: {e:?}"),
            _ => eprintln!("Error: {e}"),
        }
        std::process::exit(1);
    }

    Ok(())
}
