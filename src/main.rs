use servicex::cli;
use servicex::config;
use servicex::logging;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "servicex", version, about = "Modular chat bot with loadable extensions")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot on the console transport
    Start,
    /// Create the config, database schema and network record
    Setup,
    /// List the extensions compiled into this build
    Extensions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let home = servicex::servicex_home();
    let config_path = cli.config.unwrap_or_else(|| home.join("config.yaml"));

    match cli.command {
        Some(Command::Extensions) => return cli::list_extensions(),
        Some(Command::Setup) => {
            let _guard = logging::init(None)?;
            return cli::setup(&config_path, &home).await;
        }
        Some(Command::Start) | None => {}
    }

    let cfg = config::Config::load(&config_path).await?;
    let _guard = logging::init(Some(&cfg.log_dir_path(&home)))?;
    info!(
        path = %config_path.display(),
        network = %cfg.network.name,
        version = env!("CARGO_PKG_VERSION"),
        "servicex starting"
    );

    cli::start(cfg, &home).await
}
