use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gap_foundry::config::CONFIG_FILE_NAME;
use gap_foundry::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "gap-foundry")]
#[command(version, about = "Market validation run orchestrator")]
pub struct Cli {
    /// Path to gapfoundry.toml. Defaults to the working directory's copy, if any.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS)
        #[arg(long)]
        dev: bool,

        /// Use scripted stage output instead of the provider
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the specificity gate on an input JSON file
    Check {
        /// JSON file with idea_one_liner, target_customer, problem_statement, ...
        input: PathBuf,
    },
    /// Write a default gapfoundry.toml
    InitConfig {
        /// Destination (defaults to ./gapfoundry.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { port, dev, dry_run } => {
            let config = cmd::load_config(cli.config.as_deref())?;
            let log_dir = config.server.data_dir.join("logs");
            std::fs::create_dir_all(&log_dir)?;
            let _guard = logging::init(cli.log_json, Some(&log_dir));
            cmd::cmd_serve(
                config,
                cmd::ServeOptions {
                    port: *port,
                    dev: *dev,
                    dry_run: *dry_run,
                },
            )
            .await?;
        }
        Commands::Check { input } => {
            let _guard = logging::init(cli.log_json, None);
            let config = cmd::load_config(cli.config.as_deref())?;
            if !cmd::cmd_check(&config, input)? {
                std::process::exit(cmd::check::EXIT_PREGATE_FAILED);
            }
        }
        Commands::InitConfig { path, force } => {
            let path = path.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            cmd::cmd_init_config(&path, *force)?;
        }
    }

    Ok(())
}
