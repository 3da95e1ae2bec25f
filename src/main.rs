// SPDX-License-Identifier: Apache-2.0 OR MIT
use anyhow::{Context, Result};
use clap::Parser;
use pim_mfc::config::Config;
use pim_mfc::logging::{Logger, Severity};
use pim_mfc::supervisor;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override the configured global log level
    #[arg(long, global = true)]
    log_level: Option<Severity>,

    /// Write logs to stderr as JSON lines instead of plain text on stdout
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, PartialEq)]
enum Command {
    /// Run the multicast routing daemon
    Run {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file and print it normalized
    CheckConfig {
        #[arg(long, short)]
        config: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run { config } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(level) = args.log_level {
                config.log_level = level;
            }
            let logger = if args.json_logs {
                Logger::stderr_json()
            } else {
                Logger::stdout()
            };

            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = shutdown_tx.send(());
                }
            });
            supervisor::run(config, logger, shutdown_rx).await?;
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            println!("{}", config.to_json5());
        }
    }

    Ok(())
}
