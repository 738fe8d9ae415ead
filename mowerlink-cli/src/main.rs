mod cli;
mod commands;
mod config;
mod logging;

use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use crate::cli::{Args, Commands};
use crate::config::{FileConfig, ResolvedConfig};
use crate::logging::{LogOptions, init_logging};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _guard = match init_logging(&LogOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        json: args.json_logs,
        log_dir: args.log_dir.clone(),
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        error!("Application error: {e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    mowerlink::install_rustls_provider();

    let file = FileConfig::load(args.config.as_deref())?;
    let config = ResolvedConfig::resolve(file, &args)?;

    match args.command {
        Commands::Token => commands::token(config).await,
        Commands::Watch {
            keep_alive_secs,
            reconnect_threshold_secs,
        } => commands::watch(config, keep_alive_secs, reconnect_threshold_secs).await,
    }
}
