use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mower cloud client: obtain credentials and follow the live event stream.
#[derive(Debug, Parser)]
#[command(name = "mowerlink", version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "MOWERLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Application key from the vendor developer portal
    #[arg(long, global = true, env = "MOWERLINK_APP_KEY")]
    pub app_key: Option<String>,

    /// Application secret (client-credentials login)
    #[arg(long, global = true, env = "MOWERLINK_APP_SECRET", hide_env_values = true)]
    pub app_secret: Option<String>,

    /// Account username (password login)
    #[arg(long, global = true, env = "MOWERLINK_USERNAME")]
    pub username: Option<String>,

    /// Account password (password login)
    #[arg(long, global = true, env = "MOWERLINK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Override the authentication API base URL
    #[arg(long, global = true, env = "MOWERLINK_AUTH_URL")]
    pub auth_url: Option<String>,

    /// Override the event stream URL
    #[arg(long, global = true, env = "MOWERLINK_STREAM_URL")]
    pub stream_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Also write daily rotated log files into this directory
    #[arg(long, global = true, env = "MOWERLINK_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Log in, print the credential summary, then log out
    Token,

    /// Follow the event stream until interrupted
    Watch {
        /// Seconds between keep-alive ticks
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        keep_alive_secs: Option<u64>,

        /// Seconds of silence before the stream is reconnected
        #[arg(long)]
        reconnect_threshold_secs: Option<u64>,
    },
}
