#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]

//! Binary entrypoint that loads configuration, schedules the configured operations and runs
//! until interrupted.

use std::path::PathBuf;

use clap::Parser;
use depara_app::{AppResult, BootstrapOptions, run_app};

#[derive(Parser)]
#[command(name = "depara", about = "Scheduled move, copy and delete engine")]
struct Cli {
    #[arg(
        long,
        env = "DEPARA_CONFIG",
        help = "JSON configuration file; defaults and environment apply when omitted"
    )]
    config: Option<PathBuf>,
    #[arg(long, help = "Override the configured log level (e.g. debug)")]
    log_level: Option<String>,
}

/// Starts the engine and blocks until Ctrl-C.
#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    run_app(BootstrapOptions {
        config_path: cli.config,
        log_level: cli.log_level,
    })
    .await
}
