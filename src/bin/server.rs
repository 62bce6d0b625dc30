//! # Server Binary Entry Point
//!
//! Thin wrapper that initializes and runs the photobooth server with its middleware.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --config config/server.toml
//! ```
//!
//! Without `--config` every setting takes its default (port 3000, `uploads/`,
//! `overlays/`, `public/`).
//!
//! The server will:
//! 1. Load configuration from the specified TOML file
//! 2. Create the upload, thumbnail and overlay directories
//! 3. Serve the upload API, the gallery and the static frontend

use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

use photobooth::common::config::load_or_default;
use photobooth::server::{ServerConfig, ServerMiddleware};

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file (TOML format)
    ///
    /// Example: config/server.toml
    #[arg(short, long)]
    config: Option<String>,
}

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// Format: `[HH:MM:SS] [LEVEL] message`. `RUST_LOG` overrides the INFO default.
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config: ServerConfig = load_or_default(args.config.as_deref())?;

    ServerMiddleware::new(config).run().await
}
