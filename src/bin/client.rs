//! # Client Binary Entry Point
//!
//! Thin wrapper that turns image files into captures and delivers them through
//! the upload queue.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin client -- --config config/client.toml shot1.jpg shot2.jpg
//! ```
//!
//! With an overlay frame and metrics:
//! ```bash
//! cargo run --bin client -- --config config/client.toml \
//!   --overlay overlays/frame.png \
//!   --client-id 2 \
//!   --metrics-output ./metrics/booth_2.json \
//!   shots/*.jpg
//! ```
//!
//! The client will:
//! 1. Load configuration from the specified TOML file
//! 2. Composite the overlay and build a thumbnail for every image
//! 3. Queue every capture and deliver them in order, retrying failures
//! 4. Wait until the queue drains (or Ctrl-C), then report what was not delivered
//! 5. Export metrics to JSON (if metrics-output specified)

use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use log::{error, info, warn, LevelFilter};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use photobooth::client::{ClientConfig, DeliveryMetrics, UploadClient, UploadQueue, UploadStatus};
use photobooth::common::config::load_or_default;
use photobooth::processing::capture::prepare_capture;

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the client configuration file (TOML format)
    ///
    /// Example: config/client.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Image files to upload, in order
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Overlay image composited over every capture
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Path to write metrics JSON output (optional)
    #[arg(long)]
    metrics_output: Option<String>,

    /// Client ID (appended to name from config, e.g., "Booth" + "_2")
    #[arg(long)]
    client_id: Option<u32>,
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
    let mut config: ClientConfig = load_or_default(args.config.as_deref())?;

    if let Some(id) = args.client_id {
        config.client.name = format!("{}_{}", config.client.name, id);
    }
    let client_name = config.client.name.clone();

    let overlay = match &args.overlay {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read overlay {}", path.display()))?,
        ),
        None => None,
    };

    let metrics = args
        .metrics_output
        .as_ref()
        .map(|_| Arc::new(Mutex::new(DeliveryMetrics::new(client_name.clone()))));

    info!(
        "📸 {} delivering to {} ({} image(s))",
        client_name,
        config.client.server_url,
        args.images.len()
    );

    let queue = UploadQueue::spawn_with_metrics(
        UploadClient::new(&config.client.server_url),
        config.upload.clone(),
        metrics.clone(),
    );

    // Mirror status changes into the log
    let mut status = queue.subscribe();
    let status_logger = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            if current != UploadStatus::Idle {
                info!("📶 {}", current);
            }
        }
    });

    for path in &args.images {
        let frame = match tokio::fs::read(path).await {
            Ok(frame) => frame,
            Err(e) => {
                error!("❌ Failed to read {}: {}", path.display(), e);
                continue;
            }
        };

        let overlay = overlay.clone();
        let thumbnail = config.thumbnail.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            prepare_capture(&frame, overlay.as_deref(), &thumbnail)
        })
        .await?;

        match prepared {
            Ok(payload) => {
                let id = queue.enqueue(payload)?;
                info!("🎞️  Captured {} as {}", path.display(), id);
            }
            Err(e) => error!("❌ Failed to prepare {}: {}", path.display(), e),
        }
    }

    tokio::select! {
        result = queue.flush() => result?,
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping after the current upload"),
    }

    for rejected in queue.rejected().await? {
        error!(
            "❌ Capture {} was rejected after {} attempt(s): {}",
            rejected.id, rejected.attempts, rejected.error
        );
    }

    let undelivered = queue.shutdown().await?;
    if undelivered.is_empty() {
        info!("✅ All captures delivered");
    } else {
        warn!("{} capture(s) were not delivered", undelivered.len());
    }
    status_logger.abort();

    if let (Some(metrics), Some(output_path)) = (metrics, args.metrics_output) {
        let metrics = metrics
            .lock()
            .map_err(|_| anyhow::anyhow!("metrics lock poisoned"))?;
        metrics.export_to_json(&output_path)?;
        info!("Metrics exported to: {}", output_path);
    }

    Ok(())
}
