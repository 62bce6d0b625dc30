//! # Upload Endpoint - Capture Ingestion
//!
//! The core server component is responsible for ONE thing: turning a submitted
//! capture into a stored file. It knows nothing about HTTP; routing, rate
//! limiting and client address resolution live in the
//! [`middleware`](super::middleware) layer.
//!
//! ## Pipeline
//!
//! ```text
//! envelope shape -> base64 decode -> sniff -> allow-list -> size
//!     -> save main image -> (optional) save thumbnail -> response
//! ```
//!
//! Every check runs before the first write, so a rejected upload never
//! touches the filesystem.

use log::{debug, info, warn};
use std::io::Cursor;
use std::sync::Arc;

use super::store::PersistenceStore;
use crate::common::error::UploadError;
use crate::common::messages::{UploadRequest, UploadResponse};
use crate::processing::sniff::ImageFormat;
use crate::processing::validation::UploadValidator;

pub const SAVED_MESSAGE: &str = "Saved successfully";

/// Who sent an upload, for log lines only.
#[derive(Debug, Clone)]
pub struct UploadContext {
    pub client_ip: String,
    pub os: &'static str,
}

impl Default for UploadContext {
    fn default() -> Self {
        Self {
            client_ip: "unknown".to_string(),
            os: "Unknown",
        }
    }
}

/// Core server component that validates and persists captures.
///
/// Request-scoped: nothing is shared between concurrent uploads except the
/// store's directories and its name clock.
pub struct UploadEndpoint {
    validator: UploadValidator,
    store: Arc<PersistenceStore>,
}

impl UploadEndpoint {
    pub fn new(validator: UploadValidator, store: Arc<PersistenceStore>) -> Self {
        Self { validator, store }
    }

    pub fn store(&self) -> &Arc<PersistenceStore> {
        &self.store
    }

    /// Process one submitted capture.
    ///
    /// # Returns
    /// - `Ok(UploadResponse)`: the main image was persisted
    /// - `Err(UploadError)`: rejected before any write, or the main write failed
    ///
    /// Thumbnail problems are logged and never change the result.
    pub async fn handle(
        &self,
        request: UploadRequest,
        ctx: &UploadContext,
    ) -> Result<UploadResponse, UploadError> {
        info!(
            "📥 [UPLOAD ATTEMPT] IP: {} | OS: {}",
            ctx.client_ip, ctx.os
        );

        let result = self.process(request, ctx).await;
        if let Err(e) = &result {
            warn!(
                "🚫 [UPLOAD REJECTED] IP: {} | {}: {}",
                ctx.client_ip,
                e.kind(),
                e
            );
        }
        result
    }

    async fn process(
        &self,
        request: UploadRequest,
        ctx: &UploadContext,
    ) -> Result<UploadResponse, UploadError> {
        let encoded = request.image.as_deref().ok_or(UploadError::InvalidInput)?;

        let image = self.validator.validate(encoded)?;
        if ImageFormat::from_mime_tag(&image.declared) != image.format {
            debug!(
                "Declared image/{} but content is {}",
                image.declared, image.format
            );
        }

        let filename = self.store.save(&image.bytes, image.format).await?;

        let resolution = match confirmed_resolution(&image.bytes) {
            Some((w, h)) => format!("{}x{}", w, h),
            None => "N/A".to_string(),
        };
        info!(
            "✅ [SECURE UPLOAD] IP: {} | Saved: {} | Size: {:.2}KB | Res: {} | Declared: {}",
            ctx.client_ip,
            filename,
            image.bytes.len() as f64 / 1024.0,
            resolution,
            declared_dimensions(request.width, request.height)
        );

        if let Some(thumbnail) = request.thumbnail.as_deref() {
            self.persist_thumbnail(thumbnail, &filename, ctx).await;
        }

        Ok(UploadResponse {
            message: SAVED_MESSAGE.to_string(),
            filename,
        })
    }

    /// Validate and store a thumbnail next to `base_filename`.
    ///
    /// Returns the thumbnail name, or `None` after logging why it was skipped.
    async fn persist_thumbnail(
        &self,
        encoded: &str,
        base_filename: &str,
        ctx: &UploadContext,
    ) -> Option<String> {
        let thumbnail = match self.validator.validate(encoded) {
            Ok(thumbnail) => thumbnail,
            Err(e) => {
                warn!(
                    "⚠️  [THUMBNAIL] IP: {} | Skipped for {}: {}",
                    ctx.client_ip, base_filename, e
                );
                return None;
            }
        };

        match self.store.save_thumbnail(&thumbnail.bytes, base_filename).await {
            Ok(name) => {
                info!(
                    "🖼️  [THUMBNAIL] IP: {} | Saved: {} ({:.2}KB)",
                    ctx.client_ip,
                    name,
                    thumbnail.bytes.len() as f64 / 1024.0
                );
                Some(name)
            }
            Err(e) => {
                warn!("⚠️  Failed to save thumbnail for {}: {}", base_filename, e);
                None
            }
        }
    }
}

/// Read width and height from the image header.
fn confirmed_resolution(bytes: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn declared_dimensions(width: Option<f64>, height: Option<f64>) -> String {
    match (width, height) {
        (Some(w), Some(h)) => format!("{}x{}", w as u64, h as u64),
        _ => "N/A".to_string(),
    }
}
