//! # Capture Pipeline
//!
//! Turns a raw frame into a [`CapturePayload`]:
//! 1. Decode the frame
//! 2. Composite the selected overlay, stretched over the whole frame
//! 3. Encode the result as PNG
//! 4. Generate a JPEG thumbnail of the configured width
//!
//! A thumbnail failure never fails the capture; the payload simply carries no
//! thumbnail.

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, GenericImageView, ImageOutputFormat};
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use super::envelope::EncodedImage;
use super::sniff::ImageFormat;
use crate::common::messages::CapturePayload;

/// Thumbnail generation settings, the `[thumbnail]` table of the client config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    /// Target width in pixels; height follows the frame's aspect ratio.
    pub width: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 320,
            quality: 60,
        }
    }
}

/// Build an upload payload from a captured frame and an optional overlay.
///
/// # Arguments
/// - `frame`: encoded image bytes in any format the `image` crate can read
/// - `overlay`: encoded overlay image, composited over the full frame
/// - `thumbnail`: thumbnail settings
///
/// # Returns
/// - `Ok(CapturePayload)`: PNG main image plus an optional JPEG thumbnail
/// - `Err`: the frame or overlay could not be decoded, or PNG encoding failed
pub fn prepare_capture(
    frame: &[u8],
    overlay: Option<&[u8]>,
    thumbnail: &ThumbnailConfig,
) -> Result<CapturePayload> {
    let mut canvas = image::load_from_memory(frame)?;

    if let Some(overlay) = overlay {
        let overlay = image::load_from_memory(overlay)?;
        canvas = composite_overlay(canvas, &overlay);
    }

    let (width, height) = canvas.dimensions();
    let image = EncodedImage::encode(ImageFormat::Png, &encode_png(&canvas)?);

    let thumbnail = if thumbnail.enabled {
        match generate_thumbnail(&canvas, thumbnail) {
            Ok(bytes) => Some(EncodedImage::encode(ImageFormat::Jpeg, &bytes)),
            Err(e) => {
                warn!("⚠️  Thumbnail generation failed: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(CapturePayload {
        image,
        thumbnail,
        width: Some(width),
        height: Some(height),
    })
}

/// Draw `overlay` over `frame`, resized to cover it exactly.
pub fn composite_overlay(frame: DynamicImage, overlay: &DynamicImage) -> DynamicImage {
    let (width, height) = frame.dimensions();
    let mut base = frame.into_rgba8();
    let stretched = imageops::resize(&overlay.to_rgba8(), width, height, FilterType::Triangle);
    imageops::overlay(&mut base, &stretched, 0, 0);
    DynamicImage::ImageRgba8(base)
}

/// Resize to the configured width and encode as JPEG.
pub fn generate_thumbnail(image: &DynamicImage, config: &ThumbnailConfig) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || config.width == 0 {
        anyhow::bail!("cannot thumbnail a {}x{} image to width {}", width, height, config.width);
    }

    let thumb_width = config.width;
    let thumb_height = ((height as f64 * thumb_width as f64 / width as f64).round() as u32).max(1);
    let rgb = image
        .resize_exact(thumb_width, thumb_height, FilterType::Triangle)
        .into_rgb8();

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, config.quality.clamp(1, 100)).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8,
    )?;
    Ok(bytes)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageOutputFormat::Png)?;
    Ok(cursor.into_inner())
}
