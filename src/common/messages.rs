//! # Message Protocol
//!
//! JSON bodies exchanged between the client upload queue and the server:
//! - [`CapturePayload`]: what the client queues and posts to `POST /upload`
//! - [`UploadRequest`]: the same body as the server sees it, before validation
//! - [`UploadResponse`], [`MessageResponse`], [`IpResponse`]: server replies

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::processing::envelope::EncodedImage;

// ============================================================================
// CLIENT -> SERVER
// ============================================================================

/// One finished capture, ready for upload.
///
/// The queue never mutates a payload once it is enqueued; it is serialized
/// as-is for every attempt.
///
/// # Fields
/// - `image`: main image as a `data:image/<tag>;base64,<payload>` string
/// - `thumbnail`: optional thumbnail in the same encoding
/// - `width`, `height`: informational, never trusted by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePayload {
    pub image: EncodedImage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EncodedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Upload body as received by the server.
///
/// Fields are read leniently: a value of the wrong JSON type is treated as
/// absent, so a broken `thumbnail` can never fail the main upload. The
/// endpoint then parses the strings into [`EncodedImage`]s itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadRequest {
    #[serde(default, deserialize_with = "string_or_none")]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "number_or_none")]
    pub width: Option<f64>,
    #[serde(default, deserialize_with = "number_or_none")]
    pub height: Option<f64>,
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn number_or_none<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_f64())
}

// ============================================================================
// SERVER -> CLIENT
// ============================================================================

/// Successful `POST /upload` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
}

/// Error reply used by every non-success status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// `GET /my-ip` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpResponse {
    pub ip: String,
}
