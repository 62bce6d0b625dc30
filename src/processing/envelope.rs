//! # Data-URI Envelope
//!
//! Binary image data travels as text in the form
//! `data:image/<tag>;base64,<payload>`. [`EncodedImage`] is the parsed form of
//! that string: the shape is checked once at the boundary and the payload is
//! only decoded on demand.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::sniff::ImageFormat;
use crate::common::error::UploadError;

const PREFIX: &str = "data:image/";
const SEPARATOR: &str = ";base64,";

/// A structurally valid image envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncodedImage {
    declared: String,
    data: String,
}

impl EncodedImage {
    /// Parse `data:image/<tag>;base64,<payload>`.
    ///
    /// The tag must be non-empty ASCII alphanumerics and the payload must be
    /// non-empty and single-line. Nothing is decoded here.
    pub fn parse(input: &str) -> Result<Self, UploadError> {
        let rest = input
            .strip_prefix(PREFIX)
            .ok_or_else(|| UploadError::MalformedEncoding("missing data:image/ prefix".into()))?;
        let (tag, data) = rest
            .split_once(SEPARATOR)
            .ok_or_else(|| UploadError::MalformedEncoding("missing ;base64, separator".into()))?;

        if tag.is_empty() || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(UploadError::MalformedEncoding(format!(
                "invalid mime tag {:?}",
                tag
            )));
        }
        if data.is_empty() || data.contains(['\n', '\r']) {
            return Err(UploadError::MalformedEncoding("empty or multi-line payload".into()));
        }

        Ok(Self {
            declared: tag.to_string(),
            data: data.to_string(),
        })
    }

    /// Build an envelope from raw bytes, declaring `format`.
    pub fn encode(format: ImageFormat, bytes: &[u8]) -> Self {
        Self {
            declared: format.mime_tag().to_string(),
            data: general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Decode the base64 payload.
    pub fn decode(&self) -> Result<Vec<u8>, UploadError> {
        general_purpose::STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| UploadError::MalformedEncoding(format!("invalid base64: {}", e)))
    }

    /// The client's claimed subtype, e.g. `png`. Advisory only.
    pub fn declared(&self) -> &str {
        &self.declared
    }

    pub fn declared_format(&self) -> ImageFormat {
        ImageFormat::from_mime_tag(&self.declared)
    }
}

impl FromStr for EncodedImage {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EncodedImage {
    type Error = UploadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EncodedImage> for String {
    fn from(value: EncodedImage) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}{}", PREFIX, self.declared, SEPARATOR, self.data)
    }
}
