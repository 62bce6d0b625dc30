//! # Upload Validation
//!
//! Applies the allow-list and size limit to an envelope before anything is
//! written to disk. The order is fixed: shape, decode, sniff, allow-list,
//! size.

use serde::{Deserialize, Serialize};

use super::envelope::EncodedImage;
use super::sniff::{sniff, ImageFormat};
use crate::common::error::UploadError;

const MIB: usize = 1024 * 1024;

/// Validation limits, the `[limits]` table of the server config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted decoded payload, in MiB.
    pub max_file_size_mb: usize,
    /// Formats that may be stored.
    pub allowed_types: Vec<ImageFormat>,
    /// Hard timeout for one upload request.
    pub upload_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            allowed_types: ImageFormat::KNOWN.to_vec(),
            upload_timeout_secs: 60,
        }
    }
}

impl LimitsConfig {
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * MIB
    }
}

/// A decoded payload that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    /// What the client claimed, kept for logging.
    pub declared: String,
}

#[derive(Debug, Clone)]
pub struct UploadValidator {
    allowed: Vec<ImageFormat>,
    max_bytes: usize,
}

impl UploadValidator {
    /// `Unknown` is never accepted, even if listed.
    pub fn new(allowed: Vec<ImageFormat>, max_bytes: usize) -> Self {
        let allowed = allowed
            .into_iter()
            .filter(|f| *f != ImageFormat::Unknown)
            .collect();
        Self { allowed, max_bytes }
    }

    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self::new(limits.allowed_types.clone(), limits.max_file_size_bytes())
    }

    pub fn is_allowed(&self, format: ImageFormat) -> bool {
        self.allowed.contains(&format)
    }

    /// Check decoded bytes: sniff, then allow-list, then size.
    pub fn check(&self, bytes: &[u8]) -> Result<ImageFormat, UploadError> {
        let format = sniff(bytes);
        if !self.is_allowed(format) {
            return Err(UploadError::InvalidFormat {
                detected: format.mime(),
            });
        }
        if bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }
        Ok(format)
    }

    /// Parse, decode and check an envelope string.
    pub fn validate(&self, encoded: &str) -> Result<ValidatedImage, UploadError> {
        let envelope = EncodedImage::parse(encoded)?;
        self.validate_envelope(&envelope)
    }

    pub fn validate_envelope(&self, envelope: &EncodedImage) -> Result<ValidatedImage, UploadError> {
        let bytes = envelope.decode()?;
        let format = self.check(&bytes)?;
        Ok(ValidatedImage {
            bytes,
            format,
            declared: envelope.declared().to_string(),
        })
    }
}

impl Default for UploadValidator {
    fn default() -> Self {
        Self::from_limits(&LimitsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::envelope::EncodedImage;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_accepts_allowed_format() {
        let validator = UploadValidator::default();
        let encoded = EncodedImage::encode(ImageFormat::Png, &PNG_HEADER).to_string();

        let image = validator.validate(&encoded).unwrap();
        assert_eq!(image.format, ImageFormat::Png);
        assert_eq!(image.bytes, PNG_HEADER);
    }

    #[test]
    fn test_declared_type_is_ignored() {
        let validator = UploadValidator::default();
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        let encoded = EncodedImage::encode(ImageFormat::Png, &jpeg).to_string();

        let image = validator.validate(&encoded).unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!(image.declared, "png");
        assert_eq!(image.format.extension(), Some("jpg"));
    }

    #[test]
    fn test_rejects_format_outside_allow_list() {
        let validator = UploadValidator::new(vec![ImageFormat::Png], MIB);
        assert!(matches!(
            validator.check(b"GIF89a"),
            Err(UploadError::InvalidFormat { detected: "image/gif" })
        ));
        assert!(matches!(
            validator.check(b"plain text"),
            Err(UploadError::InvalidFormat { detected: "unknown" })
        ));
    }

    #[test]
    fn test_unknown_never_allowed() {
        let validator = UploadValidator::new(vec![ImageFormat::Unknown], MIB);
        assert!(!validator.is_allowed(ImageFormat::Unknown));
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let validator = UploadValidator::default();
        let mut bytes = PNG_HEADER.to_vec();
        bytes.resize(60 * MIB, 0);

        match validator.check(&bytes) {
            Err(UploadError::TooLarge { size, max }) => {
                assert_eq!(size, 60 * MIB);
                assert_eq!(max, 50 * MIB);
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_at_limit_is_accepted() {
        let validator = UploadValidator::new(vec![ImageFormat::Png], 16);
        let mut bytes = PNG_HEADER.to_vec();
        bytes.resize(16, 0);
        assert!(validator.check(&bytes).is_ok());
        bytes.push(0);
        assert!(validator.check(&bytes).is_err());
    }

    #[test]
    fn test_malformed_envelope_fails_fast() {
        let validator = UploadValidator::default();
        assert!(matches!(
            validator.validate("not a data uri"),
            Err(UploadError::MalformedEncoding(_))
        ));
    }
}
