//! # Format Sniffing
//!
//! Determines an image's real format from its leading bytes. The declared
//! type in an upload envelope is advisory only; this module is the single
//! authority for "what is this file".
//!
//! ## Signatures
//!
//! | Format | Offset | Bytes |
//! |--------|--------|-------|
//! | PNG    | 0      | `89 50 4E 47 0D 0A 1A 0A` |
//! | JPEG   | 0      | `FF D8 FF` followed by `E0`, `E1`, `E2`, `E3` or `E8` |
//! | GIF    | 0      | `GIF8` |
//! | WEBP   | 0, 8   | `RIFF` ... `WEBP` |

use serde::{Deserialize, Serialize};
use std::fmt;

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const JPEG_MARKERS: [u8; 5] = [0xE0, 0xE1, 0xE2, 0xE3, 0xE8];
const GIF_MAGIC: &[u8; 4] = b"GIF8";
const RIFF_MAGIC: &[u8; 4] = b"RIFF";
const WEBP_MAGIC: &[u8; 4] = b"WEBP";

/// Shortest signature we can match on.
const MIN_SIGNATURE_LEN: usize = 4;

/// Image formats recognised by the sniffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Unknown,
}

impl ImageFormat {
    /// Every format that can actually be stored.
    pub const KNOWN: [ImageFormat; 4] = [
        ImageFormat::Png,
        ImageFormat::Jpeg,
        ImageFormat::Gif,
        ImageFormat::Webp,
    ];

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Unknown => "unknown",
        }
    }

    /// File extension used when persisting (`jpeg` is stored as `.jpg`).
    ///
    /// `None` for [`ImageFormat::Unknown`], which is never stored.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            ImageFormat::Png => Some("png"),
            ImageFormat::Jpeg => Some("jpg"),
            ImageFormat::Gif => Some("gif"),
            ImageFormat::Webp => Some("webp"),
            ImageFormat::Unknown => None,
        }
    }

    /// Subtype as written in a `data:image/<tag>` prefix.
    pub fn mime_tag(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Unknown => "unknown",
        }
    }

    /// Map a declared mime subtype (`png`, `jpeg`, `jpg`, ...) to a format.
    pub fn from_mime_tag(tag: &str) -> ImageFormat {
        match tag.to_ascii_lowercase().as_str() {
            "png" => ImageFormat::Png,
            "jpeg" | "jpg" => ImageFormat::Jpeg,
            "gif" => ImageFormat::Gif,
            "webp" => ImageFormat::Webp,
            _ => ImageFormat::Unknown,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Detect the real format of `bytes` from its magic number.
///
/// Returns [`ImageFormat::Unknown`] for buffers shorter than the shortest
/// signature or with no matching signature.
pub fn sniff(bytes: &[u8]) -> ImageFormat {
    if bytes.len() < MIN_SIGNATURE_LEN {
        return ImageFormat::Unknown;
    }

    if bytes.starts_with(&PNG_MAGIC) {
        return ImageFormat::Png;
    }
    if bytes.starts_with(&JPEG_SOI) && JPEG_MARKERS.contains(&bytes[3]) {
        return ImageFormat::Jpeg;
    }
    if bytes.starts_with(GIF_MAGIC) {
        return ImageFormat::Gif;
    }
    if bytes.starts_with(RIFF_MAGIC) && bytes.get(8..12) == Some(&WEBP_MAGIC[..]) {
        return ImageFormat::Webp;
    }

    ImageFormat::Unknown
}
