//! # Image Processing
//!
//! Everything that looks at image bytes:
//!
//! - [`sniff`]: detects the real format from magic numbers
//! - [`envelope`]: parses and builds `data:image/<tag>;base64,<payload>` strings
//! - [`validation`]: the allow-list and size checks applied before any write
//! - [`capture`]: client-side overlay compositing and thumbnail generation

pub mod capture;
pub mod envelope;
pub mod sniff;
pub mod validation;

// Re-export main functions for convenience
pub use envelope::EncodedImage;
pub use sniff::{sniff, ImageFormat};
pub use validation::{UploadValidator, ValidatedImage};
