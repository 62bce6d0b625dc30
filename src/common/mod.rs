//! # Common Components
//!
//! Shared utilities and data structures used by both client and server components.
//!
//! ## Modules
//!
//! - [`messages`]: JSON bodies exchanged between the upload queue and the server
//! - [`error`]: Classified upload errors and their HTTP mapping
//! - [`config`]: Configuration parsing utilities

pub mod config;
pub mod error;
pub mod messages;
