pub mod client;
pub mod common;
pub mod processing;
pub mod server;

pub use client::{UploadClient, UploadQueue};
pub use common::messages::CapturePayload;
pub use server::{PersistenceStore, UploadEndpoint};
