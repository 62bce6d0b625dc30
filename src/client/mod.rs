//! # Client Components
//!
//! The client is split into two main components:
//!
//! ## Core Client ([`client`])
//! Performs exactly one upload attempt and classifies the outcome.
//!
//! ## Client Middleware ([`middleware`])
//! Manages all delivery concerns:
//! - FIFO ordering with a single request in flight
//! - Retry logic (fixed delays, longer for network failures)
//! - Permanent rejection handling
//! - Status reporting
//!
//! ## Metrics ([`metrics`])
//! Per-attempt latency and failure records, exportable as JSON.

pub mod client;
pub mod metrics;
pub mod middleware;

// Re-export for convenience
pub use client::{DeliveryError, Transport, UploadClient};
pub use metrics::DeliveryMetrics;
pub use middleware::{ClientConfig, RetryPolicy, UploadQueue, UploadSettings, UploadStatus};
