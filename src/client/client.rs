//! # Client Core
//!
//! This module contains the minimal core client that performs ONE upload
//! attempt: post a [`CapturePayload`] to `POST /upload` and classify the
//! outcome.
//!
//! ## Design Philosophy
//!
//! The core is stateless. It does not handle:
//! - Ordering
//! - Retry delays
//! - Status reporting
//!
//! Those concerns belong to the [`UploadQueue`](super::middleware::UploadQueue),
//! which talks to the core through the [`Transport`] trait so tests can swap
//! in a scripted server.

use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use thiserror::Error;

use crate::common::messages::{CapturePayload, MessageResponse, UploadResponse};

/// Why a single upload attempt did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The server could not be reached or the connection broke mid-request.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The server answered with a non-success status.
    #[error("server rejected upload ({status}): {message}")]
    ServerRejected { status: u16, message: String },
}

impl DeliveryError {
    /// Whether trying the same payload again could succeed.
    ///
    /// Network failures, 5xx, 408 and 429 are transient; any other 4xx means
    /// the payload itself was refused.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::NetworkFailure(_) => true,
            DeliveryError::ServerRejected { status, .. } => {
                *status >= 500
                    || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::NetworkFailure(_) => None,
            DeliveryError::ServerRejected { status, .. } => Some(*status),
        }
    }

    /// Short label used in metrics.
    pub fn reason(&self) -> String {
        match self {
            DeliveryError::NetworkFailure(_) => "network".to_string(),
            DeliveryError::ServerRejected { status, .. } => format!("http_{}", status),
        }
    }
}

/// One upload attempt against some server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &CapturePayload) -> Result<UploadResponse, DeliveryError>;
}

/// HTTP implementation of [`Transport`].
pub struct UploadClient {
    http: reqwest::Client,
    endpoint: String,
}

impl UploadClient {
    /// # Arguments
    ///
    /// * `server_url` - Base URL of the photobooth server, e.g. `http://127.0.0.1:3000`
    pub fn new(server_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/upload", server_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for UploadClient {
    async fn send(&self, payload: &CapturePayload) -> Result<UploadResponse, DeliveryError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DeliveryError::NetworkFailure(e.to_string()))?;

        if status.is_success() {
            // Any 2xx counts as delivered, even if the body is not what we expect
            let saved = serde_json::from_slice::<UploadResponse>(&body).unwrap_or_else(|e| {
                debug!("Unexpected upload response body: {}", e);
                UploadResponse {
                    message: String::new(),
                    filename: String::new(),
                }
            });
            return Ok(saved);
        }

        let message = serde_json::from_slice::<MessageResponse>(&body)
            .map(|m| m.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());

        Err(DeliveryError::ServerRejected {
            status: status.as_u16(),
            message,
        })
    }
}
