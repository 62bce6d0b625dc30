use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::processing::validation::LimitsConfig;

/// Complete server configuration loaded from TOML file.
///
/// # Example TOML
///
/// ```toml
/// [server]
/// address = "0.0.0.0:3000"
/// static_dir = "public"
///
/// [storage]
/// upload_dir = "uploads"
/// thumbnail_dir = "uploads/thumbnails"
/// overlay_dir = "overlays"
///
/// [limits]
/// max_file_size_mb = 50
/// allowed_types = ["png", "jpeg", "gif", "webp"]
/// upload_timeout_secs = 60
///
/// [rate_limit]
/// window_secs = 900
/// max_requests = 1000
/// uploads_per_minute = 20
/// trust_proxy = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerInfo,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Listen address
    pub address: String,
    /// Directory served for every path no route claims (the booth frontend)
    pub static_dir: PathBuf,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:3000".to_string(),
            static_dir: PathBuf::from("public"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub overlay_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            thumbnail_dir: PathBuf::from("uploads/thumbnails"),
            overlay_dir: PathBuf::from("overlays"),
        }
    }
}

/// Admission control applied before the upload endpoint runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Length of the global window
    pub window_secs: u64,
    /// Requests allowed per client per global window
    pub max_requests: u32,
    /// Uploads allowed per client per minute
    pub uploads_per_minute: u32,
    /// Take the client address from `X-Forwarded-For`
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_requests: 1000,
            uploads_per_minute: 20,
            trust_proxy: true,
        }
    }
}

impl ServerConfig {
    /// Body limit for `POST /upload`. Base64 inflates by 4/3, so twice the
    /// decoded maximum lets oversized images reach the size check.
    pub fn body_limit_bytes(&self) -> usize {
        self.limits.max_file_size_bytes().saturating_mul(2)
    }
}
