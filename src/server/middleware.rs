//! # Server Middleware - HTTP Surface
//!
//! The middleware layer wraps the [`UploadEndpoint`] with everything that is
//! not capture ingestion itself:
//!
//! ## Responsibilities
//!
//! ### 1. Admission Control
//! - Global fixed-window limit per client on every route
//! - Tighter per-minute limit on `POST /upload`
//! - Hard timeout on upload requests
//!
//! ### 2. Client Identification
//! - Resolves the client address from proxy headers or the socket peer
//! - Classifies the User-Agent OS for upload logs
//!
//! ### 3. Routing
//! - `POST /upload`, `GET /gallery-data`, `GET /overlays-list`, `GET /my-ip`
//! - Static files for `/uploads`, `/overlays` and the frontend
//!
//! ## Layer Order
//!
//! ```text
//! security headers -> global limit -> [upload limit -> timeout -> body limit] -> handler
//! ```

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Extension, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;

use super::config::ServerConfig;
use super::rate_limit::{Admission, RateLimiter};
use super::server::{UploadContext, UploadEndpoint};
use super::store::PersistenceStore;
use crate::common::error::UploadError;
use crate::common::messages::{IpResponse, MessageResponse, UploadRequest};
use crate::processing::validation::UploadValidator;

const TOO_MANY_REQUESTS: &str = "Too many requests, please try again later.";
const TOO_MANY_UPLOADS: &str = "Too many uploads, please try again later.";
const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");

/// Resolved client address, inserted by the global admission layer.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    endpoint: Arc<UploadEndpoint>,
    global_limiter: Arc<RateLimiter>,
    upload_limiter: Arc<RateLimiter>,
    trust_proxy: bool,
}

/// Server middleware that owns the configuration and the upload endpoint.
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────┐
/// │      ServerMiddleware               │
/// │  (Routing, Limits, Static Files)    │
/// │                                     │
/// │  ┌───────────────────────────────┐  │
/// │  │       UploadEndpoint          │  │
/// │  │  (Validate + Persist Only)    │  │
/// │  └───────────────────────────────┘  │
/// └─────────────────────────────────────┘
/// ```
pub struct ServerMiddleware {
    config: ServerConfig,
    endpoint: Arc<UploadEndpoint>,
}

impl ServerMiddleware {
    /// Create the middleware and its endpoint from configuration.
    ///
    /// Storage directories are not touched until [`run`](Self::run) or
    /// [`serve`](Self::serve).
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(PersistenceStore::new(&config.storage));
        let validator = UploadValidator::from_limits(&config.limits);
        let endpoint = Arc::new(UploadEndpoint::new(validator, store));
        Self { config, endpoint }
    }

    pub fn endpoint(&self) -> &Arc<UploadEndpoint> {
        &self.endpoint
    }

    /// Build the complete router.
    pub fn router(&self) -> Router {
        let limits = &self.config.rate_limit;
        let state = AppState {
            endpoint: Arc::clone(&self.endpoint),
            global_limiter: Arc::new(RateLimiter::new(
                limits.max_requests,
                Duration::from_secs(limits.window_secs),
            )),
            upload_limiter: Arc::new(RateLimiter::new(
                limits.uploads_per_minute,
                Duration::from_secs(60),
            )),
            trust_proxy: limits.trust_proxy,
        };

        let upload_routes = Router::new()
            .route("/upload", post(upload_handler))
            .layer(DefaultBodyLimit::max(self.config.body_limit_bytes()))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.limits.upload_timeout_secs,
            )))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                upload_rate_limit,
            ));

        let store = self.endpoint.store();
        Router::new()
            .route("/overlays-list", get(overlays_list))
            .route("/gallery-data", get(gallery_data))
            .route("/my-ip", get(my_ip))
            .merge(upload_routes)
            .nest_service("/uploads", ServeDir::new(store.upload_dir()))
            .nest_service("/overlays", ServeDir::new(store.overlay_dir()))
            .fallback_service(ServeDir::new(&self.config.server.static_dir))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                global_rate_limit,
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("SAMEORIGIN"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::REFERRER_POLICY,
                HeaderValue::from_static("no-referrer"),
            ))
            .with_state(state)
    }

    /// Provision storage, bind the configured address and serve forever.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.address).await?;
        self.serve(listener).await
    }

    /// Provision storage and serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.endpoint.store().provision().await?;

        info!("---------------------------------------------------");
        info!("📸 Photobooth server running at {}", listener.local_addr()?);
        info!("---------------------------------------------------");

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// ADMISSION CONTROL
// ============================================================================

async fn global_rate_limit(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = resolve_client_ip(req.headers(), peer, state.trust_proxy);

    match state.global_limiter.check(&ip).await {
        Admission::Limited { retry_after } => {
            warn!("⛔ Rate limited {} on {}", ip, req.uri().path());
            limited_response(TOO_MANY_REQUESTS, retry_after)
        }
        Admission::Allowed { remaining } => {
            req.extensions_mut().insert(ClientIp(ip));
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert(RATELIMIT_LIMIT, HeaderValue::from(state.global_limiter.limit()));
            headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
            response
        }
    }
}

async fn upload_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = req
        .extensions()
        .get::<ClientIp>()
        .map(|ClientIp(ip)| ip.clone())
        .unwrap_or_else(|| "unknown".to_string());

    match state.upload_limiter.check(&ip).await {
        Admission::Limited { retry_after } => {
            warn!("⛔ Upload rate limit hit by {}", ip);
            limited_response(TOO_MANY_UPLOADS, retry_after)
        }
        Admission::Allowed { .. } => next.run(req).await,
    }
}

fn limited_response(message: &str, retry_after: Duration) -> Response {
    let mut response = message_response(StatusCode::TOO_MANY_REQUESTS, message);
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(retry_after.as_secs().max(1)),
    );
    response
}

fn message_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(MessageResponse {
            message: message.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn upload_handler(
    State(state): State<AppState>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    headers: HeaderMap,
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> Response {
    let ctx = UploadContext {
        client_ip,
        os: parse_user_agent(headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok())),
    };

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            warn!("🚫 [UPLOAD REJECTED] IP: {} | body over limit", ctx.client_ip);
            return message_response(StatusCode::BAD_REQUEST, "Image too large.");
        }
        Err(rejection) => {
            warn!("🚫 [UPLOAD REJECTED] IP: {} | {}", ctx.client_ip, rejection.body_text());
            return error_response(&UploadError::InvalidInput);
        }
    };

    match state.endpoint.handle(request, &ctx).await {
        Ok(saved) => (StatusCode::OK, Json(saved)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &UploadError) -> Response {
    message_response(error.status_code(), error.public_message())
}

async fn overlays_list(State(state): State<AppState>) -> Json<Vec<String>> {
    match state.endpoint.store().list_overlays().await {
        Ok(names) => Json(names),
        Err(e) => {
            warn!("Failed to list overlays: {}", e);
            Json(Vec::new())
        }
    }
}

/// Oldest capture first; the gallery reverses it for display.
async fn gallery_data(State(state): State<AppState>) -> Json<Vec<String>> {
    match state.endpoint.store().list_oldest_first().await {
        Ok(names) => Json(names),
        Err(e) => {
            warn!("Failed to list gallery: {}", e);
            Json(Vec::new())
        }
    }
}

async fn my_ip(Extension(ClientIp(ip)): Extension<ClientIp>) -> Json<IpResponse> {
    Json(IpResponse { ip })
}

// ============================================================================
// CLIENT IDENTIFICATION
// ============================================================================

/// Resolve the client address.
///
/// With `trust_proxy`, the first `X-Forwarded-For` entry wins, then
/// `X-Real-IP`. Otherwise, or when neither is present, the socket peer.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded.or(real_ip) {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Coarse OS classification of a User-Agent string, for logs.
pub fn parse_user_agent(user_agent: Option<&str>) -> &'static str {
    let Some(ua) = user_agent else {
        return "Unknown";
    };

    if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        "iOS"
    } else if ua.contains("Mac OS") {
        "macOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Unknown OS"
    }
}
