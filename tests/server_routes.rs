//! HTTP surface tests: the full router driven in-process with `oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use photobooth::processing::{EncodedImage, ImageFormat};
use photobooth::server::config::StorageConfig;
use photobooth::server::{ServerConfig, ServerMiddleware};

const MIB: usize = 1024 * 1024;
const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

struct TestServer {
    root: TempDir,
    app: Router,
}

impl TestServer {
    async fn start(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let root = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.server.static_dir = root.path().join("public");
        config.storage = StorageConfig {
            upload_dir: root.path().join("uploads"),
            thumbnail_dir: root.path().join("uploads/thumbnails"),
            overlay_dir: root.path().join("overlays"),
        };
        configure(&mut config);

        let middleware = ServerMiddleware::new(config);
        middleware.endpoint().store().provision().await.unwrap();
        let app = middleware.router();
        Self { root, app }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, headers, value)
    }

    async fn upload(&self, body: Value) -> (StatusCode, Value) {
        let (status, _, value) = self.send(upload_request(body, "203.0.113.9")).await;
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    fn files_in(&self, dir: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.root.path().join(dir))
            .unwrap()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().unwrap().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn upload_request(body: Value, ip: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, "Mozilla/5.0 (Linux; Android 14; Pixel 8)")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn png_data_url() -> String {
    EncodedImage::encode(ImageFormat::Png, &PNG_MAGIC).to_string()
}

#[tokio::test]
async fn test_upload_saves_capture() {
    let server = TestServer::start(|_| {}).await;

    let (status, body) = server
        .upload(json!({ "image": png_data_url(), "width": 1920, "height": 1080 }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Saved successfully");
    let filename = body["filename"].as_str().unwrap();
    assert!(filename.starts_with("capture_") && filename.ends_with(".png"));
    assert_eq!(server.files_in("uploads"), vec![filename.to_string()]);
    assert_eq!(
        std::fs::read(server.root.path().join("uploads").join(filename)).unwrap(),
        PNG_MAGIC
    );
}

#[tokio::test]
async fn test_upload_rejections() {
    let server = TestServer::start(|config| config.limits.max_file_size_mb = 1).await;

    let pdf = format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(b"%PDF-1.7")
    );
    let mut oversized = PNG_MAGIC.to_vec();
    oversized.resize(MIB + 1, 0);

    let cases = [
        (json!({}), "Invalid input data."),
        (json!({ "image": 42 }), "Invalid input data."),
        (json!({ "image": "not a data url" }), "Invalid image format."),
        (json!({ "image": pdf }), "Invalid file type detected."),
        (
            json!({ "image": EncodedImage::encode(ImageFormat::Png, &oversized).to_string() }),
            "Image too large.",
        ),
    ];

    for (body, message) in cases {
        let (status, reply) = server.upload(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", message);
        assert_eq!(reply["message"], message);
    }
    assert!(server.files_in("uploads").is_empty());
}

#[tokio::test]
async fn test_body_over_transport_limit_is_too_large() {
    let server = TestServer::start(|config| config.limits.max_file_size_mb = 1).await;

    let mut huge = PNG_MAGIC.to_vec();
    huge.resize(2 * MIB, 0);
    let (status, reply) = server
        .upload(json!({ "image": EncodedImage::encode(ImageFormat::Png, &huge).to_string() }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Image too large.");
}

#[tokio::test]
async fn test_non_json_body_is_invalid_input() {
    let server = TestServer::start(|_| {}).await;

    let (status, _, reply) = server
        .send(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["message"], "Invalid input data.");
}

#[tokio::test]
async fn test_thumbnail_handling() {
    let server = TestServer::start(|_| {}).await;
    let jpeg = [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43];

    let (status, body) = server
        .upload(json!({
            "image": png_data_url(),
            "thumbnail": EncodedImage::encode(ImageFormat::Jpeg, &jpeg).to_string(),
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let stem = body["filename"].as_str().unwrap().trim_end_matches(".png");
    assert_eq!(server.files_in("uploads/thumbnails"), vec![format!("{}_thumb.jpg", stem)]);

    // A broken thumbnail never fails the main upload
    let (status, _) = server
        .upload(json!({ "image": png_data_url(), "thumbnail": "data:image/jpeg;base64" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(server.files_in("uploads").len(), 2);
    assert_eq!(server.files_in("uploads/thumbnails").len(), 1);
}

#[tokio::test]
async fn test_gallery_lists_captures_oldest_first() {
    let server = TestServer::start(|_| {}).await;

    let (_, first) = server.upload(json!({ "image": png_data_url() })).await;
    let (_, second) = server.upload(json!({ "image": png_data_url() })).await;

    let (status, _, gallery) = server.get("/gallery-data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gallery, json!([first["filename"], second["filename"]]));
}

#[tokio::test]
async fn test_stored_capture_is_served() {
    let server = TestServer::start(|_| {}).await;
    let (_, saved) = server.upload(json!({ "image": png_data_url() })).await;

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/uploads/{}", saved["filename"].as_str().unwrap()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], &PNG_MAGIC[..]);
}

#[tokio::test]
async fn test_overlays_list_filters_non_images() {
    let server = TestServer::start(|_| {}).await;
    let overlays = server.root.path().join("overlays");
    std::fs::write(overlays.join("frame.png"), PNG_MAGIC).unwrap();
    std::fs::write(overlays.join("notes.txt"), b"hello").unwrap();
    std::fs::create_dir(overlays.join("nested.png")).unwrap();

    let (status, _, list) = server.get("/overlays-list").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!(["frame.png"]));
}

#[tokio::test]
async fn test_my_ip_uses_forwarded_for() {
    let server = TestServer::start(|_| {}).await;

    let (status, _, body) = server
        .send(
            Request::builder()
                .uri("/my-ip")
                .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ip": "198.51.100.4" }));
}

#[tokio::test]
async fn test_upload_rate_limit() {
    let server = TestServer::start(|config| config.rate_limit.uploads_per_minute = 2).await;

    for _ in 0..2 {
        let (status, _, _) = server.send(upload_request(json!({}), "192.0.2.1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let (status, headers, body) = server.send(upload_request(json!({}), "192.0.2.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["message"], "Too many uploads, please try again later.");
    assert!(headers.contains_key(header::RETRY_AFTER));

    // Limits are per client
    let (status, _, _) = server.send(upload_request(json!({}), "192.0.2.2")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_global_rate_limit() {
    let server = TestServer::start(|config| config.rate_limit.max_requests = 2).await;

    let (status, headers, _) = server.get("/my-ip").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["ratelimit-limit"], "2");
    assert_eq!(headers["ratelimit-remaining"], "1");

    server.get("/gallery-data").await;
    let (status, _, body) = server.get("/overlays-list").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["message"], "Too many requests, please try again later.");
}

#[tokio::test]
async fn test_security_headers() {
    let server = TestServer::start(|_| {}).await;

    let (_, headers, _) = server.get("/gallery-data").await;
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
    assert_eq!(headers[header::REFERRER_POLICY], "no-referrer");
}
