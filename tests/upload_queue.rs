//! Upload queue behaviour against a scripted in-process server.
//!
//! Every test runs with Tokio time paused, so retry delays elapse instantly
//! but in order.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use photobooth::client::{
    DeliveryError, DeliveryMetrics, RetryPolicy, Transport, UploadQueue, UploadSettings,
    UploadStatus,
};
use photobooth::common::messages::{CapturePayload, UploadResponse};
use photobooth::processing::{EncodedImage, ImageFormat};

const LATENCY: Duration = Duration::from_millis(100);

struct Call {
    capture: u32,
    at: Instant,
}

#[derive(Default)]
struct ServerState {
    /// Outcome of each upcoming request; `None` means success
    script: VecDeque<Option<DeliveryError>>,
    calls: Vec<Call>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Fake server that answers from a script and records every request.
#[derive(Clone, Default)]
struct ScriptedServer {
    state: Arc<Mutex<ServerState>>,
}

impl ScriptedServer {
    fn with_script(script: Vec<Option<DeliveryError>>) -> Self {
        let server = Self::default();
        server.state.lock().unwrap().script = script.into();
        server
    }

    fn calls(&self) -> Vec<u32> {
        self.state.lock().unwrap().calls.iter().map(|c| c.capture).collect()
    }

    fn call_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().calls.iter().map(|c| c.at).collect()
    }

    fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }
}

#[async_trait]
impl Transport for ScriptedServer {
    async fn send(&self, payload: &CapturePayload) -> Result<UploadResponse, DeliveryError> {
        let capture = payload.width.unwrap_or_default();
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.calls.push(Call {
                capture,
                at: Instant::now(),
            });
            state.script.pop_front().flatten()
        };

        sleep(LATENCY).await;
        self.state.lock().unwrap().in_flight -= 1;

        match outcome {
            None => Ok(UploadResponse {
                message: "Saved successfully".to_string(),
                filename: format!("capture_{}.png", capture),
            }),
            Some(error) => Err(error),
        }
    }
}

/// Payload tagged with `id` in its width field.
fn payload(id: u32) -> CapturePayload {
    CapturePayload {
        image: EncodedImage::encode(ImageFormat::Png, &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
        thumbnail: None,
        width: Some(id),
        height: Some(1),
    }
}

fn server_error(status: u16) -> Option<DeliveryError> {
    Some(DeliveryError::ServerRejected {
        status,
        message: "failed".to_string(),
    })
}

fn network_error() -> Option<DeliveryError> {
    Some(DeliveryError::NetworkFailure("connection refused".to_string()))
}

fn transient_only() -> UploadSettings {
    UploadSettings {
        retry_policy: RetryPolicy::Transient,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_delivers_in_order_one_at_a_time() {
    let server = ScriptedServer::default();
    let queue = UploadQueue::spawn(server.clone(), UploadSettings::default());

    for id in 1..=3 {
        queue.enqueue(payload(id)).unwrap();
    }
    queue.flush().await.unwrap();

    assert_eq!(server.calls(), vec![1, 2, 3]);
    assert_eq!(server.max_in_flight(), 1);
    assert!(queue.rejected().await.unwrap().is_empty());
    assert!(queue.shutdown().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_during_upload_waits_its_turn() {
    let server = ScriptedServer::default();
    let queue = UploadQueue::spawn(server.clone(), UploadSettings::default());

    queue.enqueue(payload(1)).unwrap();
    sleep(LATENCY / 2).await;
    queue.enqueue(payload(2)).unwrap();
    queue.enqueue(payload(3)).unwrap();
    queue.flush().await.unwrap();

    assert_eq!(server.calls(), vec![1, 2, 3]);
    assert_eq!(server.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_failures_retry_after_delay() {
    let server = ScriptedServer::with_script(vec![server_error(500), server_error(503)]);
    let queue = UploadQueue::spawn(server.clone(), UploadSettings::default());

    queue.enqueue(payload(1)).unwrap();
    queue.enqueue(payload(2)).unwrap();
    queue.flush().await.unwrap();

    // N failures then success: N + 1 attempts for the head, then the next one
    assert_eq!(server.calls(), vec![1, 1, 1, 2]);

    let times = server.call_times();
    for pair in times[..3].windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= LATENCY + Duration::from_millis(2000), "gap {:?}", gap);
        assert!(gap < LATENCY + Duration::from_millis(2100), "gap {:?}", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn test_network_failures_wait_longer() {
    let server = ScriptedServer::with_script(vec![network_error()]);
    let queue = UploadQueue::spawn(server.clone(), UploadSettings::default());

    queue.enqueue(payload(1)).unwrap();
    queue.flush().await.unwrap();

    assert_eq!(server.calls(), vec![1, 1]);
    let times = server.call_times();
    assert!(times[1] - times[0] >= LATENCY + Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_rejection_does_not_block_queue() {
    let server = ScriptedServer::with_script(vec![server_error(400)]);
    let queue = UploadQueue::spawn(server.clone(), transient_only());

    let first = queue.enqueue(payload(1)).unwrap();
    queue.enqueue(payload(2)).unwrap();
    queue.flush().await.unwrap();

    assert_eq!(server.calls(), vec![1, 2]);

    let rejected = queue.rejected().await.unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].id, first);
    assert_eq!(rejected[0].attempts, 1);
    assert_eq!(rejected[0].error.status(), Some(400));
    assert_eq!(rejected[0].payload.width, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_upload_is_retried() {
    let server = ScriptedServer::with_script(vec![server_error(429)]);
    let queue = UploadQueue::spawn(server.clone(), transient_only());

    queue.enqueue(payload(1)).unwrap();
    queue.flush().await.unwrap();

    assert_eq!(server.calls(), vec![1, 1]);
    assert!(queue.rejected().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_default_policy_retries_client_errors_in_place() {
    let server = ScriptedServer::with_script(vec![server_error(400), server_error(404)]);
    let queue = UploadQueue::spawn(server.clone(), UploadSettings::default());

    queue.enqueue(payload(1)).unwrap();
    queue.enqueue(payload(2)).unwrap();
    queue.flush().await.unwrap();

    // Two refusals then success: three requests for the head, never skipped
    assert_eq!(server.calls(), vec![1, 1, 1, 2]);
    let times = server.call_times();
    for pair in times[..3].windows(2) {
        assert!(pair[1] - pair[0] >= LATENCY + Duration::from_millis(2000));
    }
    assert!(queue.rejected().await.unwrap().is_empty());
    assert_eq!(queue.status(), UploadStatus::Synced);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_drain_reports_failure() {
    let server = ScriptedServer::with_script(vec![None, server_error(400)]);
    let queue = UploadQueue::spawn(server.clone(), transient_only());

    queue.enqueue(payload(1)).unwrap();
    queue.enqueue(payload(2)).unwrap();
    queue.flush().await.unwrap();

    assert_eq!(queue.status(), UploadStatus::Failed(1));
    assert_eq!(queue.status().to_string(), "Failed 1");

    // Stays visible instead of clearing like Synced
    sleep(Duration::from_millis(5000)).await;
    assert_eq!(queue.status(), UploadStatus::Failed(1));

    // The next clean drain is reported as a sync again
    queue.enqueue(payload(3)).unwrap();
    queue.flush().await.unwrap();
    assert_eq!(queue.status(), UploadStatus::Synced);
    assert_eq!(server.calls(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_status_transitions() {
    let server = ScriptedServer::with_script(vec![server_error(500)]);
    let queue = UploadQueue::spawn(server.clone(), UploadSettings::default());
    assert_eq!(queue.status(), UploadStatus::Idle);

    queue.enqueue(payload(1)).unwrap();
    queue.enqueue(payload(2)).unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(queue.status(), UploadStatus::Uploading(2));

    // First attempt failed at 100ms; waiting out the retry delay
    sleep(Duration::from_millis(500)).await;
    assert_eq!(queue.status(), UploadStatus::Pending(2));
    assert_eq!(queue.status().to_string(), "Pending 2");

    queue.flush().await.unwrap();
    assert_eq!(queue.status(), UploadStatus::Synced);

    sleep(Duration::from_millis(2500)).await;
    assert_eq!(queue.status(), UploadStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_returns_undelivered_in_order() {
    let server = ScriptedServer::with_script(vec![network_error(); 10]);
    let queue = UploadQueue::spawn(server.clone(), UploadSettings::default());

    queue.enqueue(payload(1)).unwrap();
    queue.enqueue(payload(2)).unwrap();
    sleep(Duration::from_millis(50)).await;

    let remaining = queue.shutdown().await.unwrap();
    let ids: Vec<_> = remaining.iter().map(|p| p.width).collect();
    assert_eq!(ids, vec![Some(1), Some(2)]);
    assert_eq!(server.calls(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_are_recorded_in_metrics() {
    let server = ScriptedServer::with_script(vec![server_error(500)]);
    let metrics = Arc::new(Mutex::new(DeliveryMetrics::new("Booth".to_string())));
    let queue = UploadQueue::spawn_with_metrics(
        server,
        UploadSettings::default(),
        Some(Arc::clone(&metrics)),
    );

    queue.enqueue(payload(1)).unwrap();
    queue.flush().await.unwrap();

    let stats = metrics.lock().unwrap().aggregate();
    assert_eq!(stats.total_attempts, 2);
    assert_eq!(stats.captures_delivered, 1);
    assert_eq!(stats.max_attempts_per_capture, 2);
    assert_eq!(stats.failure_reasons.get("http_500"), Some(&1));
}
