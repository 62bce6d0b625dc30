//! # Client Middleware - Upload Queue
//!
//! This module contains the delivery engine that sits between the capture
//! pipeline and the server.
//!
//! ## Responsibilities
//!
//! The [`UploadQueue`] owns an ordered, in-memory queue of captures:
//! - **Ordering**: captures are delivered strictly FIFO
//! - **Single-flight**: at most one upload request is outstanding at any time
//! - **Retry Logic**: a failing head is retried in place after a delay, longer
//!   for network failures than for server rejections, until it is delivered
//! - **Failure Classification**: with [`RetryPolicy::Transient`], permanent
//!   rejections (4xx other than 408/429) are dropped into a rejected list
//!   instead of blocking the queue
//! - **Status Reporting**: every transition publishes an [`UploadStatus`]
//!
//! ## Architecture
//!
//! The queue state is owned by a single worker task. The [`UploadQueue`]
//! handle only sends commands over a channel, so new captures arriving while a
//! request is in flight just grow the tail; they can never start a second
//! request.
//!
//! ## State Machine
//!
//! ```text
//!            enqueue                    success, queue empty
//!   Idle ─────────────────► Sending ──────────────────────────► Synced ──(display)──► Idle
//!     ▲                      │   ▲
//!     │                      │   │ delay elapsed
//!     │       failure        ▼   │
//!     │                   Pending(n)
//!     └──────────────────────────────── (success/rejection, queue non-empty → Sending)
//! ```
//!
//! A drain that dropped captures ends in `Failed(n)` instead of `Synced` and
//! stays there until the next capture is queued.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let queue = UploadQueue::spawn(UploadClient::new(&config.client.server_url), config.upload);
//! queue.enqueue(payload)?;
//! queue.flush().await?;
//! ```

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use uuid::Uuid;

use super::client::{DeliveryError, Transport};
use super::metrics::DeliveryMetrics;
use crate::common::messages::{CapturePayload, UploadResponse};
use crate::processing::capture::ThumbnailConfig;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Client configuration loaded from TOML file.
///
/// # Example TOML
///
/// ```toml
/// [client]
/// name = "Booth1"
/// server_url = "http://127.0.0.1:3000"
///
/// [upload]
/// retry_delay_ms = 2000
/// network_retry_delay_ms = 3000
/// synced_display_ms = 2000
/// retry_policy = "always"
///
/// [thumbnail]
/// enabled = true
/// width = 320
/// quality = 60
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client: ClientInfo,
    pub upload: UploadSettings,
    pub thumbnail: ThumbnailConfig,
}

/// Client identity and server location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    /// Name used in logs and metrics
    pub name: String,
    /// Base URL of the photobooth server
    pub server_url: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "Booth".to_string(),
            server_url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Which failures the queue retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Retry every failure forever. A payload the server always refuses
    /// blocks the queue behind it.
    #[default]
    Always,
    /// Retry network failures, 5xx, 408 and 429; drop other rejections.
    Transient,
}

/// Delivery timing and retry behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Wait before retrying after the server answered with a failure
    pub retry_delay_ms: u64,
    /// Wait before retrying after the server could not be reached
    pub network_retry_delay_ms: u64,
    /// How long `Synced` is shown before the status clears
    pub synced_display_ms: u64,
    pub retry_policy: RetryPolicy,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            retry_delay_ms: 2000,
            network_retry_delay_ms: 3000,
            synced_display_ms: 2000,
            retry_policy: RetryPolicy::Always,
        }
    }
}

impl UploadSettings {
    pub fn should_retry(&self, error: &DeliveryError) -> bool {
        match self.retry_policy {
            RetryPolicy::Always => true,
            RetryPolicy::Transient => error.is_transient(),
        }
    }

    pub fn retry_delay(&self, error: &DeliveryError) -> Duration {
        match error {
            DeliveryError::NetworkFailure(_) => Duration::from_millis(self.network_retry_delay_ms),
            DeliveryError::ServerRejected { .. } => Duration::from_millis(self.retry_delay_ms),
        }
    }

    fn synced_display(&self) -> Duration {
        Duration::from_millis(self.synced_display_ms)
    }
}

// ============================================================================
// PUBLIC TYPES
// ============================================================================

/// Aggregate queue state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    /// Nothing queued, nothing to show
    #[default]
    Idle,
    /// The head is in flight; `n` captures queued including it
    Uploading(usize),
    /// `n` captures queued, none in flight (waiting out a retry delay)
    Pending(usize),
    /// The queue just drained
    Synced,
    /// The queue drained but `n` captures were rejected on the way
    Failed(usize),
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Idle => Ok(()),
            UploadStatus::Uploading(n) => write!(f, "Uploading ({})", n),
            UploadStatus::Pending(n) => write!(f, "Pending {}", n),
            UploadStatus::Synced => f.write_str("Synced"),
            UploadStatus::Failed(n) => write!(f, "Failed {}", n),
        }
    }
}

/// A capture the server refused permanently.
#[derive(Debug, Clone)]
pub struct RejectedUpload {
    pub id: Uuid,
    pub payload: Arc<CapturePayload>,
    pub attempts: u32,
    pub error: DeliveryError,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("upload queue has shut down")]
    Closed,
}

// ============================================================================
// QUEUE HANDLE
// ============================================================================

/// Handle to a running upload queue.
///
/// Cheap operations (`enqueue`, `status`) never wait on the network. Dropping
/// the handle stops the worker after the in-flight attempt settles; use
/// [`shutdown`](Self::shutdown) to get the undelivered captures back.
pub struct UploadQueue {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<UploadStatus>,
    worker: JoinHandle<()>,
}

impl UploadQueue {
    /// Start a queue delivering through `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T>(transport: T, settings: UploadSettings) -> Self
    where
        T: Transport + 'static,
    {
        Self::spawn_with_metrics(transport, settings, None)
    }

    /// Like [`spawn`](Self::spawn), recording every attempt into `metrics`.
    pub fn spawn_with_metrics<T>(
        transport: T,
        settings: UploadSettings,
        metrics: Option<Arc<Mutex<DeliveryMetrics>>>,
    ) -> Self
    where
        T: Transport + 'static,
    {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(UploadStatus::Idle);

        let worker = QueueWorker {
            transport: Arc::new(transport),
            settings,
            commands: receiver,
            status: status_tx,
            pending: VecDeque::new(),
            sending: false,
            rejected: Vec::new(),
            rejected_since_drain: 0,
            flush_waiters: Vec::new(),
            shutdown: None,
            metrics,
        };

        Self {
            commands,
            status,
            worker: tokio::spawn(worker.run()),
        }
    }

    /// Append a capture to the tail of the queue.
    ///
    /// Returns the id used for it in logs, metrics and [`RejectedUpload`].
    pub fn enqueue(&self, payload: CapturePayload) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        self.commands
            .send(Command::Enqueue(QueuedCapture {
                id,
                payload: Arc::new(payload),
                attempts: 0,
            }))
            .map_err(|_| QueueError::Closed)?;
        Ok(id)
    }

    /// Latest published status.
    pub fn status(&self) -> UploadStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<UploadStatus> {
        self.status.clone()
    }

    /// Wait until every capture enqueued before this call has been delivered
    /// or rejected and nothing is in flight.
    pub async fn flush(&self) -> Result<(), QueueError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Flush(reply))
            .map_err(|_| QueueError::Closed)?;
        done.await.map_err(|_| QueueError::Closed)
    }

    /// Captures the server refused permanently, oldest first.
    pub async fn rejected(&self) -> Result<Vec<RejectedUpload>, QueueError> {
        let (reply, list) = oneshot::channel();
        self.commands
            .send(Command::Rejected(reply))
            .map_err(|_| QueueError::Closed)?;
        list.await.map_err(|_| QueueError::Closed)
    }

    /// Stop the worker once the in-flight attempt (if any) settles.
    ///
    /// Returns the undelivered captures in queue order.
    pub async fn shutdown(self) -> Result<Vec<CapturePayload>, QueueError> {
        let (reply, remaining) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(reply))
            .map_err(|_| QueueError::Closed)?;
        let remaining = remaining.await.map_err(|_| QueueError::Closed)?;
        let _ = self.worker.await;
        Ok(remaining)
    }
}

// ============================================================================
// WORKER
// ============================================================================

enum Command {
    Enqueue(QueuedCapture),
    Flush(oneshot::Sender<()>),
    Rejected(oneshot::Sender<Vec<RejectedUpload>>),
    Shutdown(oneshot::Sender<Vec<CapturePayload>>),
}

struct QueuedCapture {
    id: Uuid,
    payload: Arc<CapturePayload>,
    attempts: u32,
}

/// Sole owner of the queue state.
struct QueueWorker<T> {
    transport: Arc<T>,
    settings: UploadSettings,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<UploadStatus>,
    pending: VecDeque<QueuedCapture>,
    /// Set before a request is issued, cleared once it settles
    sending: bool,
    rejected: Vec<RejectedUpload>,
    /// Rejections since the queue last started from empty
    rejected_since_drain: usize,
    flush_waiters: Vec<oneshot::Sender<()>>,
    shutdown: Option<oneshot::Sender<Vec<CapturePayload>>>,
    metrics: Option<Arc<Mutex<DeliveryMetrics>>>,
}

impl<T: Transport + 'static> QueueWorker<T> {
    async fn run(mut self) {
        let mut running = true;
        while running {
            running = if self.pending.is_empty() {
                self.wait_idle().await
            } else {
                self.begin_send().await
            };
        }
        self.finish();
    }

    /// Queue empty: wait for the next command, clearing `Synced` after its
    /// display time.
    async fn wait_idle(&mut self) -> bool {
        let showing_synced = *self.status.borrow() == UploadStatus::Synced;
        if showing_synced {
            match timeout(self.settings.synced_display(), self.commands.recv()).await {
                Ok(command) => self.apply(command),
                Err(_) => {
                    self.status.send_replace(UploadStatus::Idle);
                    true
                }
            }
        } else {
            let command = self.commands.recv().await;
            self.apply(command)
        }
    }

    /// Upload the head once and settle the outcome.
    ///
    /// No-op if a request is already in flight or the queue is empty. Returns
    /// `false` once the worker should stop.
    async fn begin_send(&mut self) -> bool {
        if self.sending {
            return true;
        }
        let Some(head) = self.pending.front_mut() else {
            return true;
        };
        head.attempts += 1;
        let (id, attempt, payload) = (head.id, head.attempts, Arc::clone(&head.payload));

        self.sending = true;
        self.publish();
        info!(
            "📤 Uploading capture {} (attempt {}, {} queued)",
            id,
            attempt,
            self.pending.len()
        );

        let transport = Arc::clone(&self.transport);
        let started = Instant::now();
        let request = async move { transport.send(&payload).await };
        tokio::pin!(request);

        // Keep accepting commands while the request runs; they only touch the tail
        let mut running = true;
        let outcome = loop {
            tokio::select! {
                outcome = &mut request => break outcome,
                command = self.commands.recv(), if running => {
                    running = self.apply(command);
                }
            }
        };

        self.sending = false;
        self.record(id, attempt, started.elapsed(), &outcome);

        match outcome {
            Ok(saved) => {
                self.pending.pop_front();
                info!(
                    "✅ Capture {} uploaded as {} ({} remaining)",
                    id,
                    saved.filename,
                    self.pending.len()
                );
                self.publish();
            }
            Err(e) if self.settings.should_retry(&e) => {
                let delay = self.settings.retry_delay(&e);
                warn!(
                    "🔄 Capture {} attempt {} failed: {}. Retrying in {}ms",
                    id,
                    attempt,
                    e,
                    delay.as_millis()
                );
                self.publish();
                if running {
                    running = self.backoff(delay).await;
                }
            }
            Err(e) => {
                error!(
                    "❌ Capture {} rejected after {} attempt(s): {}",
                    id, attempt, e
                );
                if let Some(capture) = self.pending.pop_front() {
                    self.rejected_since_drain += 1;
                    self.rejected.push(RejectedUpload {
                        id: capture.id,
                        payload: capture.payload,
                        attempts: capture.attempts,
                        error: e,
                    });
                }
                self.publish();
            }
        }

        self.notify_flush_waiters();
        running
    }

    /// Wait out a retry delay while still accepting commands.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let wait = sleep(delay);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => return true,
                command = self.commands.recv() => {
                    if !self.apply(command) {
                        return false;
                    }
                }
            }
        }
    }

    /// Handle one command. Returns `false` when the worker should stop.
    fn apply(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Enqueue(capture)) => {
                debug!("Queued capture {}", capture.id);
                if self.is_drained() {
                    self.rejected_since_drain = 0;
                }
                self.pending.push_back(capture);
                self.publish();
                true
            }
            Some(Command::Flush(reply)) => {
                if self.is_drained() {
                    let _ = reply.send(());
                } else {
                    self.flush_waiters.push(reply);
                }
                true
            }
            Some(Command::Rejected(reply)) => {
                let _ = reply.send(self.rejected.clone());
                true
            }
            Some(Command::Shutdown(reply)) => {
                self.shutdown = Some(reply);
                false
            }
            None => false,
        }
    }

    fn is_drained(&self) -> bool {
        self.pending.is_empty() && !self.sending
    }

    fn notify_flush_waiters(&mut self) {
        if self.is_drained() {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn publish(&self) {
        let queued = self.pending.len();
        let status = if self.sending {
            UploadStatus::Uploading(queued)
        } else if queued > 0 {
            UploadStatus::Pending(queued)
        } else if self.rejected_since_drain > 0 {
            UploadStatus::Failed(self.rejected_since_drain)
        } else {
            UploadStatus::Synced
        };
        self.status.send_replace(status);
    }

    fn record(
        &self,
        id: Uuid,
        attempt: u32,
        latency: Duration,
        outcome: &Result<UploadResponse, DeliveryError>,
    ) {
        if let Some(metrics) = &self.metrics {
            if let Ok(mut metrics) = metrics.lock() {
                metrics.record_attempt(
                    id,
                    attempt,
                    latency,
                    outcome.is_ok(),
                    outcome.as_ref().err().map(DeliveryError::reason),
                );
            }
        }
    }

    fn finish(mut self) {
        let remaining: Vec<CapturePayload> = self
            .pending
            .drain(..)
            .map(|capture| Arc::try_unwrap(capture.payload).unwrap_or_else(|shared| (*shared).clone()))
            .collect();

        if !remaining.is_empty() {
            warn!("Upload queue stopped with {} undelivered capture(s)", remaining.len());
        }
        if let Some(reply) = self.shutdown.take() {
            let _ = reply.send(remaining);
        }
    }
}
