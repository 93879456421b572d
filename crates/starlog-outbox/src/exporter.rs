//! Timer-driven delivery loop over the replay queue.
//!
//! The exporter owns the queue, the envelope builder, and the transport. New
//! events are appended to the queue first and delivered by a rate-limited
//! loop that sends one entry per tick, oldest first. A transport failure
//! pauses the loop with the failed entry still at the head; the next submit
//! re-arms it.

use crate::envelope::{rewrite_schema_ref, Envelope, EnvelopeBuilder, LocationState, Payload, QueueEntry};
use crate::error::{ExportError, ExportResult};
use crate::queue::ReplayQueue;
use crate::status::StatusLine;
use crate::transport::{Transport, TransportError};
use starlog_config::{Paths, SettingsStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Default collector upload endpoint.
pub const DEFAULT_UPLOAD_URL: &str = "https://collector.starlog-network.org/upload/";

/// Default pacing between queued sends.
pub const DEFAULT_REPLAY_PERIOD: Duration = Duration::from_millis(400);

/// Default per-upload timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

const STATUS_SENDING: &str = "Sending data to Starlog...";
const STATUS_CONNECT_ERROR: &str = "Error: can't connect to the Starlog collector";
const STATUS_REJECTED: &str = "Error: the Starlog collector rejected the upload";

/// Exporter tuning knobs.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Collector upload endpoint.
    pub upload_url: String,
    /// Software name reported in envelope headers.
    pub software_name: String,
    /// Software version reported in envelope headers.
    pub software_version: String,
    /// Minimum delay between queued sends.
    pub replay_period: Duration,
    /// Per-upload timeout.
    pub send_timeout: Duration,
    /// Removals between replay file compactions.
    pub compact_every: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            software_name: env!("CARGO_PKG_NAME").to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            replay_period: DEFAULT_REPLAY_PERIOD,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            compact_every: crate::queue::DEFAULT_COMPACT_EVERY,
        }
    }
}

impl ExporterConfig {
    /// Derive a config pointing at a non-default collector host.
    pub fn for_collector(base: &str) -> ExportResult<Self> {
        let upload_url = Url::parse(base)?.join("upload/")?;
        Ok(Self {
            upload_url: upload_url.to_string(),
            ..Self::default()
        })
    }
}

/// Delivery loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Queue drained, loop parked.
    Idle,
    /// Armed or actively sending.
    Sending,
    /// A send failed; the head entry is retained and retried on re-arm.
    Paused,
}

/// Result of a single delivery tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// One entry was delivered and removed.
    Sent,
    /// No entries left; the loop went idle.
    Drained,
    /// The send failed; the loop paused with the entry retained.
    Paused,
}

/// One event to export.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Caller identity; used as the uploader id unless anonymized.
    pub identity: String,
    /// Replace the identity with the persisted opaque uploader id.
    pub anonymous: bool,
    /// Sanitized event payload.
    pub event: Payload,
    /// Location context for enriching the payload.
    pub location: LocationState,
    /// Deliver now instead of waiting for the paced loop.
    pub urgent: bool,
    /// Target the test schema variant.
    pub test_mode: bool,
}

impl SubmitRequest {
    /// A non-urgent, non-anonymous request with no location context.
    pub fn new(identity: impl Into<String>, event: Payload) -> Self {
        Self {
            identity: identity.into(),
            anonymous: false,
            event,
            location: LocationState::default(),
            urgent: false,
            test_mode: false,
        }
    }
}

/// Telemetry exporter: replay queue plus paced delivery loop.
pub struct Exporter {
    config: ExporterConfig,
    builder: EnvelopeBuilder,
    settings: Arc<SettingsStore>,
    transport: Arc<dyn Transport>,
    status: StatusLine,
    replay_path: PathBuf,
    /// `None` when another process holds the queue lock; submits fall back
    /// to unbuffered sends and each submit retries the open.
    queue: tokio::sync::Mutex<Option<ReplayQueue>>,
    /// Held across a whole tick. Exactly one send may be outstanding, and
    /// both the driver and inline urgent ticks go through here.
    delivery: tokio::sync::Mutex<()>,
    state: Mutex<DeliveryState>,
    wake: Notify,
    shutdown: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Exporter {
    /// Load the exporter, acquiring the replay queue if it is free.
    ///
    /// A queue held by another process is not an error: this instance runs
    /// in unbuffered fallback mode until the lock frees up.
    pub fn load(
        paths: &Paths,
        settings: Arc<SettingsStore>,
        transport: Arc<dyn Transport>,
        config: ExporterConfig,
    ) -> ExportResult<Arc<Self>> {
        paths.ensure_dirs()?;
        let replay_path = paths.replay_file();
        let builder = EnvelopeBuilder::new(
            &config.software_name,
            &config.software_version,
            settings.clone(),
        );

        let queue = Self::open_queue(&replay_path, config.compact_every);
        match &queue {
            Some(queue) if !queue.is_empty() => {
                info!(pending = queue.len(), "Resuming with pending entries");
            }
            Some(_) => {}
            None => {
                warn!("Replay queue held by another process; running unbuffered");
            }
        }

        Ok(Arc::new(Self {
            config,
            builder,
            settings,
            transport,
            status: StatusLine::new(),
            replay_path,
            queue: tokio::sync::Mutex::new(queue),
            delivery: tokio::sync::Mutex::new(()),
            state: Mutex::new(DeliveryState::Idle),
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
            driver: Mutex::new(None),
        }))
    }

    /// Shared status line for the host UI.
    pub fn status(&self) -> StatusLine {
        self.status.clone()
    }

    /// Current delivery state.
    pub fn state(&self) -> DeliveryState {
        *self.state.lock().expect("lock poisoned")
    }

    /// Number of entries awaiting delivery.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.as_ref().map_or(0, ReplayQueue::len)
    }

    /// Whether this instance holds the replay queue.
    pub async fn queue_available(&self) -> bool {
        self.queue.lock().await.is_some()
    }

    /// Queue an event for delivery.
    ///
    /// The entry is durable on disk before this returns. Urgent requests,
    /// and all requests when batching is disabled, also run a delivery tick
    /// immediately. Without the queue lock the event is sent unbuffered
    /// instead, and a failure there is the caller's to surface.
    pub async fn submit(&self, request: SubmitRequest) -> ExportResult<()> {
        let envelope = self.builder.build(
            &request.identity,
            request.anonymous,
            request.event,
            &request.location,
            request.test_mode,
        )?;

        let queued = {
            let mut slot = self.queue.lock().await;
            if slot.is_none() {
                *slot = Self::open_queue(&self.replay_path, self.config.compact_every);
            }
            match slot.as_mut() {
                Some(queue) => {
                    let entry = QueueEntry {
                        identity: request.identity.clone(),
                        envelope: envelope.clone(),
                    };
                    queue.append(&entry.to_line()?)?;
                    true
                }
                None => false,
            }
        };

        if !queued {
            debug!("Replay queue unavailable; sending unbuffered");
            return self.send_unbuffered(&envelope).await;
        }

        self.arm();
        if request.urgent || !self.settings.get().batch_delay {
            self.tick().await;
        }
        Ok(())
    }

    /// Arm the delivery loop: mark it sending and wake the driver. Also how
    /// a paused loop resumes.
    pub fn arm(&self) {
        *self.state.lock().expect("lock poisoned") = DeliveryState::Sending;
        self.wake.notify_one();
    }

    /// Run one delivery step: skip corrupt head entries, send the oldest
    /// valid one, and remove it only on confirmed success.
    ///
    /// Ticks are serialized; a concurrent caller waits for the in-flight
    /// send to finish before taking the (new) head.
    pub async fn tick(&self) -> TickOutcome {
        let _delivery = self.delivery.lock().await;
        loop {
            let (head, pending) = {
                let slot = self.queue.lock().await;
                match slot.as_ref() {
                    Some(queue) => (queue.head().map(str::to_string), queue.len()),
                    None => (None, 0),
                }
            };

            let Some(line) = head else {
                *self.state.lock().expect("lock poisoned") = DeliveryState::Idle;
                self.status.clear();
                return TickOutcome::Drained;
            };

            let mut entry = match QueueEntry::from_line(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Dropping corrupt replay entry");
                    self.pop_confirmed().await;
                    continue;
                }
            };

            // Stale hosts in replayed entries are rewritten at send time.
            entry.envelope.schema_ref = rewrite_schema_ref(&entry.envelope.schema_ref);
            let body = match serde_json::to_string(&entry.envelope) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "Dropping unserializable replay entry");
                    self.pop_confirmed().await;
                    continue;
                }
            };

            if pending > 1 {
                self.status.set(format!("Sending data to Starlog [{pending}]"));
            } else {
                self.status.set(STATUS_SENDING);
            }

            let result = self
                .transport
                .post(&self.config.upload_url, body, self.config.send_timeout)
                .await;

            match result {
                Ok(response) if response.is_success() => {
                    debug!(identity = %entry.identity, "Delivered queued entry");
                    self.pop_confirmed().await;
                    return TickOutcome::Sent;
                }
                Ok(response) => {
                    warn!(
                        status = response.status,
                        body = %response.body,
                        "Collector rejected upload"
                    );
                    self.status.set(STATUS_REJECTED);
                    *self.state.lock().expect("lock poisoned") = DeliveryState::Paused;
                    return TickOutcome::Paused;
                }
                Err(e) => {
                    warn!(error = %e, "Upload failed");
                    self.status.set(if e.is_connectivity() {
                        STATUS_CONNECT_ERROR
                    } else {
                        STATUS_REJECTED
                    });
                    *self.state.lock().expect("lock poisoned") = DeliveryState::Paused;
                    return TickOutcome::Paused;
                }
            }
        }
    }

    /// Spawn the paced driver task. Sends run one per replay period while
    /// the loop is armed; a drained or paused loop parks until re-armed.
    /// The task exits between ticks once shutdown is requested, so an
    /// in-flight send always completes or times out naturally.
    pub fn spawn_driver(self: &Arc<Self>) {
        let exporter = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                exporter.wake.notified().await;
                if exporter.shutdown.load(Ordering::Acquire) {
                    return;
                }
                loop {
                    tokio::time::sleep(exporter.config.replay_period).await;
                    if exporter.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    match exporter.tick().await {
                        TickOutcome::Sent => continue,
                        TickOutcome::Drained | TickOutcome::Paused => break,
                    }
                }
                if exporter.shutdown.load(Ordering::Acquire) {
                    return;
                }
            }
        });
        *self.driver.lock().expect("lock poisoned") = Some(handle);
    }

    /// Stop the driver, fold pending removals into the replay file, and
    /// release the queue lock. Waits for any in-flight send to finish
    /// before the queue is closed.
    pub async fn close(&self) -> ExportResult<()> {
        self.shutdown.store(true, Ordering::Release);
        let handle = self.driver.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            self.wake.notify_one();
            let _ = handle.await;
        }

        // Any non-driver tick still running finishes here.
        let _delivery = self.delivery.lock().await;
        if let Some(queue) = self.queue.lock().await.take() {
            queue.close()?;
        }

        *self.state.lock().expect("lock poisoned") = DeliveryState::Idle;
        self.status.clear();
        Ok(())
    }

    fn open_queue(path: &std::path::Path, compact_every: u64) -> Option<ReplayQueue> {
        match ReplayQueue::open(path, compact_every) {
            Ok(queue) => Some(queue),
            Err(ExportError::QueueUnavailable(reason)) => {
                debug!(reason = %reason, "Replay queue unavailable");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to open replay queue");
                None
            }
        }
    }

    async fn pop_confirmed(&self) {
        let mut slot = self.queue.lock().await;
        if let Some(queue) = slot.as_mut() {
            if queue.pop_head() {
                if let Err(e) = queue.compact() {
                    warn!(error = %e, "Failed to compact replay file");
                }
            }
        }
    }

    /// One-shot send bypassing the queue, used when another process holds
    /// the queue lock. No durability: a failure here loses the event unless
    /// the caller retries.
    async fn send_unbuffered(&self, envelope: &Envelope) -> ExportResult<()> {
        let body = serde_json::to_string(envelope)?;
        self.status.set(STATUS_SENDING);

        let result = self
            .transport
            .post(&self.config.upload_url, body, self.config.send_timeout)
            .await;

        match result {
            Ok(response) if response.is_success() => {
                self.status.clear();
                Ok(())
            }
            Ok(response) => {
                self.status.set(STATUS_REJECTED);
                Err(TransportError::Status {
                    status: response.status,
                    body: response.body,
                }
                .into())
            }
            Err(e) => {
                self.status.set(if e.is_connectivity() {
                    STATUS_CONNECT_ERROR
                } else {
                    STATUS_REJECTED
                });
                Err(e.into())
            }
        }
    }
}
