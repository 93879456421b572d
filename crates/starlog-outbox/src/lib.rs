//! Persistent replay/export pipeline for Starlog telemetry.
//!
//! This crate provides:
//! - [`ReplayQueue`]: a single-writer, file-backed FIFO of pending uploads
//! - [`EnvelopeBuilder`]: wraps sanitized events into the wire envelope
//! - [`Exporter`]: a timer-driven delivery loop that drains the queue,
//!   rewriting stale schema references and pausing on transport failure
//! - [`Transport`]: the HTTP seam, with a [`HttpTransport`] reqwest impl
//!
//! Entries are durable before any send attempt and removed only after a
//! confirmed successful upload; delivery is at-least-once.

mod envelope;
mod error;
mod exporter;
mod queue;
mod status;
mod transport;

pub use envelope::{
    journal_schema_ref, rewrite_schema_ref, Envelope, EnvelopeBuilder, Header, LocationState,
    Payload, QueueEntry, LEGACY_SCHEMA_PREFIX, SCHEMA_BASE,
};
pub use error::{ExportError, ExportResult};
pub use exporter::{
    DeliveryState, Exporter, ExporterConfig, SubmitRequest, TickOutcome, DEFAULT_REPLAY_PERIOD,
    DEFAULT_SEND_TIMEOUT, DEFAULT_UPLOAD_URL,
};
pub use queue::{ReplayQueue, DEFAULT_COMPACT_EVERY};
pub use status::StatusLine;
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
