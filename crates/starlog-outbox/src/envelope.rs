//! Wire envelope construction and schema reference handling.

use crate::error::ExportResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use starlog_config::SettingsStore;
use std::sync::Arc;

/// Current canonical host for schema references.
pub const SCHEMA_BASE: &str = "https://collector.starlog-network.org/schemas";

/// Deprecated schema host; references carrying it are rewritten at send time.
pub const LEGACY_SCHEMA_PREFIX: &str = "http://schemas.starlog-archive.net/telemetry/";

/// Opaque, already-sanitized event payload. Key order is preserved end to
/// end; some consumers are order-sensitive.
pub type Payload = serde_json::Map<String, Value>;

/// Wire-level wrapper sent to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Versioned identifier naming the event taxonomy and its host.
    #[serde(rename = "$schemaRef")]
    pub schema_ref: String,
    pub header: Header,
    pub message: Payload,
}

/// Software identity attached to every upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "softwareName")]
    pub software_name: String,
    #[serde(rename = "softwareVersion")]
    pub software_version: String,
    #[serde(rename = "uploaderID")]
    pub uploader_id: String,
}

/// One pending upload: the caller identity plus its envelope.
///
/// Serialized as a two-element JSON array, one line per entry in the replay
/// file.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub identity: String,
    pub envelope: Envelope,
}

impl QueueEntry {
    /// Serialize to one replay-file line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&(&self.identity, &self.envelope))
    }

    /// Parse a replay-file line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        let (identity, envelope): (String, Envelope) = serde_json::from_str(line)?;
        Ok(Self { identity, envelope })
    }
}

/// Last known location, owned by the event producer and passed in per
/// submit. Never ambient state.
#[derive(Debug, Clone, Default)]
pub struct LocationState {
    /// Current system name.
    pub system: Option<String>,
    /// Current system address.
    pub system_address: Option<u64>,
    /// Star coordinates of the current system.
    pub coordinates: Option<[f64; 3]>,
    /// Current planet or body, when landed or docked at one.
    pub body: Option<String>,
}

/// Builds wire envelopes from sanitized events.
pub struct EnvelopeBuilder {
    software_name: String,
    software_version: String,
    settings: Arc<SettingsStore>,
}

impl EnvelopeBuilder {
    /// Create a builder with a static software identity.
    pub fn new(software_name: &str, software_version: &str, settings: Arc<SettingsStore>) -> Self {
        Self {
            software_name: format!("{} [{}]", software_name, platform_label()),
            software_version: software_version.to_string(),
            settings,
        }
    }

    /// Wrap a sanitized event into an envelope.
    ///
    /// When `anonymous` is set the uploader id is the persisted opaque
    /// identity (minted lazily on first use); otherwise the caller identity
    /// is used verbatim. Payload content passes through unchanged apart from
    /// filling missing mandatory location fields from `location`.
    pub fn build(
        &self,
        identity: &str,
        anonymous: bool,
        event: Payload,
        location: &LocationState,
        test_mode: bool,
    ) -> ExportResult<Envelope> {
        let uploader_id = if anonymous {
            self.settings.uploader_id()?
        } else {
            identity.to_string()
        };

        let mut message = event;
        enrich_location(&mut message, location);

        Ok(Envelope {
            schema_ref: journal_schema_ref(test_mode),
            header: Header {
                software_name: self.software_name.clone(),
                software_version: self.software_version.clone(),
                uploader_id,
            },
            message,
        })
    }
}

/// Current journal schema reference; test mode uses the `/test` variant.
pub fn journal_schema_ref(test_mode: bool) -> String {
    if test_mode {
        format!("{SCHEMA_BASE}/journal/1/test")
    } else {
        format!("{SCHEMA_BASE}/journal/1")
    }
}

/// Rewrite a schema reference from the deprecated host to the current one,
/// preserving the trailing path. Idempotent: already-current references pass
/// through unchanged.
pub fn rewrite_schema_ref(schema_ref: &str) -> String {
    match schema_ref.strip_prefix(LEGACY_SCHEMA_PREFIX) {
        Some(rest) => format!("{SCHEMA_BASE}/{rest}"),
        None => schema_ref.to_string(),
    }
}

/// Fill in mandatory location fields the sanitizer could not supply, without
/// overwriting anything already present.
fn enrich_location(message: &mut Payload, location: &LocationState) {
    if !message.contains_key("StarSystem") {
        if let Some(system) = &location.system {
            message.insert("StarSystem".to_string(), Value::String(system.clone()));
        }
    }
    if !message.contains_key("StarPos") {
        if let Some([x, y, z]) = location.coordinates {
            message.insert("StarPos".to_string(), serde_json::json!([x, y, z]));
        }
    }
    if !message.contains_key("SystemAddress") {
        if let Some(address) = location.system_address {
            message.insert("SystemAddress".to_string(), Value::from(address));
        }
    }
}

fn platform_label() -> &'static str {
    match std::env::consts::OS {
        "macos" => "Mac OS",
        "windows" => "Windows",
        "linux" => "Linux",
        other => other,
    }
}
