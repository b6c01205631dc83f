//! JSON frames exchanged between signs and the hub.
//!
//! Every frame is a JSON object tagged by `"type"`. Payload-heavy frames
//! nest their body under `"data"` (`heartbeat`, `metrics`, `new_message`,
//! `override`, `cache_sync`); small frames carry flat fields
//! (`ack.message_id`). Identifiers travel as plain strings; the core
//! crate converts them into typed ids.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Sign → hub ───────────────────────────────────────────────────────

/// Frames a sign sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignEvent {
    /// Periodic liveness and status report.
    Heartbeat { data: HeartbeatData },

    /// Free-form sign metrics, forwarded to dashboards untouched.
    Metrics { data: serde_json::Value },

    /// Acknowledges that a message is now on the display.
    Ack { message_id: String },

    /// Something the sign displayed on its own while offline.
    #[serde(rename = "offline_message_report")]
    OfflineReport {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        occurred_at: Option<DateTime<Utc>>,
    },
}

/// Body of a `heartbeat` frame. Every field is optional: a sign reports
/// what its peripherals can measure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crowd_density: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crowd_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_message_id: Option<String>,
    /// `"wifi"` or `"cellular"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

// ── Hub → sign ───────────────────────────────────────────────────────

/// Frames the hub sends to a sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignCommand {
    /// Welcome frame sent right after the upgrade.
    Connected { message: String },

    /// Scheduled or operator content.
    NewMessage { data: MessagePayload },

    /// Operator override.
    Override { data: OverridePayload },

    /// An override showing on this sign has ended.
    OverrideCancelled {
        override_id: String,
        message_id: String,
    },

    /// On-demand liveness check; the sign answers with a heartbeat.
    Ping,

    /// Ask for an immediate status heartbeat.
    RequestStatus,

    /// Templates and schedule the sign may serve while offline.
    CacheSync { data: CachePayload },
}

/// A rendered message as it travels to a sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    pub content: String,
    pub priority: u8,
    /// Display duration; `None` means until replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Override mode on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    Insert,
    Replace,
    Emergency,
}

/// Body of an `override` frame: the message plus how to treat it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePayload {
    pub override_id: String,
    pub mode: WireMode,
    #[serde(flatten)]
    pub message: MessagePayload,
}

/// Offline cache contents pushed to a sign when it comes online.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePayload {
    #[serde(default)]
    pub templates: Vec<TemplatePayload>,
    #[serde(default)]
    pub schedule: Vec<SchedulePayload>,
    /// Latest data-feed values for the sign's zone.
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePayload {
    pub id: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A schedule entry in its transport form. Times are `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePayload {
    pub id: String,
    pub template_id: String,
    /// Zone names; empty means every zone.
    #[serde(default)]
    pub zones: Vec<String>,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub frequency_minutes: u32,
    pub duration_secs: u64,
    pub priority: u8,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lowercase three-letter weekday names; absent means every day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_days: Option<Vec<String>>,
    #[serde(default)]
    pub blackouts: Vec<WindowPayload>,
}

/// A `HH:MM`–`HH:MM` window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPayload {
    pub start: String,
    pub end: String,
}

fn default_true() -> bool {
    true
}

// ── Encoding ─────────────────────────────────────────────────────────

/// Serialize a frame to its JSON text form.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, Error> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse a sign → hub frame.
pub fn decode_event(text: &str) -> Result<SignEvent, Error> {
    serde_json::from_str(text).map_err(|e| Error::Decode {
        message: e.to_string(),
        frame: text.to_owned(),
    })
}

/// Parse a hub → sign frame.
pub fn decode_command(text: &str) -> Result<SignCommand, Error> {
    serde_json::from_str(text).map_err(|e| Error::Decode {
        message: e.to_string(),
        frame: text.to_owned(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────
