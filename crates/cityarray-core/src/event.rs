// ── Dashboard events ──
//
// Everything the hub reports to operators. Serialized as JSON objects
// tagged by `"type"`, the form dashboards receive over `/ws/dashboard`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use crate::model::{ExpiryReason, MessageId, OverrideId, OverrideMode, Sign, SignId, ZoneId};

/// Health threshold that was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WarningKind {
    BatteryLow,
    SignalWeak,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    SignConnected {
        sign_id: SignId,
        zone: ZoneId,
        at: DateTime<Utc>,
    },
    SignDisconnected {
        sign_id: SignId,
        at: DateTime<Utc>,
    },
    SignOffline {
        sign_id: SignId,
        last_seen: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    /// Fresh status after a heartbeat.
    SignUpdate { sign: Sign },
    Warning {
        sign_id: SignId,
        kind: WarningKind,
        value: i32,
        threshold: i32,
    },
    SignMetrics {
        sign_id: SignId,
        data: serde_json::Value,
    },
    MessageSent {
        sign_id: SignId,
        message_id: MessageId,
        attempt: u32,
    },
    MessageAck {
        sign_id: SignId,
        message_id: MessageId,
    },
    MessageExpired {
        sign_id: SignId,
        message_id: MessageId,
        reason: ExpiryReason,
    },
    OverrideActivated {
        override_id: OverrideId,
        mode: OverrideMode,
        role: String,
        content: String,
        signs: Vec<SignId>,
    },
    OverrideCancelled {
        override_id: OverrideId,
        signs: Vec<SignId>,
    },
    OverrideExpired {
        override_id: OverrideId,
        signs: Vec<SignId>,
    },
    /// A sign reported what it showed on its own while cut off.
    OfflineActivity {
        sign_id: SignId,
        content: String,
        occurred_at: Option<DateTime<Utc>>,
    },
}

impl DashboardEvent {
    /// The `type` tag this event serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignConnected { .. } => "sign_connected",
            Self::SignDisconnected { .. } => "sign_disconnected",
            Self::SignOffline { .. } => "sign_offline",
            Self::SignUpdate { .. } => "sign_update",
            Self::Warning { .. } => "warning",
            Self::SignMetrics { .. } => "sign_metrics",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageAck { .. } => "message_ack",
            Self::MessageExpired { .. } => "message_expired",
            Self::OverrideActivated { .. } => "override_activated",
            Self::OverrideCancelled { .. } => "override_cancelled",
            Self::OverrideExpired { .. } => "override_expired",
            Self::OfflineActivity { .. } => "offline_activity",
        }
    }

    /// The sign this event concerns, if it concerns exactly one.
    pub fn sign_id(&self) -> Option<&SignId> {
        match self {
            Self::SignConnected { sign_id, .. }
            | Self::SignDisconnected { sign_id, .. }
            | Self::SignOffline { sign_id, .. }
            | Self::Warning { sign_id, .. }
            | Self::SignMetrics { sign_id, .. }
            | Self::MessageSent { sign_id, .. }
            | Self::MessageAck { sign_id, .. }
            | Self::MessageExpired { sign_id, .. }
            | Self::OfflineActivity { sign_id, .. } => Some(sign_id),
            Self::SignUpdate { sign } => Some(&sign.id),
            Self::OverrideActivated { .. }
            | Self::OverrideCancelled { .. }
            | Self::OverrideExpired { .. } => None,
        }
    }
}
