// ── Core error types ──
//
// Domain errors surfaced by the hub. Transport failures from
// `cityarray-proto` are translated at the boundary so callers never match
// on WebSocket details. Conflicts between overrides are resolved inside
// the arbitrator and never appear here.

use thiserror::Error;

use crate::model::{OverrideId, ScheduleId, SignId, TemplateId};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Delivery errors ──────────────────────────────────────────────
    /// The sign's session is gone; the delivery channel re-queues.
    #[error("Session for sign {sign_id} is closed")]
    SessionClosed { sign_id: SignId },

    /// No ack arrived before the deadline.
    #[error("Sign {sign_id} did not acknowledge message {message_id} in time")]
    AckTimeout { sign_id: SignId, message_id: String },

    /// The message's display window passed before it was shown.
    #[error("Message {message_id} expired before sign {sign_id} displayed it")]
    DeliveryExpired { sign_id: SignId, message_id: String },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Sign not found: {sign_id}")]
    SignNotFound { sign_id: SignId },

    #[error("Override not found: {override_id}")]
    OverrideNotFound { override_id: OverrideId },

    #[error("Schedule entry not found: {schedule_id}")]
    ScheduleNotFound { schedule_id: ScheduleId },

    #[error("Template not found: {template_id}")]
    TemplateNotFound { template_id: TemplateId },

    // ── Admission errors ─────────────────────────────────────────────
    /// Rejected at admission (schedule entry, override request, config).
    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Hub is not running")]
    HubStopped,

    // ── Transport errors (wrapped, not exposed raw) ──────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<cityarray_proto::Error> for CoreError {
    fn from(err: cityarray_proto::Error) -> Self {
        match err {
            cityarray_proto::Error::InvalidUrl(e) => CoreError::ConfigInvalid {
                message: format!("Invalid URL: {e}"),
            },
            cityarray_proto::Error::Decode { message, frame: _ } => CoreError::Protocol {
                message: format!("Undecodable frame: {message}"),
            },
            other => CoreError::Protocol {
                message: other.to_string(),
            },
        }
    }
}
