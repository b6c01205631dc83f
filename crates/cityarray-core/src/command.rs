// ── Command API ──
//
// Every operator action flows through one `Command` enum. The hub's
// command processor routes each variant to the scheduler, arbitrator or
// a sign's session and answers on a oneshot channel. Dashboards send the
// same commands as JSON tagged by `"type"`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{
    Blackout, MessageId, Override, OverrideId, OverrideRequest, Priority, ScheduleEntry,
    ScheduleId, SignId, Targets,
};

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All operator actions a hub accepts.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // ── Overrides ────────────────────────────────────────────────────
    IssueOverride(OverrideRequest),
    CancelOverride {
        id: OverrideId,
    },

    // ── Direct content ───────────────────────────────────────────────
    /// Literal text to the targeted signs as normal content. Held back
    /// on signs under an override.
    SendMessage {
        content: String,
        targets: Targets,
        priority: Priority,
        duration: Option<Duration>,
    },

    // ── Schedule ─────────────────────────────────────────────────────
    UpsertSchedule(ScheduleEntry),
    RemoveSchedule {
        id: ScheduleId,
    },
    SetBlackouts {
        blackouts: Vec<Blackout>,
    },

    // ── On-demand checks ─────────────────────────────────────────────
    Ping {
        sign: SignId,
    },
    RequestStatus {
        sign: SignId,
    },
}

/// Result of a successfully executed command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum CommandResult {
    Ok,
    Override(Arc<Override>),
    /// Whether the cancel ended an active override.
    Cancelled(bool),
    Sent {
        message_id: MessageId,
        /// Signs the message went to right away.
        delivered: usize,
    },
    ScheduleEntry(ScheduleEntry),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{OverrideMode, Role};

    #[test]
    fn override_command_decodes_from_json() {
        let cmd: Command = serde_json::from_str(
            r#"{
                "type": "issue_override",
                "role": {"role": "zone_lead", "zone": "A"},
                "mode": "replace",
                "content": "Gate 3 closed",
                "targets": {"selected": {"zones": ["A"]}}
            }"#,
        )
        .unwrap();
        let Command::IssueOverride(request) = cmd else {
            panic!("expected an override, got {cmd:?}");
        };
        assert_eq!(request.role, Role::ZoneLead { zone: "A".into() });
        assert_eq!(request.mode, OverrideMode::Replace);
        assert!(request.duration.is_none());
    }

    #[test]
    fn checks_and_cancels_decode() {
        let id = OverrideId::new();
        let cmd: Command =
            serde_json::from_value(serde_json::json!({"type": "cancel_override", "id": id}))
                .unwrap();
        assert!(matches!(cmd, Command::CancelOverride { id: got } if got == id));

        let cmd: Command = serde_json::from_str(r#"{"type": "ping", "sign": "s1"}"#).unwrap();
        assert!(matches!(cmd, Command::Ping { sign } if sign.as_str() == "s1"));

        assert!(serde_json::from_str::<Command>(r#"{"type": "reboot"}"#).is_err());
    }

    #[test]
    fn results_carry_a_result_tag() {
        let json = serde_json::to_value(CommandResult::Cancelled(true)).unwrap();
        assert_eq!(json, serde_json::json!({"result": "cancelled", "data": true}));
        let json = serde_json::to_value(CommandResult::Ok).unwrap();
        assert_eq!(json, serde_json::json!({"result": "ok"}));
    }
}
