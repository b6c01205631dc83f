// ── Display decision ──
//
// One interface for "what should this sign show right now", answered by
// the hub's arbitrator while a sign is connected and by the sign agent's
// local decider while it is cut off.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{MessageId, OverrideMode, Priority, SignId};

/// Where displayed content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionSource {
    /// Regular scheduled content.
    Schedule,
    /// An operator override of the given mode.
    Override { mode: OverrideMode },
    /// Sent directly by an operator.
    Operator,
    /// A local emergency template triggered on the sign itself.
    LocalEmergency,
    /// Rendered from the sign's cached schedule while offline.
    OfflineCache,
}

/// Content a sign should be showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Hub-issued id, absent for content the sign produced itself.
    pub message_id: Option<MessageId>,
    pub content: String,
    pub priority: Priority,
    pub source: DecisionSource,
}

pub trait DisplayDecider {
    /// What `sign` should show at `now`, or `None` when there is nothing.
    fn decide(&self, sign: &SignId, now: DateTime<Utc>) -> Option<Decision>;
}
