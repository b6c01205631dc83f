// ── Sign domain types ──

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::ids::{MessageId, SignId, ZoneId};

/// Session-level connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// Session open, no heartbeat yet.
    Connecting,
    Online,
    Offline,
}

/// Status as reported to operators: connection state folded together
/// with health flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SignStatus {
    Connecting,
    Online,
    Warning,
    Offline,
}

/// Threshold flags raised by heartbeat readings. Each stays raised until
/// the reading recovers, so a crossing is reported once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthFlags {
    pub battery_low: bool,
    pub signal_weak: bool,
}

impl HealthFlags {
    pub fn any(self) -> bool {
        self.battery_low || self.signal_weak
    }
}

/// A registered sign. Created on first registration, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sign {
    pub id: SignId,
    pub name: Option<String>,
    pub zone: ZoneId,
    pub connection: ConnectionState,
    pub health: HealthFlags,
    pub registered_at: DateTime<Utc>,
    /// When the current session opened.
    pub connected_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub battery: Option<u8>,
    pub signal_strength: Option<i32>,
    pub crowd_density: Option<f64>,
    pub crowd_count: Option<u32>,
    pub network_type: Option<String>,
    pub uptime_seconds: Option<u64>,
    /// Message the sign last confirmed it is showing.
    pub current_message: Option<MessageId>,
    /// Messages sent and not yet acknowledged.
    pub pending_acks: BTreeSet<MessageId>,
}

impl Sign {
    pub fn new(id: SignId, zone: ZoneId, name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            zone,
            connection: ConnectionState::Offline,
            health: HealthFlags::default(),
            registered_at: now,
            connected_at: None,
            last_heartbeat: None,
            battery: None,
            signal_strength: None,
            crowd_density: None,
            crowd_count: None,
            network_type: None,
            uptime_seconds: None,
            current_message: None,
            pending_acks: BTreeSet::new(),
        }
    }

    pub fn status(&self) -> SignStatus {
        match self.connection {
            ConnectionState::Connecting => SignStatus::Connecting,
            ConnectionState::Offline => SignStatus::Offline,
            ConnectionState::Online if self.health.any() => SignStatus::Warning,
            ConnectionState::Online => SignStatus::Online,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.connection == ConnectionState::Offline
    }

    /// Last sign of life: the latest heartbeat, or the session opening.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        match (self.last_heartbeat, self.connected_at) {
            (Some(hb), Some(open)) => Some(hb.max(open)),
            (hb, open) => hb.or(open),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sign() -> Sign {
        Sign::new(
            "s1".into(),
            "A".into(),
            None,
            "2026-07-04T18:00:00Z".parse().unwrap(),
        )
    }

    #[test]
    fn new_sign_starts_offline() {
        let s = sign();
        assert_eq!(s.status(), SignStatus::Offline);
        assert!(s.last_seen().is_none());
        assert_eq!(s.display_name(), "s1");
    }

    #[test]
    fn health_flag_turns_online_into_warning() {
        let mut s = sign();
        s.connection = ConnectionState::Online;
        assert_eq!(s.status(), SignStatus::Online);

        s.health.battery_low = true;
        assert_eq!(s.status(), SignStatus::Warning);

        s.connection = ConnectionState::Offline;
        assert_eq!(s.status(), SignStatus::Offline);
    }

    #[test]
    fn last_seen_prefers_latest() {
        let mut s = sign();
        let open: DateTime<Utc> = "2026-07-04T18:00:00Z".parse().unwrap();
        let hb: DateTime<Utc> = "2026-07-04T18:00:05Z".parse().unwrap();
        s.connected_at = Some(open);
        assert_eq!(s.last_seen(), Some(open));
        s.last_heartbeat = Some(hb);
        assert_eq!(s.last_seen(), Some(hb));
    }
}
