// ── Message domain types ──

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{MessageId, OverrideId, ScheduleId, SignId, TemplateId, ZoneId};
use super::overrides::OverrideMode;
use crate::error::CoreError;

// ── Priority ────────────────────────────────────────────────────────

/// Message priority, 0 through 100. The band decides preemption rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

/// Priority bands, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Band {
    Informational,
    Caution,
    Emergency,
}

impl Priority {
    pub const MAX: Self = Self(100);
    pub const EMERGENCY_FLOOR: Self = Self(90);
    pub const CAUTION_FLOOR: Self = Self(70);

    pub fn new(value: u8) -> Result<Self, CoreError> {
        if value > 100 {
            return Err(CoreError::invalid(format!(
                "priority {value} is outside 0-100"
            )));
        }
        Ok(Self(value))
    }

    /// Clamp into range. For values from peers that are trusted but not
    /// validated, like a hub payload read back on a sign.
    pub const fn saturating(value: u8) -> Self {
        if value > 100 { Self(100) } else { Self(value) }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn band(self) -> Band {
        match self.0 {
            90.. => Band::Emergency,
            70..=89 => Band::Caution,
            _ => Band::Informational,
        }
    }

    pub fn is_emergency(self) -> bool {
        self.band() == Band::Emergency
    }
}

impl TryFrom<u8> for Priority {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Targets ─────────────────────────────────────────────────────────

/// Which signs a message or override is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Targets {
    /// Every registered sign.
    All,
    /// Union of the named signs and every sign in the named zones.
    Selected {
        #[serde(default)]
        signs: BTreeSet<SignId>,
        #[serde(default)]
        zones: BTreeSet<ZoneId>,
    },
}

impl Targets {
    pub fn signs(signs: impl IntoIterator<Item = SignId>) -> Self {
        Self::Selected {
            signs: signs.into_iter().collect(),
            zones: BTreeSet::new(),
        }
    }

    pub fn zones(zones: impl IntoIterator<Item = ZoneId>) -> Self {
        Self::Selected {
            signs: BTreeSet::new(),
            zones: zones.into_iter().collect(),
        }
    }

    /// Whether a sign with this id and zone is targeted.
    pub fn includes(&self, sign: &SignId, zone: &ZoneId) -> bool {
        match self {
            Self::All => true,
            Self::Selected { signs, zones } => signs.contains(sign) || zones.contains(zone),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::All => false,
            Self::Selected { signs, zones } => signs.is_empty() && zones.is_empty(),
        }
    }
}

// ── Message ─────────────────────────────────────────────────────────

/// Where a message came from. Decides the wire command used to carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageSource {
    /// Emitted by the priority scheduler.
    Schedule { entry: ScheduleId },
    /// Carried by an override.
    Override { id: OverrideId, mode: OverrideMode },
    /// Sent directly by an operator.
    Direct,
}

/// A rendered template instance or literal operator text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub priority: Priority,
    pub targets: Targets,
    /// Required display duration; `None` means until replaced.
    pub duration: Option<Duration>,
    pub template_id: Option<TemplateId>,
    pub source: MessageSource,
    pub issued_at: DateTime<Utc>,
}

impl Message {
    /// Instant after which an undisplayed copy is useless.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration.and_then(|d| after(self.issued_at, d))
    }

    /// Same content under a fresh id, issued at `now`. Used when content
    /// regains a sign so the sign treats it as new.
    pub fn reissue(&self, now: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            issued_at: now,
            ..self.clone()
        }
    }

    pub fn override_id(&self) -> Option<OverrideId> {
        match self.source {
            MessageSource::Override { id, .. } => Some(id),
            _ => None,
        }
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────

/// Per-sign delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Lifecycle {
    Queued,
    Sent,
    Acknowledged,
    Expired,
}

impl Lifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Expired)
    }
}

/// Why a delivery record expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExpiryReason {
    /// Newer content was delivered to the sign first.
    Superseded,
    /// The override carrying it ended.
    Cancelled,
    /// The display duration passed before the sign showed it.
    DurationElapsed,
}

/// `t + d`, or `None` if that is not representable.
pub(crate) fn after(t: DateTime<Utc>, d: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| t.checked_add_signed(delta))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn priority_bands() {
        assert_eq!(Priority::new(100).unwrap().band(), Band::Emergency);
        assert_eq!(Priority::new(90).unwrap().band(), Band::Emergency);
        assert_eq!(Priority::new(89).unwrap().band(), Band::Caution);
        assert_eq!(Priority::new(70).unwrap().band(), Band::Caution);
        assert_eq!(Priority::new(69).unwrap().band(), Band::Informational);
        assert_eq!(Priority::new(0).unwrap().band(), Band::Informational);
        assert!(Priority::new(101).is_err());
    }

    #[test]
    fn priority_rejects_out_of_range_json() {
        assert!(serde_json::from_str::<Priority>("101").is_err());
        assert_eq!(serde_json::from_str::<Priority>("80").unwrap().value(), 80);
    }

    #[test]
    fn targets_union_signs_and_zones() {
        let targets = Targets::Selected {
            signs: [SignId::from("s9")].into(),
            zones: [ZoneId::from("A")].into(),
        };
        assert!(targets.includes(&SignId::from("s9"), &ZoneId::from("B")));
        assert!(targets.includes(&SignId::from("s1"), &ZoneId::from("A")));
        assert!(!targets.includes(&SignId::from("s1"), &ZoneId::from("B")));
        assert!(Targets::All.includes(&SignId::from("s1"), &ZoneId::from("B")));
    }

    #[test]
    fn reissue_mints_new_id() {
        let now: DateTime<Utc> = "2026-07-04T19:00:00Z".parse().unwrap();
        let msg = Message {
            id: MessageId::new(),
            content: "Welcome".into(),
            priority: Priority::new(1).unwrap(),
            targets: Targets::All,
            duration: Some(Duration::from_secs(30)),
            template_id: None,
            source: MessageSource::Direct,
            issued_at: now,
        };
        let later = now + TimeDelta::minutes(5);
        let again = msg.reissue(later);
        assert_ne!(again.id, msg.id);
        assert_eq!(again.content, msg.content);
        assert_eq!(again.expires_at(), Some(later + TimeDelta::seconds(30)));
    }

    #[test]
    fn lifecycle_terminal_states() {
        assert!(!Lifecycle::Queued.is_terminal());
        assert!(!Lifecycle::Sent.is_terminal());
        assert!(Lifecycle::Acknowledged.is_terminal());
        assert!(Lifecycle::Expired.is_terminal());
        assert_eq!(Lifecycle::Acknowledged.to_string(), "acknowledged");
    }
}
