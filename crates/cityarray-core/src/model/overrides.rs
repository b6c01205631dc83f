// ── Override domain types ──

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{OverrideId, SignId, ZoneId};
use super::message::{Message, Priority, Targets};

// ── Role ────────────────────────────────────────────────────────────

/// Issuing role. Zone-scoped roles carry the zone they are limited to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Role {
    Admin,
    EventManager,
    ZoneLead { zone: ZoneId },
    Staff { zone: ZoneId },
}

impl Role {
    /// Admin > Event Manager > Zone Lead > Staff.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Admin => 4,
            Self::EventManager => 3,
            Self::ZoneLead { .. } => 2,
            Self::Staff { .. } => 1,
        }
    }

    /// The zone this role is confined to, if any.
    pub fn scope(&self) -> Option<&ZoneId> {
        match self {
            Self::ZoneLead { zone } | Self::Staff { zone } => Some(zone),
            Self::Admin | Self::EventManager => None,
        }
    }

    /// Whether this role may touch a sign in `zone`.
    pub fn reaches(&self, zone: &ZoneId) -> bool {
        self.scope().is_none_or(|scope| scope == zone)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::EventManager => "event_manager",
            Self::ZoneLead { .. } => "zone_lead",
            Self::Staff { .. } => "staff",
        }
    }
}

// ── Mode ────────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OverrideMode {
    /// Shown once for its duration, then the schedule resumes.
    Insert,
    /// Shown until cancelled; schedule output is held back.
    Replace,
    /// Like Replace, aimed at every sign in reach and alerting.
    Emergency,
}

/// Per-sign arbitration state, derived from what is winning the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArbiterState {
    Normal,
    Inserted,
    Replaced,
    Emergency,
}

impl From<OverrideMode> for ArbiterState {
    fn from(mode: OverrideMode) -> Self {
        match mode {
            OverrideMode::Insert => Self::Inserted,
            OverrideMode::Replace => Self::Replaced,
            OverrideMode::Emergency => Self::Emergency,
        }
    }
}

// ── Request / Override ──────────────────────────────────────────────

/// What an operator asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub role: Role,
    pub mode: OverrideMode,
    pub content: String,
    /// Ignored for Emergency, which reaches every sign the role can.
    pub targets: Targets,
    /// `None` means until cancelled; Insert falls back to the hub default.
    pub duration: Option<Duration>,
    /// Defaults to 80, or 100 for Emergency. Emergency is raised into
    /// the emergency band if given lower.
    pub priority: Option<Priority>,
}

/// An active override. Exists only until cancelled or expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Override {
    pub id: OverrideId,
    pub role: Role,
    pub mode: OverrideMode,
    pub targets: Targets,
    pub message: Message,
    /// Issue order; equal ranks resolve to the higher sequence.
    pub seq: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Override {
    /// Whether this override lands on a sign with the given id and zone.
    pub fn applies_to(&self, sign: &SignId, zone: &ZoneId) -> bool {
        if !self.role.reaches(zone) {
            return false;
        }
        self.mode == OverrideMode::Emergency || self.targets.includes(sign, zone)
    }

    /// Arbitration key; the maximum wins. Emergency first, then role
    /// rank, then the most recent issue.
    pub fn precedence(&self) -> (bool, u8, u64) {
        (
            self.mode == OverrideMode::Emergency,
            self.role.rank(),
            self.seq,
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
