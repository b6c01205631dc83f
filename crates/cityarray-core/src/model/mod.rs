// ── Domain model ──
//
// Canonical types shared by the hub's components. Wire types live in
// `cityarray-proto`; `convert` maps between the two.

pub mod ids;
pub mod message;
pub mod overrides;
pub mod schedule;
pub mod sign;

// ── Re-exports ──────────────────────────────────────────────────────

pub use ids::{MessageId, OverrideId, ScheduleId, SignId, TemplateId, ZoneId};
pub use message::{Band, ExpiryReason, Lifecycle, Message, MessageSource, Priority, Targets};
pub use overrides::{ArbiterState, Override, OverrideMode, OverrideRequest, Role};
pub use schedule::{
    Blackout, ScheduleEntry, TimeWindow, ZoneSelector, parse_hhmm, select_active,
};
pub use sign::{ConnectionState, HealthFlags, Sign, SignStatus};
