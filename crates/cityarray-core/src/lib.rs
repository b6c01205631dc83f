//! Server-side synchronization core for CITYARRAY signs.
//!
//! This crate decides what every sign should be showing and gets it there
//! over links that come and go:
//!
//! - **[`Hub`]**: Central facade. Owns every component below, runs the
//!   sweep and scheduler tasks after [`start()`](Hub::start), and routes
//!   sign frames and operator [`Command`]s to the right component.
//!
//! - **[`SignRegistry`]**: Indexed table of signs: reactive status
//!   records (`DashMap` + `tokio::sync::watch` snapshots) alongside each
//!   sign's live session handle.
//!
//! - **[`DeliveryChannel`]**: Per-sign acknowledged delivery with
//!   retries, offline queueing, supersession and expiry.
//!
//! - **[`Scheduler`]** / **[`Arbitrator`]**: The scheduler picks each
//!   zone's active entry on a fixed cadence; the arbitrator layers
//!   operator overrides on top and is the single writer of every sign's
//!   display slot.
//!
//! - **[`DisplayDecider`]**: "What should this sign show now", answered
//!   by the hub while connected and by the sign agent while cut off.
//!
//! Every clock-dependent operation takes `now` explicitly, so behavior is
//! deterministic under test.

pub mod arbitrator;
pub mod collaborators;
pub mod command;
pub mod config;
pub mod convert;
pub mod delivery;
pub mod display;
pub mod error;
pub mod event;
pub mod hub;
pub mod liveness;
pub mod model;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use arbitrator::Arbitrator;
pub use collaborators::{
    Alerting, AuditEvent, BraceRenderer, Collaborators, DataFeed, MemoryPersistence,
    NullPersistence, Persistence, StaticFeed, TemplateRenderer, TracingAlerting,
    fill_placeholders,
};
pub use command::{Command, CommandResult};
pub use config::HubConfig;
pub use delivery::{DeliveryChannel, DeliveryRecord, SweepReport};
pub use display::{Decision, DecisionSource, DisplayDecider};
pub use error::CoreError;
pub use event::{DashboardEvent, WarningKind};
pub use hub::{Hub, HubState, SweepSummary};
pub use liveness::LivenessTracker;
pub use scheduler::{Emission, Scheduler};
pub use session::{SessionHandle, SessionId, SessionOutbox};
pub use store::SignRegistry;
pub use stream::SignStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ArbiterState, Band, Blackout, ConnectionState, ExpiryReason, HealthFlags, Lifecycle, Message,
    MessageId, MessageSource, Override, OverrideId, OverrideMode, OverrideRequest, Priority,
    Role, ScheduleEntry, ScheduleId, Sign, SignId, SignStatus, Targets, TemplateId, TimeWindow,
    ZoneId, ZoneSelector, select_active,
};
