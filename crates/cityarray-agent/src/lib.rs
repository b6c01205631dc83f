//! Sign-side agent for CITYARRAY.
//!
//! A sign keeps showing sensible content whether or not its hub is
//! reachable:
//!
//! - **[`SignAgent`]**: Async runtime. Dials the hub, acks what it is
//!   sent, heartbeats, and reconnects with backoff.
//! - **[`AgentCore`]**: Pure state machine behind it: link state,
//!   server mirror, local emergencies and offline reports.
//! - **[`LocalCache`]**: Templates and schedule from the last
//!   `cache_sync`, persisted as JSON.
//! - **[`LocalCommand`]**: The fixed console vocabulary usable with no
//!   network path.
//!
//! On reconnect the hub's content always replaces anything the sign
//! chose for itself.

pub mod cache;
pub mod config;
pub mod decider;
pub mod emergency;
pub mod error;
pub mod machine;
pub mod runtime;
pub mod state;

pub use cache::{CacheContents, LocalCache, PendingReport};
pub use config::AgentConfig;
pub use decider::{AutonomousDecider, ServerMirror};
pub use emergency::{EmergencyTemplate, LocalCommand};
pub use error::AgentError;
pub use machine::{AgentCore, Outcome, Screen};
pub use runtime::{DisplaySink, FixedStatus, SignAgent, StatusProbe, TracingDisplay};
pub use state::LinkState;
