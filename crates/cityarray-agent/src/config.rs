// ── Runtime agent configuration ──
//
// Identity, hub address and timing for one sign. Built by the binary from
// the config crate; the agent itself never reads config files.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use cityarray_core::{SignId, ZoneId};
use cityarray_proto::{ReconnectConfig, sign_url};
use url::Url;

use crate::error::AgentError;

/// Configuration for a [`SignAgent`](crate::SignAgent).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub sign_id: SignId,
    /// Zone to register in. The hub assigns `unassigned` when absent.
    pub zone: Option<ZoneId>,
    /// Human-readable name shown on the dashboard.
    pub name: Option<String>,
    /// Hub base URL, e.g. `ws://10.0.0.5:8000`.
    pub server: String,
    pub heartbeat_interval: Duration,
    /// How long one dial may take before it counts as a failed attempt.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Consecutive failed connects after which the sign stops waiting on
    /// the hub and serves from its cache.
    pub offline_after: u32,
    /// How often the offline decider re-evaluates the cached schedule.
    pub autonomous_tick: Duration,
    /// JSON file holding templates, schedule and queued reports.
    pub cache_path: PathBuf,
    /// Venue time offset used for cached schedule windows.
    pub utc_offset_minutes: i32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sign_id: SignId::from("sign-01"),
            zone: None,
            name: None,
            server: "ws://127.0.0.1:8000".into(),
            heartbeat_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            offline_after: 3,
            autonomous_tick: Duration::from_secs(10),
            cache_path: PathBuf::from("cityarray-cache.json"),
            utc_offset_minutes: 0,
        }
    }
}

impl AgentConfig {
    /// Zone the cached schedule is evaluated for.
    pub fn effective_zone(&self) -> ZoneId {
        self.zone.clone().unwrap_or_else(ZoneId::unassigned)
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    /// The full URL this sign dials.
    pub fn link_url(&self) -> Result<Url, AgentError> {
        let base = Url::parse(&self.server).map_err(cityarray_proto::Error::from)?;
        let mut url = sign_url(
            &base,
            self.sign_id.as_str(),
            self.zone.as_ref().map(ZoneId::as_str),
        )?;
        if let Some(name) = &self.name {
            url.query_pairs_mut().append_pair("name", name);
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.sign_id.as_str().trim().is_empty() {
            return Err(invalid("sign_id must not be empty"));
        }
        if self.heartbeat_interval.is_zero() || self.autonomous_tick.is_zero() {
            return Err(invalid("heartbeat and autonomous intervals must be positive"));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout must be positive"));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(invalid("utc_offset_minutes must be within one day"));
        }
        self.link_url().map(|_| ())
    }
}

fn invalid(message: &str) -> AgentError {
    AgentError::Config {
        message: message.to_owned(),
    }
}
