//! Configuration for the CITYARRAY hub and sign agent.
//!
//! One TOML file serves both roles: `[hub]` and `[agent]` sections,
//! message `[templates]`, zone `[[blackouts]]` and the standing
//! `[[schedule]]`. Loaded through figment (defaults, then file, then
//! `CITYARRAY_` environment variables) and translated into the runtime
//! configs `cityarray_core::HubConfig` and `cityarray_agent::AgentConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cityarray_agent::AgentConfig;
use cityarray_core::{
    Blackout, BraceRenderer, HubConfig, ScheduleEntry, TimeWindow, ZoneSelector,
};
use cityarray_proto::ReconnectConfig;
use cityarray_proto::wire::{SchedulePayload, WindowPayload};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl ToString) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.to_string(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubSection,

    #[serde(default)]
    pub agent: AgentSection,

    /// Template id → body with `{placeholder}` slots.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,

    #[serde(default)]
    pub blackouts: Vec<BlackoutSection>,

    #[serde(default)]
    pub schedule: Vec<ScheduleSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HubSection {
    /// Address the WebSocket listener binds.
    pub listen: String,
    pub heartbeat_interval_secs: u64,
    pub timeout_multiplier: u32,
    pub ack_timeout_secs: u64,
    pub max_retries: u32,
    pub sweep_interval_ms: u64,
    pub scheduler_tick_secs: u64,
    pub battery_threshold_pct: u8,
    pub signal_floor: i32,
    pub utc_offset_minutes: i32,
    pub default_insert_secs: u64,
    pub record_retention_secs: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        let d = HubConfig::default();
        Self {
            listen: "0.0.0.0:8000".into(),
            heartbeat_interval_secs: d.heartbeat_interval.as_secs(),
            timeout_multiplier: d.timeout_multiplier,
            ack_timeout_secs: d.ack_timeout.as_secs(),
            max_retries: d.max_retries,
            sweep_interval_ms: millis(d.sweep_interval),
            scheduler_tick_secs: d.scheduler_tick.as_secs(),
            battery_threshold_pct: d.battery_threshold_pct,
            signal_floor: d.signal_floor,
            utc_offset_minutes: d.utc_offset_minutes,
            default_insert_secs: d.default_insert_duration.as_secs(),
            record_retention_secs: d.record_retention.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSection {
    pub sign_id: String,
    pub zone: Option<String>,
    pub name: Option<String>,
    /// Hub base URL, e.g. `ws://10.0.0.5:8000`.
    pub server: String,
    pub heartbeat_interval_secs: u64,
    /// Seconds one hub dial may take before it counts as failed.
    pub connect_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_secs: u64,
    /// Failed connects before the sign serves from its cache.
    pub offline_after: u32,
    pub autonomous_tick_secs: u64,
    /// Offline cache file. Defaults to the platform cache directory.
    pub cache_path: Option<PathBuf>,
    pub utc_offset_minutes: i32,
}

impl Default for AgentSection {
    fn default() -> Self {
        let d = AgentConfig::default();
        Self {
            sign_id: d.sign_id.to_string(),
            zone: None,
            name: None,
            server: d.server,
            heartbeat_interval_secs: d.heartbeat_interval.as_secs(),
            connect_timeout_secs: d.connect_timeout.as_secs(),
            reconnect_initial_ms: millis(d.reconnect.initial_delay),
            reconnect_max_secs: d.reconnect.max_delay.as_secs(),
            offline_after: d.offline_after,
            autonomous_tick_secs: d.autonomous_tick.as_secs(),
            cache_path: None,
            utc_offset_minutes: d.utc_offset_minutes,
        }
    }
}

/// A zone-scoped quiet window. Only emergency-band entries show.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlackoutSection {
    /// Zone names; empty means every zone.
    #[serde(default)]
    pub zones: Vec<String>,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WindowSection {
    pub start: String,
    pub end: String,
}

/// A standing schedule entry. Times are `HH:MM` venue time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScheduleSection {
    pub id: String,
    pub template: String,
    #[serde(default)]
    pub zones: Vec<String>,
    pub start: String,
    pub end: String,
    /// Re-emit period while active; 0 emits once per activation.
    #[serde(default)]
    pub every_minutes: u32,
    #[serde(default = "default_show_secs")]
    pub duration_secs: u64,
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Three-letter weekday names (`mon`, `tue`, ...). Absent means daily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blackouts: Vec<WindowSection>,
}

fn default_show_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "cityarray", "cityarray")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("cityarray.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of a sign's offline cache.
pub fn default_cache_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from("cityarray-cache.json"),
        |dirs| dirs.cache_dir().join("sign-cache.json"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from `path` (or the platform config path) plus environment.
///
/// Environment variables use the `CITYARRAY_` prefix with `__` between
/// section and key: `CITYARRAY_HUB__LISTEN=0.0.0.0:9000`.
pub fn load_config_from(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("CITYARRAY_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load from the platform config path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(None)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// A starter config with one sponsor loop, written by `config init`.
    pub fn example() -> Self {
        Self {
            templates: BTreeMap::from([
                ("welcome".into(), "Welcome to {event}!".into()),
                ("sponsor".into(), "Tonight's show presented by {sponsor}".into()),
            ]),
            schedule: vec![ScheduleSection {
                id: "sponsor-loop".into(),
                template: "sponsor".into(),
                zones: Vec::new(),
                start: "18:00".into(),
                end: "23:00".into(),
                every_minutes: 10,
                duration_secs: 30,
                priority: 1,
                enabled: true,
                days: None,
                blackouts: Vec::new(),
            }],
            ..Self::default()
        }
    }

    pub fn to_hub_config(&self) -> Result<HubConfig, ConfigError> {
        let h = &self.hub;
        let config = HubConfig {
            heartbeat_interval: Duration::from_secs(h.heartbeat_interval_secs),
            timeout_multiplier: h.timeout_multiplier,
            ack_timeout: Duration::from_secs(h.ack_timeout_secs),
            max_retries: h.max_retries,
            sweep_interval: Duration::from_millis(h.sweep_interval_ms),
            scheduler_tick: Duration::from_secs(h.scheduler_tick_secs),
            battery_threshold_pct: h.battery_threshold_pct,
            signal_floor: h.signal_floor,
            utc_offset_minutes: h.utc_offset_minutes,
            default_insert_duration: Duration::from_secs(h.default_insert_secs),
            record_retention: Duration::from_secs(h.record_retention_secs),
        };
        config.validate().map_err(|e| invalid("hub", e))?;
        Ok(config)
    }

    pub fn to_agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let a = &self.agent;
        let config = AgentConfig {
            sign_id: a.sign_id.as_str().into(),
            zone: a.zone.as_deref().map(Into::into),
            name: a.name.clone(),
            server: a.server.clone(),
            heartbeat_interval: Duration::from_secs(a.heartbeat_interval_secs),
            connect_timeout: Duration::from_secs(a.connect_timeout_secs),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(a.reconnect_initial_ms),
                max_delay: Duration::from_secs(a.reconnect_max_secs),
            },
            offline_after: a.offline_after,
            autonomous_tick: Duration::from_secs(a.autonomous_tick_secs),
            cache_path: a.cache_path.clone().unwrap_or_else(default_cache_path),
            utc_offset_minutes: a.utc_offset_minutes,
        };
        config.validate().map_err(|e| invalid("agent", e))?;
        Ok(config)
    }

    /// Admit every `[[schedule]]` entry. Each must be well-formed and
    /// name a template defined in `[templates]`.
    pub fn schedule_entries(&self) -> Result<Vec<ScheduleEntry>, ConfigError> {
        self.schedule
            .iter()
            .map(|s| {
                let field = format!("schedule '{}'", s.id);
                if !self.templates.contains_key(&s.template) {
                    return Err(invalid(field, format!("unknown template '{}'", s.template)));
                }
                ScheduleEntry::try_from(&s.to_payload()).map_err(|e| invalid(field, e))
            })
            .collect()
    }

    pub fn blackouts(&self) -> Result<Vec<Blackout>, ConfigError> {
        self.blackouts
            .iter()
            .map(|b| {
                let window = TimeWindow::parse(&b.start, &b.end)
                    .map_err(|e| invalid("blackouts", e))?;
                Ok(Blackout {
                    zones: ZoneSelector::from_names(&b.zones),
                    window,
                })
            })
            .collect()
    }

    /// Renderer preloaded with `[templates]`.
    pub fn renderer(&self) -> BraceRenderer {
        BraceRenderer::new(
            self.templates
                .iter()
                .map(|(id, body)| (id.as_str(), body.as_str())),
        )
    }
}

impl ScheduleSection {
    fn to_payload(&self) -> SchedulePayload {
        SchedulePayload {
            id: self.id.clone(),
            template_id: self.template.clone(),
            zones: self.zones.clone(),
            start_time: self.start.clone(),
            end_time: self.end.clone(),
            frequency_minutes: self.every_minutes,
            duration_secs: self.duration_secs,
            priority: self.priority,
            enabled: self.enabled,
            active_days: self.days.clone(),
            blackouts: self
                .blackouts
                .iter()
                .map(|w| WindowPayload {
                    start: w.start.clone(),
                    end: w.end.clone(),
                })
                .collect(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
