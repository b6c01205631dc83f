//! CLI error types with miette diagnostics.
//!
//! Maps config, core and agent errors into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use cityarray_agent::AgentError;
use cityarray_config::ConfigError;
use cityarray_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(cityarray::validation),
        help("Check the config file, or run: cityarray config show")
    )]
    Validation { field: String, reason: String },

    #[error("Could not load configuration")]
    #[diagnostic(
        code(cityarray::config),
        help(
            "Create one with: cityarray config init\n\
             Environment overrides use CITYARRAY_<SECTION>__<KEY>."
        )
    )]
    Config(#[source] ConfigError),

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(cityarray::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Network ──────────────────────────────────────────────────────

    #[error("Could not listen on {addr}")]
    #[diagnostic(
        code(cityarray::bind_failed),
        help("Is another hub already running? Pick a different address with --listen.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Hub link failed: {message}")]
    #[diagnostic(
        code(cityarray::link_failed),
        help("Check that the hub is running and agent.server points at it.")
    )]
    Link { message: String },

    // ── Runtime ──────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(cityarray::hub))]
    Core(CoreError),

    #[error(transparent)]
    #[diagnostic(code(cityarray::agent))]
    Agent(AgentError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render config: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config(_) | Self::ConfigExists { .. } => exit_code::CONFIG,
            Self::Bind { .. } | Self::Link { .. } => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Lower-layer mapping ──────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConfigInvalid { message } => Self::Validation {
                field: "hub".into(),
                reason: message,
            },
            other => Self::Core(other),
        }
    }
}

impl From<AgentError> for CliError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Config { message } => Self::Validation {
                field: "agent".into(),
                reason: message,
            },
            AgentError::Link(cityarray_proto::Error::InvalidUrl(e)) => Self::Validation {
                field: "agent.server".into(),
                reason: e.to_string(),
            },
            AgentError::Link(e) => Self::Link {
                message: e.to_string(),
            },
            other => Self::Agent(other),
        }
    }
}
