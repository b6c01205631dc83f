use std::path::PathBuf;

use thiserror::Error;

/// Error type for the sign agent.
///
/// Link failures are retried by the runtime and only surface when they
/// are permanent (a malformed hub URL, say). Cache problems surface
/// because a sign that cannot persist its offline cache should say so.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Transport or framing failure on the hub link.
    #[error(transparent)]
    Link(#[from] cityarray_proto::Error),

    /// Invalid domain data (bad priority, schedule entry, config value).
    #[error(transparent)]
    Core(#[from] cityarray_core::CoreError),

    /// The cache file could not be read or written.
    #[error("Cache I/O error at {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache file exists but is not valid JSON.
    #[error("Corrupt cache file {path}: {source}")]
    CacheCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Typed at the offline console but not in the local vocabulary.
    #[error("Unknown local command '{input}'")]
    UnknownCommand { input: String },

    /// Agent configuration rejected before start.
    #[error("Invalid agent configuration: {message}")]
    Config { message: String },
}
