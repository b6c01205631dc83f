use thiserror::Error;

/// Top-level error type for the `cityarray-proto` crate.
///
/// Covers frame encoding/decoding and the WebSocket link in both
/// directions. `cityarray-core` and `cityarray-agent` map these into
/// their own domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// WebSocket connection could not be established.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The hub accepted the connection but did not finish the upgrade.
    #[error("Hub did not answer within {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// WebSocket closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Writing a frame to the socket failed.
    #[error("WebSocket send failed: {0}")]
    WebSocketSend(String),

    /// Request path did not name a sign or dashboard endpoint.
    #[error("Unrecognized endpoint: {path}")]
    UnknownEndpoint { path: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON frame could not be decoded, with the raw frame for debugging.
    #[error("Frame decode error: {message}")]
    Decode { message: String, frame: String },

    /// A frame could not be encoded.
    #[error("Frame encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this is a transient link failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::ConnectTimeout(_)
                | Self::WebSocketClosed { .. }
                | Self::WebSocketSend(_)
        )
    }
}
