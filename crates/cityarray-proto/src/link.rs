//! WebSocket link between a sign and the hub.
//!
//! The sign side dials `ws://<host>/ws/sign/<sign_id>?zone=<zone>` through
//! [`SignLink`]; the hub side upgrades raw TCP streams with [`accept`],
//! which also reports which [`Endpoint`] the peer asked for. Reconnection
//! policy lives with the caller: this module only supplies the
//! [`ReconnectConfig`] and [`calculate_backoff`] it should follow.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::wire::{self, SignCommand, SignEvent};

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for sign reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
///
/// The jitter phase comes from `seed` (see [`backoff_seed`]), so signs
/// dropped by the same outage retry at different moments while each
/// sign's own sequence stays reproducible.
pub fn calculate_backoff(attempt: u32, seed: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let phase = f64::from(attempt) * 7.3 + f64::from(seed % 10_007) * 0.618;
    let jitter_factor = 1.0 + 0.25 * phase.sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

/// Stable jitter seed for a sign id (FNV-1a).
pub fn backoff_seed(key: &str) -> u32 {
    key.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

// ── Endpoint ─────────────────────────────────────────────────────────

/// What a WebSocket peer asked to connect as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `/ws/sign/<sign_id>?zone=<zone>&name=<name>`
    Sign {
        sign_id: String,
        zone: Option<String>,
        name: Option<String>,
    },
    /// `/ws/dashboard`
    Dashboard,
}

impl Endpoint {
    /// Parse a request target (path plus optional query).
    pub fn parse(target: &str) -> Result<Self, Error> {
        let url = Url::parse("ws://hub.invalid/")?.join(target)?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            ["ws", "sign", sign_id] => {
                let query = |key: &str| {
                    url.query_pairs()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| v.into_owned())
                        .filter(|v| !v.is_empty())
                };
                Ok(Self::Sign {
                    sign_id: (*sign_id).to_owned(),
                    zone: query("zone"),
                    name: query("name"),
                })
            }
            ["ws", "dashboard"] => Ok(Self::Dashboard),
            _ => Err(Error::UnknownEndpoint {
                path: target.to_owned(),
            }),
        }
    }
}

/// Build the URL a sign dials: `<base>/ws/sign/<sign_id>?zone=<zone>`.
pub fn sign_url(base: &Url, sign_id: &str, zone: Option<&str>) -> Result<Url, Error> {
    let mut url = base.join(&format!("/ws/sign/{sign_id}"))?;
    if let Some(zone) = zone {
        url.query_pairs_mut().append_pair("zone", zone);
    }
    Ok(url)
}

// ── Sign side ────────────────────────────────────────────────────────

/// A connected sign → hub link. Dropping it closes the socket.
pub struct SignLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SignLink {
    /// Dial the hub. Fails with [`Error::WebSocketConnect`] when the
    /// upgrade cannot complete and [`Error::ConnectTimeout`] when it does
    /// not complete within `timeout`.
    pub async fn connect(url: &Url, timeout: Duration) -> Result<Self, Error> {
        tracing::info!(url = %url, "Connecting to hub");

        let (stream, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| Error::ConnectTimeout(timeout))?
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("Hub link established");
        Ok(Self { stream })
    }

    /// Send one frame to the hub.
    pub async fn send(&mut self, event: &SignEvent) -> Result<(), Error> {
        let text = wire::encode(event)?;
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| Error::WebSocketSend(e.to_string()))
    }

    /// Wait for the next hub command.
    ///
    /// Undecodable frames are logged and skipped. Returns `Ok(None)` when
    /// the hub closes the link cleanly. Cancel safe.
    pub async fn next_command(&mut self) -> Result<Option<SignCommand>, Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match wire::decode_command(text.as_str()) {
                    Ok(cmd) => return Ok(Some(cmd)),
                    Err(e) => tracing::debug!(error = %e, "Skipping undecodable hub frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(cf) => Err(Error::WebSocketClosed {
                            code: u16::from(cf.code),
                            reason: cf.reason.to_string(),
                        }),
                        None => Ok(None),
                    };
                }
                Some(Ok(_)) => {
                    // Ping/Pong/Binary -- tungstenite answers pings itself
                }
                Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    /// Close the link with a normal close frame.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Close handshake failed");
        }
    }
}

// ── Hub side ─────────────────────────────────────────────────────────

/// Complete the server-side WebSocket upgrade and report the requested
/// endpoint. Unknown paths are upgraded and then rejected with
/// [`Error::UnknownEndpoint`]; the caller drops the stream.
pub async fn accept<S>(stream: S) -> Result<(Endpoint, WebSocketStream<S>), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut target = String::new();
    let callback = |req: &Request, resp: Response| {
        target = req.uri().to_string();
        Ok::<_, ErrorResponse>(resp)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let endpoint = Endpoint::parse(&target)?;
    Ok((endpoint, ws))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let seed = backoff_seed("s1");
        let d0 = calculate_backoff(0, seed, &config);
        let d1 = calculate_backoff(1, seed, &config);
        let d2 = calculate_backoff(2, seed, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };

        // Jitter factor tops out at 1.25
        let d10 = calculate_backoff(10, 7, &config);
        assert!(d10 <= Duration::from_millis(12_500), "{d10:?}");
        let d_huge = calculate_backoff(u32::MAX, u32::MAX, &config);
        assert!(d_huge <= Duration::from_millis(12_500), "{d_huge:?}");
    }

    #[test]
    fn backoff_is_reproducible() {
        let config = ReconnectConfig::default();
        let seed = backoff_seed("gate-3");
        assert_eq!(
            calculate_backoff(3, seed, &config),
            calculate_backoff(3, seed, &config)
        );
    }

    #[test]
    fn signs_dropped_together_retry_apart() {
        let config = ReconnectConfig::default();
        let delays: Vec<Duration> = ["gate-1", "gate-2", "gate-3", "stage-left"]
            .iter()
            .map(|id| calculate_backoff(2, backoff_seed(id), &config))
            .collect();
        for (i, a) in delays.iter().enumerate() {
            for b in &delays[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[tokio::test]
    async fn silent_upgrade_times_out() {
        // Accepts TCP but never answers the upgrade request
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/ws/sign/s1", listener.local_addr().unwrap())).unwrap();
        let held = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let result = SignLink::connect(&url, Duration::from_millis(100)).await;
        let err = result.err().unwrap();
        assert!(matches!(err, Error::ConnectTimeout(_)), "{err}");
        assert!(err.is_transient());
        held.abort();
    }

    #[test]
    fn parse_sign_endpoint_with_zone() {
        let endpoint = Endpoint::parse("/ws/sign/sign-07?zone=north&name=Gate%207").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Sign {
                sign_id: "sign-07".into(),
                zone: Some("north".into()),
                name: Some("Gate 7".into()),
            }
        );
    }

    #[test]
    fn parse_sign_endpoint_without_query() {
        let endpoint = Endpoint::parse("/ws/sign/s1").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Sign {
                sign_id: "s1".into(),
                zone: None,
                name: None,
            }
        );
    }

    #[test]
    fn parse_dashboard_endpoint() {
        assert_eq!(Endpoint::parse("/ws/dashboard").unwrap(), Endpoint::Dashboard);
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        assert!(matches!(
            Endpoint::parse("/api/signs"),
            Err(Error::UnknownEndpoint { .. })
        ));
        assert!(Endpoint::parse("/ws/sign/").is_err());
    }

    #[test]
    fn sign_url_appends_zone() {
        let base = Url::parse("ws://10.0.0.5:8000").unwrap();
        let url = sign_url(&base, "s1", Some("main stage")).unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.5:8000/ws/sign/s1?zone=main+stage");
    }
}
