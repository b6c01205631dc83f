// ── WebSocket front end ──
//
// Accepts sockets and hands each one to the hub. A sign socket pumps its
// session outbox onto the wire and feeds incoming frames to the hub in
// arrival order. A dashboard socket receives a snapshot of every sign,
// then each hub event as JSON. Dashboards also send operator commands,
// answered with a `command_result` or `command_error` frame.

use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cityarray_core::{Command, CommandResult, Hub, Sign, SignId, ZoneId};
use cityarray_proto::link::{self, Endpoint};
use cityarray_proto::wire;

/// Accept connections until `cancel` fires.
pub async fn run(hub: Hub, listener: TcpListener, cancel: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening for signs and dashboards");
    }

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "socket accepted");
                    tokio::spawn(connection(hub.clone(), stream, cancel.child_token()));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

async fn connection(hub: Hub, stream: TcpStream, cancel: CancellationToken) {
    let (endpoint, ws) = match link::accept(stream).await {
        Ok(accepted) => accepted,
        Err(e) => {
            debug!(error = %e, "rejected websocket upgrade");
            return;
        }
    };

    match endpoint {
        Endpoint::Sign {
            sign_id,
            zone,
            name,
        } => sign_socket(&hub, SignId::from(sign_id.as_str()), zone, name, ws, &cancel).await,
        Endpoint::Dashboard => dashboard_socket(&hub, ws, &cancel).await,
    }
}

// ── Sign sockets ─────────────────────────────────────────────────────

async fn sign_socket(
    hub: &Hub,
    sign_id: SignId,
    zone: Option<String>,
    name: Option<String>,
    ws: WebSocketStream<TcpStream>,
    cancel: &CancellationToken,
) {
    let mut outbox = hub.open_session(
        &sign_id,
        zone.as_deref().map(ZoneId::from),
        name,
        Utc::now(),
    );
    let session = outbox.id();
    let (mut sink, mut frames) = ws.split();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            command = outbox.recv() => {
                // None: the hub replaced or dropped this session
                let Some(command) = command else { break };
                let text = match wire::encode(&command) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(sign_id = %sign_id, error = %e, "failed to encode command");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    debug!(sign_id = %sign_id, error = %e, "sign socket write failed");
                    break;
                }
            }

            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = hub.handle_frame(&sign_id, session, text.as_str(), Utc::now()) {
                        debug!(sign_id = %sign_id, error = %e, "frame rejected");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(sign_id = %sign_id, error = %e, "sign socket read failed");
                    break;
                }
            },
        }
    }

    hub.close_session(&sign_id, session, Utc::now());
    let _ = sink.close().await;
}

// ── Dashboard sockets ────────────────────────────────────────────────

/// Frames the hub writes to a dashboard besides hub events.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply<'a> {
    Snapshot { signs: &'a [Arc<Sign>] },
    CommandResult { result: &'a CommandResult },
    CommandError { error: String },
}

/// Read-only requests a dashboard can make alongside commands.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Query {
    GetAllSigns,
}

async fn dashboard_socket(hub: &Hub, ws: WebSocketStream<TcpStream>, cancel: &CancellationToken) {
    let mut events = hub.events();
    let (mut sink, mut frames) = ws.split();

    // Current fleet first, then live events
    let signs = hub.signs();
    let [connecting, online, warning, offline] = signs.tally();
    debug!(connecting, online, warning, offline, "dashboard attached");
    if let Some(text) = encode_reply(&Reply::Snapshot {
        signs: signs.current(),
    }) {
        if sink.send(Message::text(text)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            event = events.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&*event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "failed to encode dashboard event");
                            continue;
                        }
                    };
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "dashboard fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            },

            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Some(reply) = dashboard_request(hub, text.as_str()).await else {
                        continue;
                    };
                    if sink.send(Message::text(reply)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sink.close().await;
    debug!("dashboard detached");
}

/// Answer one dashboard frame: a query or an operator command.
async fn dashboard_request(hub: &Hub, text: &str) -> Option<String> {
    if let Ok(Query::GetAllSigns) = serde_json::from_str::<Query>(text) {
        let signs = hub.signs_snapshot();
        return encode_reply(&Reply::Snapshot { signs: &signs });
    }

    match serde_json::from_str::<Command>(text) {
        Ok(command) => {
            info!(?command, "dashboard command");
            match hub.execute(command).await {
                Ok(result) => encode_reply(&Reply::CommandResult { result: &result }),
                Err(e) => encode_reply(&Reply::CommandError {
                    error: e.to_string(),
                }),
            }
        }
        Err(e) => {
            debug!(error = %e, "undecodable dashboard frame");
            encode_reply(&Reply::CommandError {
                error: format!("unrecognized request: {e}"),
            })
        }
    }
}

fn encode_reply(reply: &Reply<'_>) -> Option<String> {
    serde_json::to_string(reply)
        .inspect_err(|e| warn!(error = %e, "failed to encode dashboard reply"))
        .ok()
}
