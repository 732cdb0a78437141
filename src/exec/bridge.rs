//! Terminal bridge: browser websocket ⇄ hijacked exec socket.
//!
//! # Responsibilities
//! - Validate `id`, `cmd`, `w`, `h` before upgrading
//! - Drive the engine to `Relaying` with the initial size applied
//! - Pump websocket frames into the relay and relay output back as binary frames
//! - Turn `{"resize":{...}}` text frames into resize calls (last one wins)
//!
//! # Design Decisions
//! - An in-memory duplex pipe sits between the websocket and the relay, so
//!   the relay only ever sees byte streams
//! - Client gone ⇒ the relay is dropped, which closes the cluster socket
//! - Remote done ⇒ buffered output is flushed, then close 1000, or 1011 with
//!   the reason when the relay was torn down
//! - Flushing and closing share the engine's drain window; a browser that
//!   stops reading does not pin the session

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    Extension,
    response::{IntoResponse, Response},
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::exec::engine::HijackEngine;
use crate::exec::session::{ExecSession, ExecState, SessionState, TerminalSize};
use crate::http::middleware::AccessContext;
use crate::http::server::AppState;
use crate::observability::metrics::record_exec_outcome;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_INTERNAL: u16 = 1011;

/// Close reasons are capped at 123 bytes by the websocket protocol.
const MAX_CLOSE_REASON: usize = 123;

const OUTPUT_CHUNK: usize = 8 * 1024;

/// Query parameters of `GET /api/exec`.
#[derive(Debug, Default, Deserialize)]
pub struct ExecQuery {
    pub id: Option<String>,
    /// Comma separated argument vector.
    pub cmd: Option<String>,
    pub w: Option<u16>,
    pub h: Option<u16>,
}

impl ExecQuery {
    pub fn session(&self) -> Result<ExecSession, GatewayError> {
        let id = self
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::BadRequest("missing container id".to_string()))?;

        let cmd: Vec<String> = self
            .cmd
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|arg| !arg.is_empty())
            .map(str::to_string)
            .collect();

        let default = TerminalSize::default();
        let size = TerminalSize::new(
            self.w.filter(|w| *w > 0).unwrap_or(default.width),
            self.h.filter(|h| *h > 0).unwrap_or(default.height),
        );

        Ok(ExecSession::new(id, cmd, size)?)
    }
}

#[derive(Deserialize)]
struct ResizeMessage {
    resize: TerminalSize,
}

/// Recognize a resize control frame.
pub fn parse_resize(text: &str) -> Option<TerminalSize> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    serde_json::from_str::<ResizeMessage>(text)
        .ok()
        .map(|m| m.resize)
        .filter(TerminalSize::is_valid)
}

/// `GET /api/exec?id=&cmd=&w=&h=`
pub async fn exec_handler(
    State(state): State<AppState>,
    Query(query): Query<ExecQuery>,
    access: Option<Extension<AccessContext>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let session = match query.session() {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected exec request");
            return e.into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let user = access.and_then(|Extension(ctx)| ctx.username);
    tracing::info!(
        container = %session.container_id(),
        user = user.as_deref().unwrap_or("-"),
        "Exec terminal requested"
    );

    let engine = state.engine.clone();
    let buffer = state.bridge_buffer;
    ws.on_upgrade(move |socket| run_bridge(socket, engine, session, buffer))
}

/// Drive one exec session over an upgraded websocket.
pub async fn run_bridge(socket: WebSocket, engine: HijackEngine, session: ExecSession, buffer: usize) {
    let state = SessionState::new();
    let drain = engine.drain_timeout();
    let (mut ws_tx, ws_rx) = socket.split();

    let connection = match engine.open(&session, &state).await {
        Ok(conn) => conn,
        Err(e) => {
            record_exec_outcome("rejected");
            send_close(&mut ws_tx, CLOSE_INTERNAL, &e.to_string(), drain).await;
            return;
        }
    };
    let exec_id = connection.exec_id().to_string();

    let (bridge_side, relay_side) = tokio::io::duplex(buffer);
    let (relay_in, relay_out) = tokio::io::split(relay_side);
    let (bridge_rd, bridge_wr) = tokio::io::split(bridge_side);

    let (resize_tx, resize_rx) = watch::channel(None::<TerminalSize>);
    let resizer = tokio::spawn(apply_resizes(engine.clone(), exec_id.clone(), resize_rx));

    let mut relay = Box::pin(connection.relay(relay_in, relay_out, &state));
    let finished = {
        let inbound = pump_inbound(ws_rx, bridge_wr, resize_tx);
        let outbound = pump_outbound(bridge_rd, &mut ws_tx);
        tokio::pin!(inbound);
        tokio::pin!(outbound);

        let finished = tokio::select! {
            biased;
            result = &mut relay => Some(result),
            _ = &mut inbound => None,
            _ = &mut outbound => None,
        };
        if finished.is_some() {
            // The relay dropped its pipe ends; drain what is still buffered.
            if tokio::time::timeout(drain, &mut outbound).await.is_err() {
                tracing::debug!(exec_id = %exec_id, after = ?drain, "Websocket stalled while flushing output");
            }
        }
        finished
    };

    match finished {
        Some(result) => {
            match result {
                Ok(_) => {
                    record_exec_outcome("closed");
                    send_close(&mut ws_tx, CLOSE_NORMAL, "", drain).await;
                }
                Err(e) => {
                    record_exec_outcome("failed");
                    send_close(&mut ws_tx, CLOSE_INTERNAL, &e.to_string(), drain).await;
                }
            }
        }
        None => {
            drop(relay);
            state.advance(ExecState::Closed);
            record_exec_outcome("closed");
            tracing::debug!(exec_id = %exec_id, "Client left, exec socket closed");
        }
    }

    resizer.abort();
    tracing::info!(exec_id = %exec_id, state = %state.current(), "Exec session ended");
}

async fn apply_resizes(
    engine: HijackEngine,
    exec_id: String,
    mut sizes: watch::Receiver<Option<TerminalSize>>,
) {
    while sizes.changed().await.is_ok() {
        let latest = *sizes.borrow_and_update();
        if let Some(size) = latest {
            if let Err(e) = engine.resize(&exec_id, size).await {
                tracing::warn!(exec_id = %exec_id, error = %e, "Resize failed");
            }
        }
    }
}

async fn pump_inbound<W>(
    mut ws_rx: SplitStream<WebSocket>,
    mut input: W,
    resize: watch::Sender<Option<TerminalSize>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(Ok(message)) = ws_rx.next().await {
        let bytes = match message {
            Message::Binary(bytes) => bytes,
            Message::Text(text) => match parse_resize(text.as_str()) {
                Some(size) => {
                    resize.send_replace(Some(size));
                    continue;
                }
                None => Bytes::copy_from_slice(text.as_str().as_bytes()),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if input.write_all(&bytes).await.is_err() {
            break;
        }
    }
    let _ = input.shutdown().await;
}

async fn pump_outbound<R>(
    mut output: R,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; OUTPUT_CHUNK];
    loop {
        let n = match output.read(&mut buf).await {
            Ok(0) | Err(_) => return Ok(()),
            Ok(n) => n,
        };
        ws_tx
            .send(Message::Binary(Bytes::copy_from_slice(&buf[..n])))
            .await?;
    }
}

async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
    within: Duration,
) {
    let frame = CloseFrame {
        code,
        reason: truncate_reason(reason).into(),
    };
    let closing = async {
        ws_tx.send(Message::Close(Some(frame))).await?;
        ws_tx.close().await
    };
    if tokio::time::timeout(within, closing).await.is_err() {
        tracing::debug!(code, "Websocket close not delivered in time");
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
