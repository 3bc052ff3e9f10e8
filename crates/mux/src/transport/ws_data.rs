// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data-plane WebSocket: binary video frames out, binary input events
//! in. The socket pairs with a control connection via `?conn=` and the
//! session token.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use mux_rt::gchan;

use crate::emulator::{CELL_H, CELL_W};
use crate::error::MuxError;
use crate::panel::PanelCmd;
use crate::protocol::control::error_msg;
use crate::protocol::data::{decode_input, event_to_pty_bytes, DataFrame, InputEvent};
use crate::server::ServerCtx;
use crate::state::{ConnEntry, Role};

/// Query parameters for the data WS upgrade.
#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub token: String,
    /// Connection id assigned by the control-plane handshake.
    pub conn: u64,
}

/// `GET /ws/data` — WebSocket upgrade for the data plane.
pub async fn handler(
    State(ctx): State<Arc<ServerCtx>>,
    Query(query): Query<DataQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_data(ctx, query, socket)).into_response()
}

async fn handle_data(ctx: Arc<ServerCtx>, query: DataQuery, socket: WebSocket) {
    let (data_tx, data_rx) = gchan::bounded::<Bytes>(32);
    let conn = match ctx.registry.attach_data(query.conn, &query.token, data_tx) {
        Ok(c) => c,
        Err(e) => {
            debug!(conn = query.conn, err = %e, "data attach rejected");
            return;
        }
    };

    let mut out_rx = super::pump(data_rx);
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,

            frame = out_rx.recv() => {
                match frame {
                    Some(bytes) => {
                        if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(buf))) => {
                        conn.rx_bytes.fetch_add(buf.len() as u64, Ordering::Relaxed);
                        conn.touch(ctx.registry.now_ms());
                        match decode_input(&buf) {
                            Ok(frame) => route_input(&ctx, &conn, frame),
                            Err(_) => {
                                debug!(conn = conn.id, "data protocol violation");
                                conn.send_ctrl(error_msg(MuxError::ProtocolError, "bad data frame"));
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    ctx.registry.detach_data(conn.id);
    debug!(conn = conn.id, "data connection closed");
}

/// Route one input event to its panel, enforcing roles. Viewers may only
/// request keyframes; everything else needs the editor role. Violations
/// are dropped with a `forbidden` notice on the control plane.
fn route_input(ctx: &Arc<ServerCtx>, conn: &Arc<ConnEntry>, frame: DataFrame) {
    let Some(role) = ctx.registry.panel_role(conn, frame.panel) else {
        super::ws_control::notify_forbidden(conn, "no access to panel");
        return;
    };
    if role < Role::Editor && !matches!(frame.event, InputEvent::RequestKeyframe) {
        super::ws_control::notify_forbidden(conn, "viewer role cannot send input");
        return;
    }
    let Some(handle) = ctx.panel(frame.panel) else {
        conn.send_ctrl(error_msg(MuxError::PanelNotFound, "no such panel"));
        return;
    };

    match frame.event {
        InputEvent::Resize { width, height } => {
            let cols = (u32::from(width) / CELL_W) as u16;
            let rows = (u32::from(height) / CELL_H) as u16;
            handle.send(PanelCmd::Resize { cols, rows });
        }
        InputEvent::RequestKeyframe => {
            handle.send(PanelCmd::RequestKeyframe { conn: Some(conn.id) });
        }
        ref event => {
            if let Some(bytes) = event_to_pty_bytes(event) {
                handle.send(PanelCmd::Input(bytes));
            }
        }
    }
}
