// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane WebSocket: JSON messages, admission by session token,
//! one handler task per connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use mux_rt::gchan;

use crate::error::MuxError;
use crate::panel::PanelCmd;
use crate::protocol::control::{error_msg, ClientMessage, ServerMessage};
use crate::server::ServerCtx;
use crate::state::{ConnEntry, Role};

/// Query parameters for the control WS upgrade.
#[derive(Debug, Deserialize)]
pub struct ControlQuery {
    pub token: String,
    /// Requested role: viewer, editor (default) or admin.
    pub role: Option<String>,
}

/// `GET /ws/control` — WebSocket upgrade for the control plane.
pub async fn handler(
    State(ctx): State<Arc<ServerCtx>>,
    Query(query): Query<ControlQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let role = match query.role.as_deref() {
        None => Role::Editor,
        Some(s) => match Role::parse(s) {
            Some(r) => r,
            None => {
                return axum::http::Response::builder()
                    .status(400)
                    .body(axum::body::Body::from("unknown role"))
                    .unwrap_or_default()
                    .into_response();
            }
        },
    };
    // Admission happens at the handshake: unknown tokens never upgrade.
    if !ctx.registry.session_exists(&query.token) {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unknown session token"))
            .unwrap_or_default()
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_control(ctx, query.token, role, socket)).into_response()
}

async fn handle_control(ctx: Arc<ServerCtx>, token: String, role: Role, socket: WebSocket) {
    let (ctrl_tx, ctrl_rx) = gchan::bounded::<ServerMessage>(64);
    let conn = match ctx.registry.bind(&token, role, ctrl_tx) {
        Ok(c) => c,
        Err(e) => {
            debug!(err = %e, "control bind rejected");
            return;
        }
    };
    let stats = ctx.registry.session_stats(&token);
    let mut out_rx = super::pump(ctrl_rx);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let welcome = ServerMessage::Welcome {
        conn: conn.id,
        session: token.clone(),
        role: role.as_str().to_owned(),
    };
    if send_json(&mut ws_tx, &welcome).await.is_err() {
        ctx.registry.remove_conn(conn.id);
        return;
    }

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,

            msg = out_rx.recv() => {
                match msg {
                    Some(m) => {
                        match send_json(&mut ws_tx, &m).await {
                            Ok(n) => {
                                if let Some(ref s) = stats {
                                    s.add_control_out(n as u64);
                                }
                            }
                            Err(()) => break,
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ref s) = stats {
                            s.add_control_in(text.len() as u64);
                        }
                        conn.touch(ctx.registry.now_ms());
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(m) => dispatch(&ctx, &conn, m),
                            Err(e) => {
                                debug!(conn = conn.id, err = %e, "control protocol violation");
                                let reply = error_msg(MuxError::ProtocolError, "bad control message");
                                let _ = send_json(&mut ws_tx, &reply).await;
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

    ctx.registry.remove_conn(conn.id);
    ctx.unsubscribe_everywhere(conn.id);
    debug!(conn = conn.id, "control connection closed");
}

async fn send_json(
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    msg: &ServerMessage,
) -> Result<usize, ()> {
    let Ok(json) = serde_json::to_string(msg) else {
        return Err(());
    };
    let n = json.len();
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())?;
    Ok(n)
}

/// Handle one decoded control message. Role violations reply `forbidden`
/// and keep the connection open.
fn dispatch(ctx: &Arc<ServerCtx>, conn: &Arc<ConnEntry>, msg: ClientMessage) {
    match msg {
        ClientMessage::CreatePanel { cols, rows } => {
            if conn.role != Role::Admin {
                conn.send_ctrl(ServerMessage::Forbidden {
                    reason: "only admins create panels".to_owned(),
                });
                return;
            }
            match ctx.create_panel(&conn.session, cols.unwrap_or(0), rows.unwrap_or(0)) {
                Ok(handle) => {
                    let info = handle.info();
                    // The creator is subscribed from the start.
                    handle.send(PanelCmd::Subscribe { conn: conn.id });
                    conn.send_ctrl(ServerMessage::Created {
                        panel: handle.id(),
                        cols: info.cols,
                        rows: info.rows,
                    });
                }
                Err(e) => {
                    conn.send_ctrl(error_msg(e, "panel creation failed"));
                }
            }
        }
        ClientMessage::ClosePanel { panel } => {
            match ctx.registry.panel_role(conn, panel) {
                Some(Role::Admin) => ctx.close_panel(panel),
                Some(_) => {
                    conn.send_ctrl(ServerMessage::Forbidden {
                        reason: "only admins close panels".to_owned(),
                    });
                }
                // Closing an already-gone panel is a no-op, not an error.
                None => {}
            }
        }
        ClientMessage::ResizePanel { panel, cols, rows } => {
            with_role(ctx, conn, panel, Role::Editor, |handle| {
                handle.send(PanelCmd::Resize { cols, rows });
            });
        }
        ClientMessage::FocusPanel { panel } => {
            with_role(ctx, conn, panel, Role::Viewer, |_| {
                conn.send_ctrl(ServerMessage::Focused { panel });
            });
        }
        ClientMessage::Subscribe { panel } => {
            with_role(ctx, conn, panel, Role::Viewer, |handle| {
                handle.send(PanelCmd::Subscribe { conn: conn.id });
            });
        }
        ClientMessage::Unsubscribe { panel } => {
            if let Some(handle) = ctx.panel(panel) {
                handle.send(PanelCmd::Unsubscribe { conn: conn.id });
            }
        }
        ClientMessage::ListSessions {} => {
            if conn.role != Role::Admin {
                conn.send_ctrl(ServerMessage::Forbidden {
                    reason: "only admins list sessions".to_owned(),
                });
                return;
            }
            conn.send_ctrl(ServerMessage::Sessions { sessions: ctx.registry.list_sessions() });
        }
        ClientMessage::ListPanels {} => {
            let ids = ctx.registry.list_panels(&conn.session).unwrap_or_default();
            let panels = ids.into_iter().filter_map(|id| ctx.panel(id).map(|h| h.info())).collect();
            conn.send_ctrl(ServerMessage::Panels { panels });
        }
        ClientMessage::Grant { session, panel, role } => {
            if conn.role != Role::Admin {
                conn.send_ctrl(ServerMessage::Forbidden {
                    reason: "only admins grant roles".to_owned(),
                });
                return;
            }
            let Some(role) = Role::parse(&role) else {
                conn.send_ctrl(error_msg(MuxError::ProtocolError, "unknown role"));
                return;
            };
            match ctx.registry.grant(&session, panel, role) {
                Ok(()) => conn.send_ctrl(ServerMessage::Granted {
                    session,
                    panel,
                    role: role.as_str().to_owned(),
                }),
                Err(e) => conn.send_ctrl(error_msg(e, "grant failed")),
            };
        }
        ClientMessage::Revoke { session, panel } => {
            if conn.role != Role::Admin {
                conn.send_ctrl(ServerMessage::Forbidden {
                    reason: "only admins revoke roles".to_owned(),
                });
                return;
            }
            match ctx.registry.revoke(&session, panel) {
                Ok(()) => conn.send_ctrl(ServerMessage::Revoked { session, panel }),
                Err(e) => conn.send_ctrl(error_msg(e, "revoke failed")),
            };
        }
        ClientMessage::Scrollback { panel, len } => {
            with_role(ctx, conn, panel, Role::Viewer, |handle| {
                handle.send(PanelCmd::Scrollback {
                    conn: conn.id,
                    len: len.unwrap_or(64 * 1024),
                });
            });
        }
    }
}

/// Run `f` on the panel when the connection holds at least `need` on it;
/// otherwise reply `forbidden` (or `panel_not_found`).
fn with_role(
    ctx: &Arc<ServerCtx>,
    conn: &Arc<ConnEntry>,
    panel: u32,
    need: Role,
    f: impl FnOnce(&crate::panel::PanelHandle),
) {
    match ctx.registry.panel_role(conn, panel) {
        Some(role) if role >= need => match ctx.panel(panel) {
            Some(handle) => f(&handle),
            None => {
                conn.send_ctrl(error_msg(MuxError::PanelNotFound, "no such panel"));
            }
        },
        Some(_) | None => {
            conn.send_ctrl(ServerMessage::Forbidden { reason: "insufficient role".to_owned() });
        }
    }
}

/// Queue a control notice; alias used by the data plane.
pub(crate) fn notify_forbidden(conn: &ConnEntry, reason: &str) {
    conn.send_ctrl(ServerMessage::Forbidden { reason: reason.to_owned() });
}
