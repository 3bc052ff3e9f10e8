// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP API: session lifecycle and the advisory stats side channel.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::ServerCtx;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub sessions: usize,
    pub connections: usize,
    pub panels: usize,
}

/// `GET /api/v1/health`
pub async fn health(State(ctx): State<Arc<ServerCtx>>) -> Json<Health> {
    Json(Health {
        status: "running",
        sessions: ctx.registry.session_count(),
        connections: ctx.registry.conn_count(),
        panels: ctx.panel_count(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSession {
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub token: String,
}

/// `POST /api/v1/sessions` — create a session, returning its token.
/// An empty body creates a plain (non-admin) session.
pub async fn create_session(
    State(ctx): State<Arc<ServerCtx>>,
    body: bytes::Bytes,
) -> Json<SessionCreated> {
    let admin = serde_json::from_slice::<CreateSession>(&body).map(|b| b.admin).unwrap_or(false);
    let token = ctx.registry.new_session(admin);
    tracing::debug!(admin, "session created");
    Json(SessionCreated { token })
}

/// `GET /api/v1/sessions`
pub async fn list_sessions(State(ctx): State<Arc<ServerCtx>>) -> impl IntoResponse {
    Json(ctx.registry.list_sessions())
}

/// `DELETE /api/v1/sessions/{token}` — close a session and its panels.
pub async fn close_session(
    State(ctx): State<Arc<ServerCtx>>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    match ctx.registry.close_session(&token) {
        Ok(panels) => {
            ctx.close_panels_of(&panels);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => (
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(serde_json::json!({ "error": e.as_str() })),
        )
            .into_response(),
    }
}

/// `GET /api/v1/stats` — per-session bandwidth counters (advisory).
pub async fn stats(State(ctx): State<Arc<ServerCtx>>) -> impl IntoResponse {
    Json(ctx.registry.stats_report())
}
