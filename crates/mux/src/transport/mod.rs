// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport: three listeners on derived ports. HTTP carries session
//! management and the stats side channel; the control WebSocket carries
//! JSON; the data WebSocket carries binary frames and input events.

pub mod auth;
pub mod http;
pub mod ws_control;
pub mod ws_data;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::server::ServerCtx;

pub fn build_http_router(ctx: Arc<ServerCtx>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/sessions", post(http::create_session).get(http::list_sessions))
        .route("/api/v1/sessions/{token}", delete(http::close_session))
        .route("/api/v1/stats", get(http::stats))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

pub fn build_control_router(ctx: Arc<ServerCtx>) -> Router {
    Router::new()
        .route("/ws/control", get(ws_control::handler))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

pub fn build_data_router(ctx: Arc<ServerCtx>) -> Router {
    Router::new()
        .route("/ws/data", get(ws_data::handler))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Bind all three listeners and serve until shutdown.
pub async fn serve_all(ctx: Arc<ServerCtx>) -> anyhow::Result<()> {
    let host = ctx.config.host.clone();
    let http_addr = format!("{host}:{}", ctx.config.port);
    let control_addr = format!("{host}:{}", ctx.config.derived_control_port());
    let data_addr = format!("{host}:{}", ctx.config.derived_data_port());

    let http_listener = TcpListener::bind(&http_addr).await?;
    let control_listener = TcpListener::bind(&control_addr).await?;
    let data_listener = TcpListener::bind(&data_addr).await?;

    tracing::info!(%http_addr, %control_addr, %data_addr, "mux listening");

    let shutdown = ctx.shutdown.clone();
    let http = axum::serve(http_listener, build_http_router(Arc::clone(&ctx)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let control = axum::serve(control_listener, build_control_router(Arc::clone(&ctx)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let data = axum::serve(data_listener, build_data_router(Arc::clone(&ctx)))
        .with_graceful_shutdown(shutdown.cancelled_owned());

    tokio::try_join!(
        async { http.await },
        async { control.await },
        async { data.await },
    )?;
    Ok(())
}

/// Bridge a goroutine-aware channel into a tokio channel for a WebSocket
/// sink. The blocking drain runs on the blocking pool; when the source
/// channel closes, the tokio side closes too and the socket loop ends.
pub(crate) fn pump<T: Send + 'static>(
    rx: mux_rt::gchan::Receiver<T>,
) -> tokio::sync::mpsc::Receiver<T> {
    let (tx, out) = tokio::sync::mpsc::channel::<T>(32);
    tokio::task::spawn_blocking(move || {
        while let Some(v) = rx.recv() {
            if tx.blocking_send(v).is_err() {
                break;
            }
        }
    });
    out
}
