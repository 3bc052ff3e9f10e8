// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! mux: remote terminal multiplexer.
//!
//! Panels run shells on PTYs, render through a terminal emulator into
//! RGBA surfaces, encode keyframe/delta video packets and stream them to
//! WebSocket subscribers. Panel pipelines are goroutine trees on the
//! `mux-rt` scheduler; the transport bridges them to tokio sockets
//! through goroutine-aware channels.

pub mod clock;
pub mod config;
pub mod emulator;
pub mod encoder;
pub mod error;
pub mod panel;
pub mod protocol;
pub mod pty;
pub mod scrollback;
pub mod server;
pub mod state;
pub mod transport;

#[cfg(test)]
pub mod test_support;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clock::SystemClock;
use crate::config::MuxConfig;
use crate::server::ServerCtx;
use crate::state::Registry;

/// Run the mux server until shutdown.
pub async fn run(config: MuxConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let registry = Arc::new(Registry::new(Arc::new(SystemClock)));
    let rt = Arc::new(mux_rt::Runtime::new(config.worker_count())?);

    // Worker 0 runs on a dedicated driver thread until shutdown.
    let driver = {
        let rt = Arc::clone(&rt);
        std::thread::Builder::new().name("mux-sched".to_owned()).spawn(move || rt.run())?
    };

    let ctx = ServerCtx::new(config, registry, Arc::clone(&rt), shutdown.clone());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let result = transport::serve_all(Arc::clone(&ctx)).await;

    ctx.close_all_panels();
    rt.shutdown();
    let _ = driver.join();
    result
}
