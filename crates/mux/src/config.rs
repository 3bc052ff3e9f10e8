// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the mux server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "mux", about = "Remote terminal multiplexer")]
pub struct MuxConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "MUX_HOST")]
    pub host: String,

    /// HTTP API port. The control and data WebSocket ports derive from it
    /// (port+1 and port+2) unless set explicitly.
    #[arg(long, default_value_t = 9700, env = "MUX_PORT")]
    pub port: u16,

    /// Control-plane WebSocket port (default: port+1).
    #[arg(long, env = "MUX_CONTROL_PORT")]
    pub control_port: Option<u16>,

    /// Data-plane WebSocket port (default: port+2).
    #[arg(long, env = "MUX_DATA_PORT")]
    pub data_port: Option<u16>,

    /// Scheduler worker threads (0 = one per CPU, capped at 8).
    #[arg(long, default_value_t = 0, env = "MUX_WORKERS")]
    pub workers: usize,

    /// Target encode frame rate per panel.
    #[arg(long, default_value_t = 30, env = "MUX_FPS")]
    pub fps: u32,

    /// Target encoder bitrate in kbit/s (advisory for the baseline encoder).
    #[arg(long, default_value_t = 4000, env = "MUX_BITRATE")]
    pub bitrate: u32,

    /// Per-panel scrollback ring capacity in bytes.
    #[arg(long, default_value_t = 256 * 1024, env = "MUX_SCROLLBACK_BYTES")]
    pub scrollback_bytes: usize,

    /// Default terminal columns for new panels.
    #[arg(long, default_value_t = 80, env = "MUX_COLS")]
    pub cols: u16,

    /// Default terminal rows for new panels.
    #[arg(long, default_value_t = 24, env = "MUX_ROWS")]
    pub rows: u16,
}

impl MuxConfig {
    pub fn derived_control_port(&self) -> u16 {
        self.control_port.unwrap_or(self.port.wrapping_add(1))
    }

    pub fn derived_data_port(&self) -> u16 {
        self.data_port.unwrap_or(self.port.wrapping_add(2))
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            mux_rt::default_workers()
        } else {
            self.workers
        }
    }
}
