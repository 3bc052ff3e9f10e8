// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server context: wires the registry, the goroutine runtime and the live
//! panel table together, and owns panel creation/teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use mux_rt::{gchan, Runtime};

use crate::clock::Ticker;
use crate::config::MuxConfig;
use crate::emulator::{CellEmulator, Emulator};
use crate::encoder::BandEncoder;
use crate::error::MuxError;
use crate::panel::{spawn_panel, PanelCmd, PanelConfig, PanelHandle};
use crate::pty::{NativePty, PanelPty};
use crate::state::{ConnId, PanelId, Registry};

pub struct ServerCtx {
    pub config: MuxConfig,
    pub registry: Arc<Registry>,
    pub rt: Arc<Runtime>,
    pub shutdown: CancellationToken,
    panels: Mutex<HashMap<PanelId, PanelHandle>>,
    next_panel: AtomicU32,
}

impl ServerCtx {
    pub fn new(
        config: MuxConfig,
        registry: Arc<Registry>,
        rt: Arc<Runtime>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            rt,
            shutdown,
            panels: Mutex::new(HashMap::new()),
            next_panel: AtomicU32::new(0),
        })
    }

    /// Allocate a panel id, fork a shell on a fresh PTY, and spawn the
    /// panel's goroutine tree.
    pub fn create_panel(
        &self,
        session: &str,
        cols: u16,
        rows: u16,
    ) -> Result<PanelHandle, MuxError> {
        let cols = if cols == 0 { self.config.cols } else { cols };
        let rows = if rows == 0 { self.config.rows } else { rows };
        let id = self.next_panel.fetch_add(1, Ordering::Relaxed) + 1;

        let pty = NativePty::spawn(cols, rows).map_err(|e| {
            warn!(err = %e, "pty spawn failed");
            MuxError::ResourceExhausted
        })?;
        let emulator = Box::new(CellEmulator::new(cols, rows));
        let (w, h) = emulator.pixel_size();
        let encoder = Box::new(BandEncoder::new(w, h, self.config.fps, self.config.bitrate));

        let (tick_tx, tick_rx) = gchan::bounded::<()>(1);
        let cfg = PanelConfig {
            id,
            session: session.to_owned(),
            cols,
            rows,
            scrollback_bytes: self.config.scrollback_bytes,
        };
        let handle = spawn_panel(
            &self.rt,
            cfg,
            Arc::clone(&self.registry),
            emulator,
            encoder,
            Arc::new(pty) as Arc<dyn PanelPty>,
            tick_tx.clone(),
            tick_rx,
        )
        .map_err(|e| {
            warn!(err = %e, "panel spawn failed");
            MuxError::ResourceExhausted
        })?;

        // The ticker thread ends when the panel closes its tick channel.
        let _ = Ticker::spawn(self.config.fps, tick_tx);

        self.panels.lock().insert(id, handle.clone());
        Ok(handle)
    }

    pub fn panel(&self, id: PanelId) -> Option<PanelHandle> {
        let mut panels = self.panels.lock();
        if let Some(handle) = panels.get(&id) {
            if handle.is_closed() {
                panels.remove(&id);
                return None;
            }
            return Some(handle.clone());
        }
        None
    }

    /// Close a panel. A no-op (reported as success) when already gone.
    pub fn close_panel(&self, id: PanelId) {
        if let Some(handle) = self.panels.lock().remove(&id) {
            handle.close();
        }
    }

    /// Close every panel owned by a session (used by close_session).
    pub fn close_panels_of(&self, panels: &[PanelId]) {
        for &id in panels {
            self.close_panel(id);
        }
    }

    /// Drop a vanished connection from every panel's fan-out list.
    pub fn unsubscribe_everywhere(&self, conn: ConnId) {
        let handles: Vec<PanelHandle> = self.panels.lock().values().cloned().collect();
        for handle in handles {
            let _ = handle.send(PanelCmd::Unsubscribe { conn });
        }
    }

    pub fn panel_count(&self) -> usize {
        let mut panels = self.panels.lock();
        panels.retain(|_, h| !h.is_closed());
        panels.len()
    }

    /// Close all panels (server shutdown).
    pub fn close_all_panels(&self) {
        for (_, handle) in self.panels.lock().drain() {
            handle.close();
        }
    }
}
