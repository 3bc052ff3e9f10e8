// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-panel pipeline: PTY → emulator → surface → encoder → fan-out.
//!
//! Each panel is a tree of goroutines on the shared runtime:
//!
//! - `pty_reader` reads PTY bytes, feeds the emulator and the scrollback
//!   ring, emits title/pwd/bell notices, and yields.
//! - `encoder_driver` waits on the tick channel, skips clean frames,
//!   submits dirty surfaces and routes packets onward.
//! - `fanout` walks the subscriber list and hands each connection the
//!   encoded frame through its bounded send channel; a full channel
//!   drops deltas for that subscriber and flags it keyframe-needed.
//! - `control` drains the panel command channel (input, resize,
//!   subscribe, keyframe requests, close) and runs teardown.
//!
//! Keyframes are forced on first frame to a new subscriber, after
//! resize, and on explicit request; the most recent keyframe is cached
//! so late attachers bootstrap without waiting a full period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use mux_rt::{async_read, async_write, gchan, yield_now, Runtime};

use crate::emulator::Emulator;
use crate::encoder::VideoEncoder;
use crate::error::MuxError;
use crate::protocol::control::{error_msg, PanelInfo, ServerMessage};
use crate::protocol::data::{encode_frame, FrameKind};
use crate::pty::{ExitStatus, PanelPty};
use crate::scrollback::Scrollback;
use crate::state::{ConnId, PanelId, Registry, SessionStats};

/// Panel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Created,
    Configured,
    Streaming,
    Paused,
    Closed,
}

impl PanelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Streaming => "streaming",
            Self::Paused => "paused",
            Self::Closed => "closed",
        }
    }
}

/// Commands accepted by a panel's control goroutine.
#[derive(Debug)]
pub enum PanelCmd {
    /// Pre-translated bytes for the PTY.
    Input(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    RequestKeyframe { conn: Option<ConnId> },
    Subscribe { conn: ConnId },
    Unsubscribe { conn: ConnId },
    Scrollback { conn: ConnId, len: usize },
    Close,
}

pub struct PanelConfig {
    pub id: PanelId,
    pub session: String,
    pub cols: u16,
    pub rows: u16,
    pub scrollback_bytes: usize,
}

struct SubState {
    needs_keyframe: bool,
}

struct SharedInfo {
    state: PanelState,
    cols: u16,
    rows: u16,
    title: String,
    pwd: String,
}

struct Inner {
    id: PanelId,
    session: String,
    registry: Arc<Registry>,
    stats: Arc<SessionStats>,
    emulator: Mutex<Box<dyn Emulator>>,
    scrollback: Mutex<Scrollback>,
    subscribers: Mutex<HashMap<ConnId, SubState>>,
    info: Mutex<SharedInfo>,
    /// Next submission must be a keyframe (resize, explicit request, or a
    /// subscriber that lost deltas to backpressure).
    needs_keyframe: AtomicBool,
    /// Dimensions the encoder driver must apply before its next submit.
    pending_encoder_resize: Mutex<Option<(u32, u32)>>,
    /// Most recent encoded keyframe wire frame, for late attachers.
    keyframe_cache: Mutex<Option<Bytes>>,
    closed: AtomicBool,
    exit_status: Mutex<Option<ExitStatus>>,
    close_reason: Mutex<Option<MuxError>>,
    pty: Arc<dyn PanelPty>,
    cmd_tx: gchan::Sender<PanelCmd>,
}

/// Handle held by the server: command entry point plus listing info.
#[derive(Clone)]
pub struct PanelHandle {
    inner: Arc<Inner>,
}

impl PanelHandle {
    pub fn id(&self) -> PanelId {
        self.inner.id
    }

    pub fn session(&self) -> &str {
        &self.inner.session
    }

    /// Queue a command; false when the panel is overloaded or closed.
    pub fn send(&self, cmd: PanelCmd) -> bool {
        self.inner.cmd_tx.try_send(cmd).is_ok()
    }

    /// Request close. Never lost: if the command queue is full the whole
    /// channel is closed, which drains into teardown.
    pub fn close(&self) {
        if self.inner.cmd_tx.try_send(PanelCmd::Close).is_err() {
            self.inner.cmd_tx.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn info(&self) -> PanelInfo {
        let info = self.inner.info.lock();
        PanelInfo {
            panel: self.inner.id,
            cols: info.cols,
            rows: info.rows,
            title: info.title.clone(),
            pwd: info.pwd.clone(),
            state: info.state.as_str().to_owned(),
        }
    }
}

/// Build the goroutine tree for one panel.
///
/// `tick_tx` is retained for teardown (closing it stops the ticker and
/// the encoder driver); ticks themselves arrive on `tick_rx` from a
/// [`crate::clock::Ticker`] thread or from a test driving time by hand.
#[allow(clippy::too_many_arguments)]
pub fn spawn_panel(
    rt: &Runtime,
    cfg: PanelConfig,
    registry: Arc<Registry>,
    emulator: Box<dyn Emulator>,
    encoder: Box<dyn VideoEncoder>,
    pty: Arc<dyn PanelPty>,
    tick_tx: gchan::Sender<()>,
    tick_rx: gchan::Receiver<()>,
) -> anyhow::Result<PanelHandle> {
    let stats = registry
        .session_stats(&cfg.session)
        .ok_or_else(|| anyhow::anyhow!("unknown session {}", cfg.session))?;

    let (cmd_tx, cmd_rx) = gchan::bounded::<PanelCmd>(64);
    let (pkt_tx, pkt_rx) = gchan::bounded::<(bool, Bytes)>(8);

    let inner = Arc::new(Inner {
        id: cfg.id,
        session: cfg.session.clone(),
        registry: Arc::clone(&registry),
        stats,
        emulator: Mutex::new(emulator),
        scrollback: Mutex::new(Scrollback::new(cfg.scrollback_bytes)),
        subscribers: Mutex::new(HashMap::new()),
        info: Mutex::new(SharedInfo {
            state: PanelState::Created,
            cols: cfg.cols,
            rows: cfg.rows,
            title: String::new(),
            pwd: String::new(),
        }),
        needs_keyframe: AtomicBool::new(true),
        pending_encoder_resize: Mutex::new(None),
        keyframe_cache: Mutex::new(None),
        closed: AtomicBool::new(false),
        exit_status: Mutex::new(None),
        close_reason: Mutex::new(None),
        pty,
        cmd_tx: cmd_tx.clone(),
    });

    registry.add_panel(&cfg.session, cfg.id)?;

    {
        let inner = Arc::clone(&inner);
        rt.spawn(move || pty_reader(inner))?;
    }
    {
        let inner = Arc::clone(&inner);
        rt.spawn(move || encoder_driver(inner, encoder, tick_rx, pkt_tx))?;
    }
    {
        let inner = Arc::clone(&inner);
        rt.spawn(move || fanout(inner, pkt_rx))?;
    }
    {
        let inner = Arc::clone(&inner);
        rt.spawn(move || control(inner, cmd_rx, tick_tx))?;
    }

    inner.info.lock().state = PanelState::Configured;
    debug!(panel = cfg.id, session = %cfg.session, "panel spawned");
    Ok(PanelHandle { inner })
}

// -- Goroutines ---------------------------------------------------------------

fn pty_reader(inner: Arc<Inner>) {
    let fd = inner.pty.read_fd();
    let mut buf = [0u8; 4096];
    loop {
        if inner.closed.load(Ordering::Acquire) {
            break;
        }
        match async_read(fd, &mut buf) {
            Ok(0) => break,
            Ok(n) => {
                inner.stats.add_pty(n as u64);
                let (title, pwd, bell) = {
                    let mut emu = inner.emulator.lock();
                    emu.feed(&buf[..n]);
                    (emu.title(), emu.pwd(), emu.take_bell())
                };
                inner.notices(title, pwd, bell);
                inner.scrollback.lock().write(&buf[..n]);
                yield_now();
            }
            Err(e) => {
                if !inner.closed.load(Ordering::Acquire) {
                    debug!(panel = inner.id, err = %e, "pty read ended");
                }
                break;
            }
        }
    }

    // Fatal PTY path: record the exit and hand teardown to control by
    // closing the command channel.
    *inner.exit_status.lock() = Some(reap(&*inner.pty));
    inner.close_reason.lock().get_or_insert(MuxError::PtyClosed);
    inner.cmd_tx.close();
}

fn encoder_driver(
    inner: Arc<Inner>,
    mut enc: Box<dyn VideoEncoder>,
    tick_rx: gchan::Receiver<()>,
    pkt_tx: gchan::Sender<(bool, Bytes)>,
) {
    let mut failures = 0u32;
    while tick_rx.recv().is_some() {
        if inner.closed.load(Ordering::Acquire) {
            break;
        }
        if let Some((w, h)) = inner.pending_encoder_resize.lock().take() {
            enc.resize(w, h);
            inner.needs_keyframe.store(true, Ordering::Release);
        }
        let force = inner.needs_keyframe.swap(false, Ordering::AcqRel);
        let result = {
            let mut emu = inner.emulator.lock();
            if !force && !emu.changed() {
                continue;
            }
            emu.clear_changed();
            let surf = emu.snapshot();
            enc.submit(&surf, force)
        };
        match result {
            Ok(None) => {}
            Ok(Some(pkt)) => {
                failures = 0;
                inner.stats.add_encoded(pkt.data.len() as u64);
                let kind = if pkt.keyframe { FrameKind::Keyframe } else { FrameKind::Delta };
                let frame = Bytes::from(encode_frame(inner.id, kind, &pkt.data));
                if pkt.keyframe {
                    *inner.keyframe_cache.lock() = Some(frame.clone());
                }
                inner.mark_streaming();
                if !pkt_tx.send((pkt.keyframe, frame)) {
                    break;
                }
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    // One reinitialisation attempt, then give up.
                    warn!(panel = inner.id, err = %e, "encoder failed, reinitialising");
                    let (w, h) = inner.emulator.lock().pixel_size();
                    enc.resize(w, h);
                    inner.needs_keyframe.store(true, Ordering::Release);
                } else {
                    warn!(panel = inner.id, err = %e, "encoder failed again, closing panel");
                    *inner.close_reason.lock() = Some(MuxError::EncoderFailed);
                    inner.cmd_tx.close();
                    break;
                }
            }
        }
    }
    enc.close();
}

fn fanout(inner: Arc<Inner>, pkt_rx: gchan::Receiver<(bool, Bytes)>) {
    while let Some((keyframe, frame)) = pkt_rx.recv() {
        let ids: Vec<ConnId> = inner.subscribers.lock().keys().copied().collect();
        let mut stale: Vec<ConnId> = Vec::new();

        for id in ids {
            let Some(conn) = inner.registry.conn(id) else {
                stale.push(id);
                continue;
            };
            let mut subs = inner.subscribers.lock();
            let Some(sub) = subs.get_mut(&id) else { continue };

            if !keyframe && sub.needs_keyframe {
                // Deltas are useless to this subscriber until a keyframe
                // lands; keep asking for one.
                inner.needs_keyframe.store(true, Ordering::Release);
                continue;
            }
            if conn.send_data(frame.clone()) {
                if keyframe {
                    sub.needs_keyframe = false;
                }
            } else {
                // Backpressure (or no data socket yet): drop the frame
                // and catch this subscriber up with a keyframe later.
                sub.needs_keyframe = true;
                inner.needs_keyframe.store(true, Ordering::Release);
            }
        }

        if !stale.is_empty() {
            let mut subs = inner.subscribers.lock();
            for id in stale {
                subs.remove(&id);
            }
        }
    }
}

fn control(inner: Arc<Inner>, cmd_rx: gchan::Receiver<PanelCmd>, tick_tx: gchan::Sender<()>) {
    while let Some(cmd) = cmd_rx.recv() {
        match cmd {
            PanelCmd::Input(bytes) => inner.write_input(&bytes),
            PanelCmd::Resize { cols, rows } => inner.apply_resize(cols, rows),
            PanelCmd::RequestKeyframe { conn } => {
                if let Some(id) = conn {
                    if let Some(sub) = inner.subscribers.lock().get_mut(&id) {
                        sub.needs_keyframe = true;
                    }
                }
                inner.needs_keyframe.store(true, Ordering::Release);
            }
            PanelCmd::Subscribe { conn } => inner.subscribe(conn),
            PanelCmd::Unsubscribe { conn } => {
                inner.subscribers.lock().remove(&conn);
            }
            PanelCmd::Scrollback { conn, len } => inner.send_scrollback(conn, len),
            PanelCmd::Close => break,
        }
    }
    inner.teardown(&tick_tx);
}

// -- Inner --------------------------------------------------------------------

impl Inner {
    fn write_input(&self, bytes: &[u8]) {
        let fd = self.pty.write_fd();
        let mut off = 0;
        while off < bytes.len() {
            match async_write(fd, &bytes[off..]) {
                Ok(0) => break,
                Ok(n) => off += n,
                Err(e) => {
                    debug!(panel = self.id, err = %e, "pty write failed");
                    break;
                }
            }
        }
    }

    fn apply_resize(&self, cols: u16, rows: u16) {
        let cols = cols.clamp(2, 500);
        let rows = rows.clamp(2, 200);
        {
            let mut info = self.info.lock();
            if info.state == PanelState::Closed {
                return;
            }
            info.state = PanelState::Paused;
            info.cols = cols;
            info.rows = rows;
        }
        let (w, h) = {
            let mut emu = self.emulator.lock();
            emu.resize(cols, rows);
            emu.pixel_size()
        };
        if let Err(e) = self.pty.resize(cols, rows) {
            debug!(panel = self.id, err = %e, "pty resize failed");
        }
        *self.pending_encoder_resize.lock() = Some((w, h));
        self.needs_keyframe.store(true, Ordering::Release);
        self.broadcast_ctrl(&ServerMessage::Resized { panel: self.id, cols, rows });
    }

    fn subscribe(&self, conn: ConnId) {
        let cached = self.keyframe_cache.lock().clone();
        let mut subs = self.subscribers.lock();
        let sub = subs.entry(conn).or_insert(SubState { needs_keyframe: true });

        // Bootstrap late attachers from the cached keyframe.
        if let Some(frame) = cached {
            if let Some(entry) = self.registry.conn(conn) {
                if entry.send_data(frame) {
                    sub.needs_keyframe = false;
                    return;
                }
            }
        }
        self.needs_keyframe.store(true, Ordering::Release);
    }

    fn send_scrollback(&self, conn: ConnId, len: usize) {
        let (bytes, offset) = self.scrollback.lock().tail(len.min(1 << 20));
        if let Some(entry) = self.registry.conn(conn) {
            use base64::Engine as _;
            let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
            entry.send_ctrl(ServerMessage::ScrollbackData { panel: self.id, data, offset });
        }
    }

    fn notices(&self, title: Option<String>, pwd: Option<String>, bell: bool) {
        let mut msgs: Vec<ServerMessage> = Vec::new();
        {
            let mut info = self.info.lock();
            if let Some(t) = title {
                if info.title != t {
                    info.title = t.clone();
                    msgs.push(ServerMessage::Title { panel: self.id, title: t });
                }
            }
            if let Some(p) = pwd {
                if info.pwd != p {
                    info.pwd = p.clone();
                    msgs.push(ServerMessage::Pwd { panel: self.id, pwd: p });
                }
            }
        }
        if bell {
            msgs.push(ServerMessage::Bell { panel: self.id });
        }
        for msg in &msgs {
            self.broadcast_ctrl(msg);
        }
    }

    fn broadcast_ctrl(&self, msg: &ServerMessage) {
        let ids: Vec<ConnId> = self.subscribers.lock().keys().copied().collect();
        for id in ids {
            if let Some(conn) = self.registry.conn(id) {
                conn.send_ctrl(msg.clone());
            }
        }
    }

    fn mark_streaming(&self) {
        let mut info = self.info.lock();
        if !matches!(info.state, PanelState::Closed) {
            info.state = PanelState::Streaming;
        }
    }

    fn teardown(&self, tick_tx: &gchan::Sender<()>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pty.shutdown();
        tick_tx.close();
        self.cmd_tx.close();

        let status = *self.exit_status.lock();
        let reason = *self.close_reason.lock();
        let (code, signal) = match status {
            Some(s) => (s.code, s.signal),
            None => (None, None),
        };

        let subs: Vec<ConnId> = {
            let mut subs = self.subscribers.lock();
            subs.drain().map(|(id, _)| id).collect()
        };
        for id in subs {
            if let Some(conn) = self.registry.conn(id) {
                match reason {
                    Some(err) if err != MuxError::PtyClosed => {
                        conn.send_ctrl(error_msg(err, "panel closed"));
                    }
                    _ => {}
                }
                conn.send_ctrl(ServerMessage::Exit { panel: self.id, code, signal });
            }
        }

        self.registry.remove_panel(&self.session, self.id);
        self.info.lock().state = PanelState::Closed;
        debug!(panel = self.id, "panel closed");
    }
}

fn reap(pty: &dyn PanelPty) -> ExitStatus {
    for _ in 0..200 {
        match pty.try_wait() {
            Ok(Some(status)) => return status,
            Ok(None) => yield_now(),
            Err(_) => break,
        }
    }
    ExitStatus { code: None, signal: None }
}

#[cfg(test)]
#[path = "panel_tests.rs"]
mod tests;
