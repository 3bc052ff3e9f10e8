// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session/client registry: admission by opaque token, roles, fan-out
//! membership, and advisory bandwidth counters.
//!
//! Sessions outlive individual connections; reconnects rebind by token.
//! Panels reference subscribers by connection id only and resolve them
//! through this registry, so neither side holds a strong reference to
//! the other.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use mux_rt::gchan;

use crate::clock::Clock;
use crate::error::MuxError;
use crate::protocol::control::{ServerMessage, SessionInfo};

pub type ConnId = u64;
pub type PanelId = u32;

/// Roles, weakest first. Viewers receive frames only, editors may send
/// input, admins may create and close panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Advisory per-session counters, updated with relaxed atomics.
#[derive(Default)]
pub struct SessionStats {
    pub pty_bytes: AtomicU64,
    pub encoded_bytes: AtomicU64,
    pub frames: AtomicU64,
    pub control_in: AtomicU64,
    pub control_out: AtomicU64,
}

impl SessionStats {
    pub fn add_pty(&self, n: u64) {
        self.pty_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_encoded(&self, n: u64) {
        self.encoded_bytes.fetch_add(n, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_control_in(&self, n: u64) {
        self.control_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_control_out(&self, n: u64) {
        self.control_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pty_bytes: self.pty_bytes.load(Ordering::Relaxed),
            encoded_bytes: self.encoded_bytes.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            control_in: self.control_in.load(Ordering::Relaxed),
            control_out: self.control_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub pty_bytes: u64,
    pub encoded_bytes: u64,
    pub frames: u64,
    pub control_in: u64,
    pub control_out: u64,
}

struct Session {
    token: String,
    admin: bool,
    created_at_ms: u64,
    conns: HashSet<ConnId>,
    panels: HashSet<PanelId>,
    grants: HashMap<PanelId, Role>,
    stats: Arc<SessionStats>,
}

/// One client connection: a control socket, optionally a paired data
/// socket, a fixed role, and byte counters.
pub struct ConnEntry {
    pub id: ConnId,
    pub session: String,
    pub role: Role,
    /// Outbound control-plane messages (JSON), drained by the socket pump.
    pub ctrl_tx: gchan::Sender<ServerMessage>,
    /// Outbound data-plane frames, attached when the data socket pairs.
    data_tx: Mutex<Option<gchan::Sender<Bytes>>>,
    pub rx_bytes: AtomicU64,
    pub tx_bytes: AtomicU64,
    last_active_ms: AtomicU64,
}

impl std::fmt::Debug for ConnEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnEntry")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("role", &self.role)
            .field("rx_bytes", &self.rx_bytes)
            .field("tx_bytes", &self.tx_bytes)
            .field("last_active_ms", &self.last_active_ms)
            .finish_non_exhaustive()
    }
}

impl ConnEntry {
    /// Hand an encoded data-plane frame to this connection's bounded send
    /// channel. `false` means the frame was not queued — the channel is
    /// full (backpressure), closed, or the data socket has not attached
    /// yet; the caller keeps the subscriber keyframe-needed either way.
    pub fn send_data(&self, frame: Bytes) -> bool {
        let mut guard = self.data_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        let len = frame.len() as u64;
        match tx.try_send(frame) {
            Ok(()) => {
                self.tx_bytes.fetch_add(len, Ordering::Relaxed);
                true
            }
            Err(gchan::TrySendError::Full(_)) => false,
            Err(gchan::TrySendError::Closed(_)) => {
                // Stale socket; drop it so a reattach can replace it.
                *guard = None;
                false
            }
        }
    }

    /// Queue a control-plane notice, dropping it if the socket is gone or
    /// hopelessly behind.
    pub fn send_ctrl(&self, msg: ServerMessage) -> bool {
        self.ctrl_tx.try_send(msg).is_ok()
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_active_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn last_active_ms(&self) -> u64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }
}

/// Shared registry of sessions and connections.
pub struct Registry {
    inner: RwLock<Inner>,
    next_conn: AtomicU64,
    clock: Arc<dyn Clock>,
}

struct Inner {
    sessions: HashMap<String, Session>,
    conns: HashMap<ConnId, Arc<ConnEntry>>,
}

impl Registry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner { sessions: HashMap::new(), conns: HashMap::new() }),
            next_conn: AtomicU64::new(0),
            clock,
        }
    }

    /// Create a session and return its opaque token.
    pub fn new_session(&self, admin: bool) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let session = Session {
            token: token.clone(),
            admin,
            created_at_ms: self.clock.now_ms(),
            conns: HashSet::new(),
            panels: HashSet::new(),
            grants: HashMap::new(),
            stats: Arc::new(SessionStats::default()),
        };
        self.inner.write().sessions.insert(token.clone(), session);
        token
    }

    /// Remove a session. Returns its panels (for the caller to close) and
    /// its connections (their channels are closed here, which ends the
    /// socket pumps).
    pub fn close_session(&self, token: &str) -> Result<Vec<PanelId>, MuxError> {
        let mut inner = self.inner.write();
        let session = inner.sessions.remove(token).ok_or(MuxError::SessionNotFound)?;
        let panels: Vec<PanelId> = session.panels.iter().copied().collect();
        for conn_id in &session.conns {
            if let Some(conn) = inner.conns.remove(conn_id) {
                conn.ctrl_tx.close();
                if let Some(tx) = conn.data_tx.lock().take() {
                    tx.close();
                }
            }
        }
        Ok(panels)
    }

    /// Admit a control connection under `token`. The admin role requires
    /// an admin session.
    pub fn bind(
        &self,
        token: &str,
        role: Role,
        ctrl_tx: gchan::Sender<ServerMessage>,
    ) -> Result<Arc<ConnEntry>, MuxError> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(token).ok_or(MuxError::SessionNotFound)?;
        if role == Role::Admin && !session.admin {
            return Err(MuxError::Forbidden);
        }
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed) + 1;
        session.conns.insert(id);
        let entry = Arc::new(ConnEntry {
            id,
            session: token.to_owned(),
            role,
            ctrl_tx,
            data_tx: Mutex::new(None),
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            last_active_ms: AtomicU64::new(now),
        });
        inner.conns.insert(id, Arc::clone(&entry));
        Ok(entry)
    }

    /// Pair the data socket with an admitted connection. The token must
    /// match the one the connection bound with.
    pub fn attach_data(
        &self,
        conn_id: ConnId,
        token: &str,
        data_tx: gchan::Sender<Bytes>,
    ) -> Result<Arc<ConnEntry>, MuxError> {
        let inner = self.inner.read();
        let conn = inner.conns.get(&conn_id).ok_or(MuxError::SessionNotFound)?;
        if !crate::transport::auth::token_eq(&conn.session, token) {
            return Err(MuxError::Forbidden);
        }
        *conn.data_tx.lock() = Some(data_tx);
        Ok(Arc::clone(conn))
    }

    /// Detach the data socket only; the control connection stays bound.
    /// Closing the channel ends the socket pump and makes panel fan-out
    /// prune this subscriber on its next send.
    pub fn detach_data(&self, conn_id: ConnId) {
        let inner = self.inner.read();
        if let Some(conn) = inner.conns.get(&conn_id) {
            if let Some(tx) = conn.data_tx.lock().take() {
                tx.close();
            }
        }
    }

    /// Drop a connection; its channels are closed so the pumps end.
    pub fn remove_conn(&self, conn_id: ConnId) {
        let mut inner = self.inner.write();
        if let Some(conn) = inner.conns.remove(&conn_id) {
            if let Some(session) = inner.sessions.get_mut(&conn.session) {
                session.conns.remove(&conn_id);
            }
            conn.ctrl_tx.close();
            if let Some(tx) = conn.data_tx.lock().take() {
                tx.close();
            }
        }
    }

    pub fn conn(&self, conn_id: ConnId) -> Option<Arc<ConnEntry>> {
        self.inner.read().conns.get(&conn_id).cloned()
    }

    /// The role `conn` holds on `panel`, or `None` when the panel is
    /// neither owned by nor granted to the connection's session.
    pub fn panel_role(&self, conn: &ConnEntry, panel: PanelId) -> Option<Role> {
        let inner = self.inner.read();
        let session = inner.sessions.get(&conn.session)?;
        if session.panels.contains(&panel) {
            return Some(conn.role);
        }
        session.grants.get(&panel).map(|granted| (*granted).min(conn.role))
    }

    pub fn add_panel(&self, token: &str, panel: PanelId) -> Result<(), MuxError> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(token).ok_or(MuxError::SessionNotFound)?;
        session.panels.insert(panel);
        Ok(())
    }

    pub fn remove_panel(&self, token: &str, panel: PanelId) {
        let mut inner = self.inner.write();
        if let Some(session) = inner.sessions.get_mut(token) {
            session.panels.remove(&panel);
        }
        for session in inner.sessions.values_mut() {
            session.grants.remove(&panel);
        }
    }

    /// Grant `role` on `panel` to another session.
    pub fn grant(&self, token: &str, panel: PanelId, role: Role) -> Result<(), MuxError> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(token).ok_or(MuxError::SessionNotFound)?;
        session.grants.insert(panel, role);
        Ok(())
    }

    pub fn revoke(&self, token: &str, panel: PanelId) -> Result<(), MuxError> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(token).ok_or(MuxError::SessionNotFound)?;
        session.grants.remove(&panel);
        Ok(())
    }

    pub fn list_panels(&self, token: &str) -> Result<Vec<PanelId>, MuxError> {
        let inner = self.inner.read();
        let session = inner.sessions.get(token).ok_or(MuxError::SessionNotFound)?;
        let mut panels: Vec<PanelId> = session.panels.iter().copied().collect();
        panels.extend(session.grants.keys().copied());
        panels.sort_unstable();
        panels.dedup();
        Ok(panels)
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let inner = self.inner.read();
        let mut out: Vec<SessionInfo> = inner
            .sessions
            .values()
            .map(|s| SessionInfo {
                session: s.token.clone(),
                admin: s.admin,
                connections: s.conns.len(),
                panels: {
                    let mut p: Vec<PanelId> = s.panels.iter().copied().collect();
                    p.sort_unstable();
                    p
                },
            })
            .collect();
        out.sort_by(|a, b| a.session.cmp(&b.session));
        out
    }

    pub fn session_exists(&self, token: &str) -> bool {
        self.inner.read().sessions.contains_key(token)
    }

    pub fn session_stats(&self, token: &str) -> Option<Arc<SessionStats>> {
        self.inner.read().sessions.get(token).map(|s| Arc::clone(&s.stats))
    }

    pub fn stats_report(&self) -> HashMap<String, StatsSnapshot> {
        self.inner
            .read()
            .sessions
            .values()
            .map(|s| (s.token.clone(), s.stats.snapshot()))
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn conn_count(&self) -> usize {
        self.inner.read().conns.len()
    }

    pub fn session_created_at(&self, token: &str) -> Option<u64> {
        self.inner.read().sessions.get(token).map(|s| s.created_at_ms)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
