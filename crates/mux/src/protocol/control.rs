// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane message types: JSON over the control WebSocket, one
//! message per event, closed tagged variants on `type`.

use serde::{Deserialize, Serialize};

use crate::error::MuxError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreatePanel {
        cols: Option<u16>,
        rows: Option<u16>,
    },
    ClosePanel {
        panel: u32,
    },
    ResizePanel {
        panel: u32,
        cols: u16,
        rows: u16,
    },
    FocusPanel {
        panel: u32,
    },
    Subscribe {
        panel: u32,
    },
    Unsubscribe {
        panel: u32,
    },
    ListSessions {},
    ListPanels {},
    Grant {
        session: String,
        panel: u32,
        role: String,
    },
    Revoke {
        session: String,
        panel: u32,
    },
    Scrollback {
        panel: u32,
        #[serde(default)]
        len: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        conn: u64,
        session: String,
        role: String,
    },
    Created {
        panel: u32,
        cols: u16,
        rows: u16,
    },
    Exit {
        panel: u32,
        code: Option<i32>,
        signal: Option<i32>,
    },
    Error {
        code: String,
        message: String,
    },
    Forbidden {
        reason: String,
    },
    Title {
        panel: u32,
        title: String,
    },
    Pwd {
        panel: u32,
        pwd: String,
    },
    Bell {
        panel: u32,
    },
    Sessions {
        sessions: Vec<SessionInfo>,
    },
    Panels {
        panels: Vec<PanelInfo>,
    },
    ScrollbackData {
        panel: u32,
        /// Base64 of the most recent bytes in the panel's scrollback ring.
        data: String,
        /// Global byte offset of the first returned byte.
        offset: u64,
    },
    Resized {
        panel: u32,
        cols: u16,
        rows: u16,
    },
    Focused {
        panel: u32,
    },
    Granted {
        session: String,
        panel: u32,
        role: String,
    },
    Revoked {
        session: String,
        panel: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session: String,
    pub admin: bool,
    pub connections: usize,
    pub panels: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelInfo {
    pub panel: u32,
    pub cols: u16,
    pub rows: u16,
    pub title: String,
    pub pwd: String,
    pub state: String,
}

/// Build a control-plane error message.
pub fn error_msg(code: MuxError, message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error { code: code.as_str().to_owned(), message: message.into() }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
