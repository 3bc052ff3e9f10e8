// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-visible error codes for the mux protocol.
///
/// Faults are isolated to the smallest restartable unit: a protocol
/// violation closes one connection, a PTY or encoder failure closes one
/// panel, and `forbidden` closes nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuxError {
    Forbidden,
    ProtocolError,
    ResourceExhausted,
    SessionNotFound,
    PanelNotFound,
    EncoderFailed,
    PtyClosed,
    Internal,
}

impl MuxError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::ProtocolError => "protocol_error",
            Self::ResourceExhausted => "resource_exhausted",
            Self::SessionNotFound => "session_not_found",
            Self::PanelNotFound => "panel_not_found",
            Self::EncoderFailed => "encoder_failed",
            Self::PtyClosed => "pty_closed",
            Self::Internal => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Forbidden => 403,
            Self::ProtocolError => 400,
            Self::ResourceExhausted => 503,
            Self::SessionNotFound | Self::PanelNotFound => 404,
            Self::EncoderFailed | Self::PtyClosed | Self::Internal => 500,
        }
    }
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for MuxError {}
