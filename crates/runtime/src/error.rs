// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the runtime. Scheduling itself has no recoverable
/// failures; everything here is resource acquisition or misuse.
#[derive(Debug)]
pub enum RtError {
    /// Goroutine stack allocation failed.
    StackAlloc(std::io::Error),
    /// A worker OS thread could not be created.
    Thread(std::io::Error),
    /// The operation requires running inside a goroutine.
    NotOnRuntime,
}

impl fmt::Display for RtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackAlloc(e) => write!(f, "goroutine stack allocation failed: {e}"),
            Self::Thread(e) => write!(f, "worker thread spawn failed: {e}"),
            Self::NotOnRuntime => f.write_str("not running inside a goroutine"),
        }
    }
}

impl std::error::Error for RtError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StackAlloc(e) | Self::Thread(e) => Some(e),
            Self::NotOnRuntime => None,
        }
    }
}

pub type RtResult<T> = Result<T, RtError>;
