// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time sources. The server uses [`SystemClock`] and a [`Ticker`] thread
//! per panel; tests drive [`ManualClock`] and send ticks by hand for a
//! deterministic pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mux_rt::gchan;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock in epoch milliseconds.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        epoch_ms()
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Hand-advanced clock for tests.
#[derive(Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(start_ms)))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Frame-rate tick source for one panel's encoder driver.
///
/// Runs on a plain OS thread and pushes through the goroutine-aware tick
/// channel; when the panel closes its tick channel, the failed send ends
/// the thread.
pub struct Ticker;

impl Ticker {
    pub fn spawn(fps: u32, tx: gchan::Sender<()>) -> std::thread::JoinHandle<()> {
        let interval = Duration::from_millis(1000 / u64::from(fps.clamp(1, 240)));
        std::thread::spawn(move || {
            loop {
                std::thread::sleep(interval);
                if !tx.send(()) {
                    return;
                }
            }
        })
    }
}
