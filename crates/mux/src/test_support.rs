// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for pipeline tests: a pipe-backed synthetic PTY, a
//! failure-injecting encoder, and channel polling with deadlines. Ticks
//! are driven by hand, which together with [`crate::clock::ManualClock`]
//! makes the pipeline fully deterministic under test.

#![allow(unsafe_code)]

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::libc;
use parking_lot::Mutex;

use mux_rt::gchan;

use crate::emulator::Surface;
use crate::encoder::{EncoderError, Packet, VideoEncoder};
use crate::pty::{ExitStatus, PanelPty};

fn pipe_pair() -> (RawFd, RawFd) {
    let mut fds = [0i32; 2];
    // SAFETY: fds is a two-element array as pipe(2) requires.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed");
    (fds[0], fds[1])
}

fn set_nonblocking(fd: RawFd) {
    // SAFETY: plain fcntl on an owned fd.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

/// Pipe-backed stand-in for a PTY: the test writes "terminal output" and
/// reads back whatever input the panel writes.
pub struct SyntheticPty {
    /// Panel reads terminal output here.
    out_read: RawFd,
    /// Test writes terminal output here; taken on EOF.
    out_write: Mutex<Option<RawFd>>,
    /// Test reads panel input here.
    in_read: RawFd,
    /// Panel writes input here.
    in_write: RawFd,
    exit: Mutex<Option<ExitStatus>>,
    resizes: Mutex<Vec<(u16, u16)>>,
    shutdown_called: AtomicBool,
}

impl SyntheticPty {
    pub fn new() -> Arc<Self> {
        let (out_read, out_write) = pipe_pair();
        let (in_read, in_write) = pipe_pair();
        set_nonblocking(in_read);
        Arc::new(Self {
            out_read,
            out_write: Mutex::new(Some(out_write)),
            in_read,
            in_write,
            exit: Mutex::new(None),
            resizes: Mutex::new(Vec::new()),
            shutdown_called: AtomicBool::new(false),
        })
    }

    /// Emit terminal output for the panel's pty_reader.
    pub fn feed_output(&self, data: &[u8]) {
        let guard = self.out_write.lock();
        let Some(fd) = *guard else { return };
        // SAFETY: valid fd and buffer.
        let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        assert_eq!(n as usize, data.len(), "short synthetic pty write");
    }

    /// Collect input bytes the panel wrote, until `expected` bytes or the
    /// deadline.
    pub fn read_input(&self, expected: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while out.len() < expected && Instant::now() < deadline {
            // SAFETY: valid nonblocking fd and buffer.
            let n = unsafe { libc::read(self.in_read, buf.as_mut_ptr().cast(), buf.len()) };
            if n > 0 {
                out.extend_from_slice(&buf[..n as usize]);
            } else {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        out
    }

    /// Simulate child exit: record the status and close the output pipe
    /// so the reader observes EOF.
    pub fn finish(&self, status: ExitStatus) {
        *self.exit.lock() = Some(status);
        if let Some(fd) = self.out_write.lock().take() {
            // SAFETY: fd owned by this struct, closed exactly once.
            unsafe { libc::close(fd) };
        }
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().clone()
    }

    pub fn shutdown_was_called(&self) -> bool {
        self.shutdown_called.load(Ordering::Acquire)
    }
}

impl PanelPty for SyntheticPty {
    fn read_fd(&self) -> RawFd {
        self.out_read
    }

    fn write_fd(&self) -> RawFd {
        self.in_write
    }

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.resizes.lock().push((cols, rows));
        Ok(())
    }

    fn try_wait(&self) -> anyhow::Result<Option<ExitStatus>> {
        Ok(*self.exit.lock())
    }

    fn shutdown(&self) {
        self.shutdown_called.store(true, Ordering::Release);
        self.exit.lock().get_or_insert(ExitStatus { code: None, signal: None });
        if let Some(fd) = self.out_write.lock().take() {
            // SAFETY: fd owned by this struct, closed exactly once.
            unsafe { libc::close(fd) };
        }
    }
}

impl Drop for SyntheticPty {
    fn drop(&mut self) {
        // SAFETY: fds owned by this struct.
        unsafe {
            libc::close(self.out_read);
            libc::close(self.in_read);
            libc::close(self.in_write);
        }
        if let Some(fd) = self.out_write.lock().take() {
            // SAFETY: as above.
            unsafe { libc::close(fd) };
        }
    }
}

/// Encoder that fails every submission; exercises the reinit-then-close
/// path.
pub struct FailingEncoder;

impl VideoEncoder for FailingEncoder {
    fn submit(
        &mut self,
        _surface: &Surface<'_>,
        _force_keyframe: bool,
    ) -> Result<Option<Packet>, EncoderError> {
        Err(EncoderError::new("injected failure"))
    }

    fn resize(&mut self, _width: u32, _height: u32) {}

    fn close(&mut self) {}
}

/// Poll a goroutine channel from a plain thread with a deadline.
pub fn recv_timeout<T>(rx: &gchan::Receiver<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.try_recv() {
            Ok(v) => return Some(v),
            Err(gchan::TryRecvError::Closed) => return None,
            Err(gchan::TryRecvError::Empty) => {
                if Instant::now() > deadline {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }
    }
}

/// Wait until `pred` holds or the deadline passes.
pub fn wait_for(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
