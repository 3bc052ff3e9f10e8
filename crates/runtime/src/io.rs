// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Async I/O integration.
//!
//! A goroutine submits a read or write tagged with its own id, is parked,
//! and is unparked by the completion poller with the transfer result in
//! its result slot. `poll_io` is driven by whichever worker runs out of
//! work. Outside a goroutine both operations degrade to blocking calls
//! that pin the OS thread; correctness is preserved, throughput drops.
//!
//! There is no cancellation at this layer: closing the fd induces an
//! error (or EOF) completion that unparks the goroutine.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;

use nix::libc;
use parking_lot::Mutex;

use crate::goroutine::GoRef;
use crate::sched;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dir {
    Read,
    Write,
}

struct PendingOp {
    g: GoRef,
    fd: RawFd,
    dir: Dir,
    buf: *mut u8,
    len: usize,
}

// SAFETY: the buffer belongs to a parked goroutine whose frame stays
// frozen until the poller unparks it.
unsafe impl Send for PendingOp {}

/// Pending-operation map keyed by goroutine id, drained by `poll`.
pub(crate) struct Reactor {
    pending: Mutex<HashMap<u64, PendingOp>>,
}

impl Reactor {
    pub(crate) fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }

    fn register(&self, tag: u64, op: PendingOp) {
        self.pending.lock().insert(tag, op);
    }

    /// Drain ready completions without blocking. Returns true when at
    /// least one goroutine was unparked.
    pub(crate) fn poll(&self) -> bool {
        let mut fds: Vec<libc::pollfd> = Vec::new();
        let mut tags: Vec<u64> = Vec::new();
        {
            let pending = self.pending.lock();
            if pending.is_empty() {
                return false;
            }
            for (tag, op) in pending.iter() {
                let events = match op.dir {
                    Dir::Read => libc::POLLIN,
                    Dir::Write => libc::POLLOUT,
                };
                fds.push(libc::pollfd { fd: op.fd, events, revents: 0 });
                tags.push(*tag);
            }
        }

        // SAFETY: fds is a live array for the duration of the call.
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 0) };
        if n <= 0 {
            return false;
        }

        let mut woken: Vec<GoRef> = Vec::new();
        {
            let mut pending = self.pending.lock();
            for (pfd, tag) in fds.iter().zip(&tags) {
                if pfd.revents == 0 {
                    continue;
                }
                let Some(op) = pending.get(tag) else { continue };
                match attempt_io(op.fd, op.buf, op.len, op.dir) {
                    Attempt::WouldBlock => {}
                    Attempt::Done(res) => {
                        let g = op.g;
                        // SAFETY: parked goroutines keep their descriptor
                        // alive until unparked.
                        unsafe {
                            *(*g.as_ptr()).io_result.lock() = Some(res);
                        }
                        pending.remove(tag);
                        woken.push(g);
                    }
                }
            }
        }

        // The map lock is released before unparking to keep lock order
        // with the runtime's idle machinery one-directional.
        let any = !woken.is_empty();
        for g in woken {
            sched::unpark(g);
        }
        any
    }
}

/// Read into `buf`, parking the calling goroutine until data (or EOF, or
/// an error) arrives. Outside a goroutine: a plain blocking read.
pub fn async_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    submit(fd, buf.as_mut_ptr(), buf.len(), Dir::Read)
}

/// Write from `buf`, parking the calling goroutine until the fd accepts
/// bytes. Returns the number written (may be short).
pub fn async_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    submit(fd, buf.as_ptr().cast_mut(), buf.len(), Dir::Write)
}

fn submit(fd: RawFd, buf: *mut u8, len: usize, dir: Dir) -> io::Result<usize> {
    let shared = match sched::current_shared() {
        Some(s) if sched::on_runtime() => s,
        _ => return blocking(fd, buf, len, dir),
    };

    set_nonblocking(fd)?;

    // Try once before parking; readiness may already be there.
    if let Attempt::Done(res) = attempt_io(fd, buf, len, dir) {
        return res;
    }

    let Some(g) = sched::prepare_park() else {
        return blocking(fd, buf, len, dir);
    };
    shared.reactor.register(g.id(), PendingOp { g, fd, dir, buf, len });
    sched::park_current();

    // SAFETY: we are the goroutine whose slot the poller filled.
    let res = unsafe { (*g.as_ptr()).io_result.lock().take() };
    res.unwrap_or_else(|| Err(io::Error::other("io completion missing")))
}

enum Attempt {
    WouldBlock,
    Done(io::Result<usize>),
}

fn attempt_io(fd: RawFd, buf: *mut u8, len: usize, dir: Dir) -> Attempt {
    // SAFETY: buf/len describe a live buffer owned by the caller (or a
    // parked goroutine).
    let rc = unsafe {
        match dir {
            Dir::Read => libc::read(fd, buf.cast(), len),
            Dir::Write => libc::write(fd, buf.cast(), len),
        }
    };
    if rc >= 0 {
        return Attempt::Done(Ok(rc as usize));
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EAGAIN || code == libc::EINTR => Attempt::WouldBlock,
        _ => Attempt::Done(Err(err)),
    }
}

/// Degraded path: pin the calling OS thread until the transfer finishes.
fn blocking(fd: RawFd, buf: *mut u8, len: usize, dir: Dir) -> io::Result<usize> {
    loop {
        match attempt_io(fd, buf, len, dir) {
            Attempt::Done(res) => return res,
            Attempt::WouldBlock => {
                let events = match dir {
                    Dir::Read => libc::POLLIN,
                    Dir::Write => libc::POLLOUT,
                };
                let mut pfd = libc::pollfd { fd, events, revents: 0 };
                // SAFETY: single pollfd on this stack frame.
                let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
                if rc < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EINTR) {
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    // SAFETY: `fd` is borrowed for the duration of this function only.
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    let flags = fcntl(borrowed, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(borrowed, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

#[cfg(test)]
#[path = "io_tests.rs"]
mod tests;
