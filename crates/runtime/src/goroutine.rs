// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Goroutine descriptors and their stacks.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;

use nix::libc;
use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{RtError, RtResult};
use crate::sched::RtShared;

/// Lifecycle states. `PARKING` is the window between a goroutine asking to
/// block and its worker finishing the context save; an unpark landing in
/// that window records itself as `WAKE_PENDING` instead of requeueing, so
/// a wakeup can never race a half-saved context.
pub(crate) const RUNNABLE: u8 = 0;
pub(crate) const RUNNING: u8 = 1;
pub(crate) const PARKING: u8 = 2;
pub(crate) const BLOCKED: u8 = 3;
pub(crate) const WAKE_PENDING: u8 = 4;
pub(crate) const DEAD: u8 = 5;

/// Fixed goroutine stack size. Stacks are non-relocatable; deep recursion
/// hits the guard page and faults.
pub(crate) const STACK_SIZE: usize = 64 * 1024;

/// A lightweight, cooperatively scheduled unit of execution.
///
/// The descriptor is heap-allocated by `spawn`, handed around queues and
/// waitlists as a raw pointer, and freed by the worker that observes it
/// `DEAD` after its entry function returned.
pub(crate) struct Goroutine {
    pub(crate) id: u64,
    pub(crate) state: AtomicU8,
    pub(crate) ctx: Context,
    pub(crate) stack: Stack,
    pub(crate) entry: Option<Box<dyn FnOnce() + Send>>,
    /// Intrusive link used while queued; null when not in a queue.
    pub(crate) next: *mut Goroutine,
    /// Completion slot filled by the I/O poller before unparking.
    pub(crate) io_result: Mutex<Option<std::io::Result<usize>>>,
    pub(crate) shared: Arc<RtShared>,
}

impl Goroutine {
    pub(crate) fn new(
        id: u64,
        shared: Arc<RtShared>,
        entry: Box<dyn FnOnce() + Send>,
    ) -> RtResult<Box<Self>> {
        let stack = Stack::alloc()?;
        Ok(Box::new(Self {
            id,
            state: AtomicU8::new(RUNNABLE),
            ctx: Context::zeroed(),
            stack,
            entry: Some(entry),
            next: std::ptr::null_mut(),
            io_result: Mutex::new(None),
            shared,
        }))
    }
}

/// Opaque handle to a parked or queued goroutine, used by wakers.
///
/// A `GoRef` obtained from a park registration must be passed to `unpark`
/// exactly once; the runtime's queues own the only other references.
#[derive(Clone, Copy, Debug)]
pub struct GoRef(pub(crate) NonNull<Goroutine>);

// SAFETY: the descriptor is shared across worker threads by design; all
// mutation is serialised by the state machine and queue locks.
unsafe impl Send for GoRef {}

impl GoRef {
    pub(crate) fn as_ptr(self) -> *mut Goroutine {
        self.0.as_ptr()
    }

    /// The goroutine's monotonic id.
    pub fn id(self) -> u64 {
        // SAFETY: ids are immutable and the descriptor outlives every
        // GoRef per the waker contract.
        unsafe { self.0.as_ref().id }
    }
}

/// A guard-paged, mmap'd goroutine stack. The PROT_NONE page sits at the
/// low end; the usable region ends at `top()`.
pub(crate) struct Stack {
    base: *mut u8,
    len: usize,
}

// SAFETY: the mapping is owned by the descriptor and only touched by the
// worker currently executing the goroutine.
unsafe impl Send for Stack {}

impl Stack {
    pub(crate) fn alloc() -> RtResult<Self> {
        let page = page_size();
        let len = STACK_SIZE + page;

        // SAFETY: anonymous private mapping with a kernel-chosen address;
        // no fd is involved.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(RtError::StackAlloc(std::io::Error::last_os_error()));
        }

        // SAFETY: protecting the first page of the mapping created above.
        let rc = unsafe { libc::mprotect(base, page, libc::PROT_NONE) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: unmapping the mapping created above.
            unsafe { libc::munmap(base, len) };
            return Err(RtError::StackAlloc(err));
        }

        Ok(Self { base: base.cast(), len })
    }

    /// One past the highest usable byte; stacks grow downward from here.
    pub(crate) fn top(&self) -> *mut u8 {
        // SAFETY: base..base+len is the owned mapping.
        unsafe { self.base.add(self.len) }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: unmapping the mapping allocated in `alloc`.
        let _ = unsafe { libc::munmap(self.base.cast(), self.len) };
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
}
