// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! M:N work-stealing scheduler.
//!
//! N worker OS threads each run one goroutine at a time. Worker 0 runs on
//! the caller's thread inside [`Runtime::wait_all`] / [`Runtime::run`];
//! the rest own native threads. Each worker has a lock-free local ring
//! plus a mutex overflow queue; a shared global queue acts as spillover
//! and as the rendezvous point for unpark, which deliberately biases
//! freshly woken goroutines away from whichever worker was last hot.
//!
//! Goroutines are never preempted. They leave the CPU only at explicit
//! yield / park / channel-block / async-I/O points, and a worker only
//! publishes a descriptor back to the queues after the context save has
//! completed, so a wakeup can never observe a half-saved context.

#![allow(unsafe_code)]

use std::cell::Cell;
use std::ffi::c_void;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::context::{self, Context};
use crate::error::{RtError, RtResult};
use crate::goroutine::{GoRef, Goroutine, BLOCKED, DEAD, PARKING, RUNNABLE, RUNNING, WAKE_PENDING};
use crate::io::Reactor;
use crate::queue::Queue;
use crate::ring::SpscRing;

const LOCAL_RING_CAP: usize = 256;
/// Idle workers wake at least this often so a lost condvar signal cannot
/// stall the scheduler or the I/O poller.
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// State shared by all workers of one runtime.
pub(crate) struct RtShared {
    workers: Vec<WorkerShared>,
    pub(crate) global: Queue,
    idle_lock: Mutex<()>,
    pub(crate) idle_cv: Condvar,
    pub(crate) shutdown: AtomicBool,
    next_id: AtomicU64,
    pub(crate) active: AtomicUsize,
    pub(crate) reactor: Reactor,
    worker0_busy: AtomicBool,
}

struct WorkerShared {
    ring: SpscRing,
    overflow: Queue,
}

impl RtShared {
    pub(crate) fn new(workers: usize) -> Self {
        let workers = (0..workers.max(1))
            .map(|_| WorkerShared {
                ring: SpscRing::with_capacity(LOCAL_RING_CAP),
                overflow: Queue::new(),
            })
            .collect();
        Self {
            workers,
            global: Queue::new(),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            reactor: Reactor::new(),
            worker0_busy: AtomicBool::new(false),
        }
    }

    /// Push onto the global queue and wake one idle worker.
    pub(crate) fn push_global(&self, g: GoRef) {
        self.global.push(g);
        self.idle_cv.notify_one();
    }
}

/// Per-thread worker state. Lives on its thread's stack; goroutines reach
/// it only through this thread's TLS pointer.
struct Worker {
    index: usize,
    shared: Arc<RtShared>,
    sched_ctx: Context,
    current: *mut Goroutine,
    pending: Pending,
}

/// What the goroutine that just swapped out asked its worker to do.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Yield,
    Park,
    Exit,
}

thread_local! {
    static CURRENT_WORKER: Cell<*mut Worker> = const { Cell::new(ptr::null_mut()) };
}

fn worker_ptr() -> *mut Worker {
    CURRENT_WORKER.with(|w| w.get())
}

/// The worker index of the calling goroutine, if any.
pub fn worker_index() -> Option<usize> {
    let wp = worker_ptr();
    if wp.is_null() {
        None
    } else {
        // SAFETY: TLS points at the live worker of this thread.
        unsafe { Some((*wp).index) }
    }
}

/// Whether the caller is executing inside a goroutine.
pub fn on_runtime() -> bool {
    let wp = worker_ptr();
    // SAFETY: TLS points at the live worker of this thread.
    !wp.is_null() && unsafe { !(*wp).current.is_null() }
}

// -- Runtime ------------------------------------------------------------------

/// Handle to a scheduler instance: a set of workers, the global queue and
/// the I/O reactor. Dropping the handle shuts the workers down.
pub struct Runtime {
    shared: Arc<RtShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Default worker count: one per CPU, capped at 8.
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8)
}

impl Runtime {
    /// Create a runtime with `workers` workers (min 1). Workers 1..N start
    /// immediately on native threads; worker 0 waits for a caller to drive
    /// it via [`Runtime::wait_all`] or [`Runtime::run`].
    pub fn new(workers: usize) -> RtResult<Self> {
        let n = workers.max(1);
        let shared = Arc::new(RtShared::new(n));
        let mut threads = Vec::with_capacity(n.saturating_sub(1));
        for i in 1..n {
            let s = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("mux-worker-{i}"))
                .spawn(move || worker_main(s, i));
            match spawned {
                Ok(t) => threads.push(t),
                Err(e) => {
                    shared.shutdown.store(true, Ordering::Release);
                    shared.idle_cv.notify_all();
                    for t in threads {
                        let _ = t.join();
                    }
                    return Err(RtError::Thread(e));
                }
            }
        }
        tracing::debug!(workers = n, "scheduler started");
        Ok(Self { shared, threads: Mutex::new(threads) })
    }

    /// Spawn a goroutine. From inside a goroutine the child lands on the
    /// spawning worker's local queue; otherwise on the global queue.
    pub fn spawn<F>(&self, f: F) -> RtResult<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        spawn_on(&self.shared, Box::new(f))
    }

    /// Goroutines created and not yet observed dead.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Runnable goroutines currently sitting in queues (advisory).
    pub fn queued(&self) -> usize {
        let shared = &self.shared;
        let mut n = shared.global.len();
        for ws in &shared.workers {
            n += ws.ring.len() + ws.overflow.len();
        }
        n
    }

    /// Drive worker 0 on the calling thread until the active-count reaches
    /// zero or shutdown is requested. Must not be called from a goroutine.
    pub fn wait_all(&self) {
        self.drive(|s| s.active.load(Ordering::SeqCst) == 0);
    }

    /// Drive worker 0 on the calling thread until shutdown.
    pub fn run(&self) {
        self.drive(|_| false);
    }

    /// Request shutdown and join the native worker threads. Goroutines
    /// still queued are abandoned.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.idle_cv.notify_all();
        let mut threads = self.threads.lock();
        if threads.is_empty() {
            return;
        }
        for t in threads.drain(..) {
            let _ = t.join();
        }
        tracing::debug!(abandoned = self.shared.active.load(Ordering::SeqCst), "scheduler stopped");
    }

    fn drive(&self, until: impl Fn(&RtShared) -> bool) {
        let shared = &self.shared;
        if shared
            .worker0_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Worker 0 is already driven elsewhere; wait out the condition.
            let mut guard = shared.idle_lock.lock();
            while !until(shared) && !shared.shutdown.load(Ordering::Acquire) {
                shared.idle_cv.wait_for(&mut guard, Duration::from_millis(10));
            }
            return;
        }

        let mut w = Worker {
            index: 0,
            shared: Arc::clone(shared),
            sched_ctx: Context::zeroed(),
            current: ptr::null_mut(),
            pending: Pending::None,
        };
        let wp: *mut Worker = &mut w;
        let prev = CURRENT_WORKER.with(|c| c.replace(wp));

        // SAFETY: wp stays valid for the whole loop; goroutines re-enter
        // the worker only through this thread's TLS pointer.
        unsafe {
            loop {
                if (&(*wp).shared).shutdown.load(Ordering::Acquire) || until(&(*wp).shared) {
                    break;
                }
                match find_runnable(wp) {
                    Some(g) => execute(wp, g),
                    None => idle_wait(&(*wp).shared),
                }
            }
        }

        CURRENT_WORKER.with(|c| c.set(prev));
        shared.worker0_busy.store(false, Ordering::Release);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(shared: Arc<RtShared>, index: usize) {
    let mut w = Worker {
        index,
        shared,
        sched_ctx: Context::zeroed(),
        current: ptr::null_mut(),
        pending: Pending::None,
    };
    let wp: *mut Worker = &mut w;
    CURRENT_WORKER.with(|c| c.set(wp));

    // SAFETY: as in `drive`.
    unsafe {
        while !(&(*wp).shared).shutdown.load(Ordering::Acquire) {
            match find_runnable(wp) {
                Some(g) => execute(wp, g),
                None => idle_wait(&(*wp).shared),
            }
        }
    }

    CURRENT_WORKER.with(|c| c.set(ptr::null_mut()));
}

// -- Spawning -----------------------------------------------------------------

/// Spawn from inside a goroutine, onto the same runtime.
pub fn spawn<F>(f: F) -> RtResult<u64>
where
    F: FnOnce() + Send + 'static,
{
    let wp = worker_ptr();
    if wp.is_null() {
        return Err(RtError::NotOnRuntime);
    }
    // SAFETY: TLS worker of this thread.
    let shared = unsafe { (*wp).shared.clone() };
    spawn_on(&shared, Box::new(f))
}

fn spawn_on(shared: &Arc<RtShared>, f: Box<dyn FnOnce() + Send>) -> RtResult<u64> {
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let mut g = Goroutine::new(id, Arc::clone(shared), f)?;

    let gp: *mut Goroutine = &mut *g;
    let top = g.stack.top();
    context::make(&mut g.ctx, top, goroutine_entry, gp.cast::<c_void>(), goroutine_exit);

    shared.active.fetch_add(1, Ordering::SeqCst);
    // The box address is stable; gp and into_raw agree.
    let gp = Box::into_raw(g);
    // SAFETY: fresh box, never null.
    let gref = GoRef(unsafe { NonNull::new_unchecked(gp) });

    let wp = worker_ptr();
    let mut queued_local = false;
    if !wp.is_null() {
        // SAFETY: TLS worker of this thread.
        unsafe {
            if Arc::ptr_eq(&(*wp).shared, shared) {
                push_local(&(*wp).shared, (*wp).index, gref);
                queued_local = true;
            }
        }
    }
    if !queued_local {
        shared.global.push(gref);
    }
    shared.idle_cv.notify_one();
    Ok(id)
}

fn push_local(shared: &RtShared, index: usize, g: GoRef) {
    let ws = &shared.workers[index];
    if let Err(v) = ws.ring.push(g.as_ptr() as usize) {
        // Ring full: spill to the overflow queue.
        // SAFETY: v is the non-null pointer we just failed to push.
        ws.overflow.push(GoRef(unsafe { NonNull::new_unchecked(v as *mut Goroutine) }));
    }
}

extern "C" fn goroutine_entry(arg: *mut c_void) {
    let g = arg.cast::<Goroutine>();
    // SAFETY: arg is the descriptor published by spawn; only the executing
    // worker touches `entry`. A panic in the body would cross the ABI
    // boundary and abort the process.
    if let Some(f) = unsafe { (*g).entry.take() } {
        f();
    }
}

extern "C" fn goroutine_exit() -> ! {
    let wp = worker_ptr();
    // SAFETY: the exit trampoline only runs on a worker thread, on the
    // stack of the goroutine recorded as `current`.
    unsafe {
        let g = (*wp).current;
        (*g).state.store(DEAD, Ordering::Release);
        (&(*wp).shared).active.fetch_sub(1, Ordering::SeqCst);
        // Wake the join path; the worker frees the stack after the swap.
        (&(*wp).shared).idle_cv.notify_all();
        (*wp).pending = Pending::Exit;
        context::swap(&mut (*g).ctx, &(*wp).sched_ctx);
    }
    // A dead context is never resumed.
    std::process::abort();
}

// -- Worker loop --------------------------------------------------------------

/// Search order is strict: local ring, local overflow, global queue, steal
/// sweep over the other workers, then the I/O poller.
unsafe fn find_runnable(wp: *mut Worker) -> Option<GoRef> {
    let shared: &RtShared = &(*wp).shared;
    let index = (*wp).index;
    let me = &shared.workers[index];

    if let Some(v) = me.ring.pop() {
        return Some(GoRef(NonNull::new_unchecked(v as *mut Goroutine)));
    }
    if let Some(g) = me.overflow.pop() {
        return Some(g);
    }
    if let Some(g) = shared.global.pop() {
        return Some(g);
    }

    let n = shared.workers.len();
    for off in 1..n {
        let j = (index + off) % n;
        let other = &shared.workers[j];
        if let Some(v) = other.ring.steal() {
            return Some(GoRef(NonNull::new_unchecked(v as *mut Goroutine)));
        }
        if other.overflow.len() >= 2 {
            let stolen = other.overflow.steal_half();
            let first = stolen.pop();
            while let Some(g) = stolen.pop() {
                push_local(shared, index, g);
            }
            if first.is_some() {
                return first;
            }
        }
    }

    if shared.reactor.poll() {
        return shared.global.pop();
    }
    None
}

unsafe fn execute(wp: *mut Worker, g: GoRef) {
    let gp = g.as_ptr();
    (*gp).state.store(RUNNING, Ordering::Release);
    (*wp).current = gp;
    (*wp).pending = Pending::None;

    context::swap(&mut (*wp).sched_ctx, &(*gp).ctx);

    (*wp).current = ptr::null_mut();
    match mem::replace(&mut (*wp).pending, Pending::None) {
        Pending::Exit => {
            debug_assert_eq!((*gp).state.load(Ordering::Acquire), DEAD);
            drop(Box::from_raw(gp));
        }
        Pending::Park => {
            // Publish BLOCKED now that the context save is complete. A
            // wake that raced the save left WAKE_PENDING behind; honour
            // it by requeueing immediately.
            if (*gp)
                .state
                .compare_exchange(PARKING, BLOCKED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                (*gp).state.store(RUNNABLE, Ordering::Release);
                (*wp).shared.push_global(g);
            }
        }
        Pending::Yield | Pending::None => {
            (*gp).state.store(RUNNABLE, Ordering::Release);
            push_local(&(*wp).shared, (*wp).index, g);
        }
    }
}

fn idle_wait(shared: &RtShared) {
    let mut guard = shared.idle_lock.lock();
    if shared.shutdown.load(Ordering::Acquire) || shared.global.len() > 0 {
        return;
    }
    shared.idle_cv.wait_for(&mut guard, IDLE_WAIT);
}

// -- In-goroutine operations --------------------------------------------------

/// Reschedule the current goroutine to the back of its worker's local
/// queue and run the scheduler. Outside a goroutine this degrades to an
/// OS-level yield.
pub fn yield_now() {
    let wp = worker_ptr();
    if wp.is_null() {
        std::thread::yield_now();
        return;
    }
    // SAFETY: TLS worker of this thread; `current` is the caller.
    unsafe {
        let g = (*wp).current;
        if g.is_null() {
            std::thread::yield_now();
            return;
        }
        (*wp).pending = Pending::Yield;
        context::swap(&mut (*g).ctx, &(*wp).sched_ctx);
    }
}

/// Begin parking the current goroutine: mark it `PARKING` and hand back
/// the reference a waker will need. Returns `None` outside a goroutine.
///
/// The caller must place the reference where exactly one waker will find
/// it, then call [`park_current`] to leave the CPU.
pub(crate) fn prepare_park() -> Option<GoRef> {
    let wp = worker_ptr();
    if wp.is_null() {
        return None;
    }
    // SAFETY: TLS worker of this thread.
    unsafe {
        let g = (*wp).current;
        if g.is_null() {
            return None;
        }
        (*g).state.store(PARKING, Ordering::Release);
        Some(GoRef(NonNull::new_unchecked(g)))
    }
}

/// Swap out after [`prepare_park`]. Returns when some waker unparks the
/// goroutine.
pub(crate) fn park_current() {
    let wp = worker_ptr();
    // SAFETY: only called after prepare_park on the same thread.
    unsafe {
        let g = (*wp).current;
        (*wp).pending = Pending::Park;
        context::swap(&mut (*g).ctx, &(*wp).sched_ctx);
    }
}

/// Park the current goroutine after handing its wake reference to
/// `register`. Returns false without parking when the caller is not a
/// goroutine; such callers fall back to an OS-level wait.
pub fn park_current_with<F: FnOnce(GoRef)>(register: F) -> bool {
    match prepare_park() {
        None => false,
        Some(g) => {
            register(g);
            park_current();
            true
        }
    }
}

/// Make a parked goroutine runnable again via the global queue and signal
/// one idle worker. Spurious unparks of already-runnable (or dead)
/// goroutines are no-ops.
pub fn unpark(g: GoRef) {
    let gp = g.as_ptr();
    loop {
        // SAFETY: per the waker contract the descriptor is alive while a
        // GoRef for it is outstanding.
        let state = unsafe { &(*gp).state };
        match state.load(Ordering::Acquire) {
            BLOCKED => {
                if state
                    .compare_exchange(BLOCKED, RUNNABLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // SAFETY: descriptor alive, shared outlives it.
                    let shared = unsafe { &(*gp).shared };
                    shared.push_global(g);
                    return;
                }
            }
            PARKING => {
                // The owning worker is mid-save; leave a note and let it
                // requeue after the save completes.
                if state
                    .compare_exchange(PARKING, WAKE_PENDING, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
            }
            _ => return,
        }
    }
}

/// The shared runtime state of the calling worker thread, if any.
pub(crate) fn current_shared() -> Option<Arc<RtShared>> {
    let wp = worker_ptr();
    if wp.is_null() {
        None
    } else {
        // SAFETY: TLS worker of this thread.
        unsafe { Some((*wp).shared.clone()) }
    }
}

#[cfg(test)]
#[path = "sched_tests.rs"]
mod tests;
