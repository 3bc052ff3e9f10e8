// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Goroutine-aware typed channel.
//!
//! Inside a goroutine, a blocked sender or receiver parks on the
//! channel's waitlist and its worker runs something else; on a plain OS
//! thread the same operation falls back to a condvar wait. One channel
//! can therefore bridge the network threads and the goroutine world.
//!
//! A successful receive wakes one blocked sender, a successful send wakes
//! one blocked receiver (FIFO), each paired with one condvar signal to
//! cover OS-thread waiters. Close wakes everyone. Dropping the last
//! `Sender` (or `Receiver`) closes the channel.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::goroutine::GoRef;
use crate::sched;

/// Error returned by [`Sender::try_send`].
#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
    Closed(T),
}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

/// Create a bounded channel. Capacity 0 is a rendezvous channel: a send
/// completes only once a receiver has taken the value.
pub fn bounded<T>(cap: usize) -> (Sender<T>, Receiver<T>) {
    channel(Some(cap))
}

/// Create an unbounded channel; sends never block.
pub fn unbounded<T>() -> (Sender<T>, Receiver<T>) {
    channel(None)
}

fn channel<T>(cap: Option<usize>) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buf: VecDeque::new(),
            cap,
            slot: None,
            seq: 0,
            closed: false,
            senders: 1,
            receivers: 1,
            recv_blocked: 0,
            send_waiters: VecDeque::new(),
            recv_waiters: VecDeque::new(),
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
    });
    (Sender { shared: Arc::clone(&shared) }, Receiver { shared })
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct State<T> {
    buf: VecDeque<T>,
    /// None = unbounded, Some(0) = rendezvous.
    cap: Option<usize>,
    /// Rendezvous cell.
    slot: Option<T>,
    /// Incremented each time the rendezvous cell is consumed, so a waiting
    /// sender can tell "my value was taken" from "another sender refilled".
    seq: u64,
    closed: bool,
    senders: usize,
    receivers: usize,
    /// Receivers currently blocked (parked or in a condvar wait).
    recv_blocked: usize,
    send_waiters: VecDeque<GoRef>,
    recv_waiters: VecDeque<GoRef>,
}

impl<T> State<T> {
    fn len(&self) -> usize {
        self.buf.len() + usize::from(self.slot.is_some())
    }

    fn is_rendezvous(&self) -> bool {
        self.cap == Some(0)
    }

    fn has_room(&self) -> bool {
        match self.cap {
            None => true,
            Some(0) => false,
            Some(c) => self.buf.len() < c,
        }
    }

    fn wake_one_recv(&mut self, shared: &Shared<T>) {
        if let Some(g) = self.recv_waiters.pop_front() {
            sched::unpark(g);
        }
        shared.not_empty.notify_one();
    }

    fn wake_one_send(&mut self, shared: &Shared<T>) {
        if let Some(g) = self.send_waiters.pop_front() {
            sched::unpark(g);
        }
        shared.not_full.notify_one();
    }

    fn wake_all(&mut self, shared: &Shared<T>) {
        for g in self.send_waiters.drain(..) {
            sched::unpark(g);
        }
        for g in self.recv_waiters.drain(..) {
            sched::unpark(g);
        }
        shared.not_full.notify_all();
        shared.not_empty.notify_all();
    }
}

fn close_inner<T>(shared: &Shared<T>) {
    let mut st = shared.state.lock();
    if st.closed {
        return;
    }
    st.closed = true;
    st.wake_all(shared);
}

/// Block on "room to send": park when called from a goroutine, condvar
/// wait otherwise. Returns with the lock re-acquired.
fn wait_send<'a, T>(
    shared: &'a Shared<T>,
    mut st: MutexGuard<'a, State<T>>,
) -> MutexGuard<'a, State<T>> {
    match sched::prepare_park() {
        Some(g) => {
            st.send_waiters.push_back(g);
            drop(st);
            sched::park_current();
            shared.state.lock()
        }
        None => {
            shared.not_full.wait(&mut st);
            st
        }
    }
}

fn wait_recv<'a, T>(
    shared: &'a Shared<T>,
    mut st: MutexGuard<'a, State<T>>,
) -> MutexGuard<'a, State<T>> {
    st.recv_blocked += 1;
    let mut st = match sched::prepare_park() {
        Some(g) => {
            st.recv_waiters.push_back(g);
            drop(st);
            sched::park_current();
            shared.state.lock()
        }
        None => {
            shared.not_empty.wait(&mut st);
            st
        }
    };
    st.recv_blocked -= 1;
    st
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Deliver a value, blocking while the channel is full. Returns false
    /// if the channel is (or becomes) closed before the value is accepted.
    pub fn send(&self, value: T) -> bool {
        let shared = &*self.shared;
        let mut st = shared.state.lock();
        loop {
            if st.closed {
                return false;
            }
            if st.is_rendezvous() {
                if st.slot.is_none() {
                    let my_seq = st.seq;
                    st.slot = Some(value);
                    st.wake_one_recv(shared);
                    loop {
                        if st.seq > my_seq {
                            // Consumed. Completed senders and producers
                            // share the waitlist, so pass the wake on to
                            // let the next producer refill the cell.
                            st.wake_one_send(shared);
                            return true;
                        }
                        if st.closed {
                            if st.seq > my_seq {
                                return true;
                            }
                            // Still ours; reclaim so close drains cleanly.
                            st.slot = None;
                            return false;
                        }
                        st = wait_send(shared, st);
                    }
                }
            } else if st.has_room() {
                st.buf.push_back(value);
                st.wake_one_recv(shared);
                return true;
            }
            st = wait_send(shared, st);
        }
    }

    /// Non-blocking send. On a rendezvous channel this succeeds only when
    /// a receiver is already blocked waiting.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let shared = &*self.shared;
        let mut st = shared.state.lock();
        if st.closed {
            return Err(TrySendError::Closed(value));
        }
        if st.is_rendezvous() {
            if st.slot.is_none() && st.recv_blocked > 0 {
                st.slot = Some(value);
                st.wake_one_recv(shared);
                return Ok(());
            }
            return Err(TrySendError::Full(value));
        }
        if st.has_room() {
            st.buf.push_back(value);
            st.wake_one_recv(shared);
            return Ok(());
        }
        Err(TrySendError::Full(value))
    }

    /// Close the channel: wakes all waiters, fails later sends, lets
    /// receivers drain what is buffered.
    pub fn close(&self) {
        close_inner(&self.shared);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Buffered values not yet received.
    pub fn len(&self) -> usize {
        self.shared.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Receiver<T> {
    /// Take the next value, blocking while the channel is empty. Returns
    /// `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let shared = &*self.shared;
        let mut st = shared.state.lock();
        loop {
            if let Some(v) = st.buf.pop_front() {
                st.wake_one_send(shared);
                return Some(v);
            }
            if let Some(v) = st.slot.take() {
                st.seq += 1;
                st.wake_one_send(shared);
                return Some(v);
            }
            if st.closed {
                return None;
            }
            st = wait_recv(shared, st);
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let shared = &*self.shared;
        let mut st = shared.state.lock();
        if let Some(v) = st.buf.pop_front() {
            st.wake_one_send(shared);
            return Ok(v);
        }
        if let Some(v) = st.slot.take() {
            st.seq += 1;
            st.wake_one_send(shared);
            return Ok(v);
        }
        if st.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Close from the receiving side; later sends fail.
    pub fn close(&self) {
        close_inner(&self.shared);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().senders += 1;
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().receivers += 1;
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let last = {
            let mut st = self.shared.state.lock();
            st.senders -= 1;
            st.senders == 0
        };
        if last {
            close_inner(&self.shared);
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let last = {
            let mut st = self.shared.state.lock();
            st.receivers -= 1;
            st.receivers == 0
        };
        if last {
            close_inner(&self.shared);
        }
    }
}

#[cfg(test)]
#[path = "gchan_tests.rs"]
mod tests;
