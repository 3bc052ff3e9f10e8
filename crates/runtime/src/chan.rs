// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OS-thread typed channel: mutex + condvars, for callers that are not
//! goroutines (the goroutine-aware flavour lives in [`crate::gchan`]).
//! Same surface: bounded / unbounded / rendezvous, `send` → bool,
//! `recv` → Option, try variants, close, close-on-last-drop.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

pub use crate::gchan::{TryRecvError, TrySendError};

/// Create a bounded channel. Capacity 0 is a rendezvous channel.
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
    cap: Option<usize>,
    slot: Option<T>,
    seq: u64,
    closed: bool,
    senders: usize,
    receivers: usize,
    recv_blocked: usize,
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
}

fn close_inner<T>(shared: &Shared<T>) {
    let mut st = shared.state.lock();
    if st.closed {
        return;
    }
    st.closed = true;
    drop(st);
    shared.not_full.notify_all();
    shared.not_empty.notify_all();
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Deliver a value, blocking the calling thread while the channel is
    /// full. Returns false if the channel is (or becomes) closed first.
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
                    shared.not_empty.notify_one();
                    loop {
                        if st.seq > my_seq {
                            // Completed senders and producers share the
                            // not_full condvar; pass the wake on.
                            shared.not_full.notify_one();
                            return true;
                        }
                        if st.closed {
                            if st.seq > my_seq {
                                return true;
                            }
                            st.slot = None;
                            return false;
                        }
                        shared.not_full.wait(&mut st);
                    }
                }
            } else if st.has_room() {
                st.buf.push_back(value);
                shared.not_empty.notify_one();
                return true;
            }
            shared.not_full.wait(&mut st);
        }
    }

    /// Non-blocking send; on a rendezvous channel it succeeds only when a
    /// receiver is already blocked waiting.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let shared = &*self.shared;
        let mut st = shared.state.lock();
        if st.closed {
            return Err(TrySendError::Closed(value));
        }
        if st.is_rendezvous() {
            if st.slot.is_none() && st.recv_blocked > 0 {
                st.slot = Some(value);
                shared.not_empty.notify_one();
                return Ok(());
            }
            return Err(TrySendError::Full(value));
        }
        if st.has_room() {
            st.buf.push_back(value);
            shared.not_empty.notify_one();
            return Ok(());
        }
        Err(TrySendError::Full(value))
    }

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

impl<T> Receiver<T> {
    /// Take the next value, blocking the calling thread while the channel
    /// is empty. Returns `None` once closed and drained.
    pub fn recv(&self) -> Option<T> {
        let shared = &*self.shared;
        let mut st = shared.state.lock();
        loop {
            if let Some(v) = st.buf.pop_front() {
                shared.not_full.notify_one();
                return Some(v);
            }
            if let Some(v) = st.slot.take() {
                st.seq += 1;
                shared.not_full.notify_one();
                return Some(v);
            }
            if st.closed {
                return None;
            }
            st.recv_blocked += 1;
            shared.not_empty.wait(&mut st);
            st.recv_blocked -= 1;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let shared = &*self.shared;
        let mut st = shared.state.lock();
        if let Some(v) = st.buf.pop_front() {
            shared.not_full.notify_one();
            return Ok(v);
        }
        if let Some(v) = st.slot.take() {
            st.seq += 1;
            shared.not_full.notify_one();
            return Ok(v);
        }
        if st.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

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
#[path = "chan_tests.rs"]
mod tests;
