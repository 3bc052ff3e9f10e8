// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock-free single-producer circular buffer for the worker-local fast
//! path. Slots carry raw task pointers as `usize`. The owning worker is
//! the only pusher; `pop` (owner) and `steal` (any other worker) both
//! advance the head with a compare-and-swap, so a steal that loses the
//! race simply returns nothing.

use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct SpscRing {
    head: AtomicUsize,
    tail: AtomicUsize,
    mask: usize,
    slots: Box<[AtomicUsize]>,
}

impl SpscRing {
    /// `capacity` is rounded up to the next power of two.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(2).next_power_of_two();
        let slots = (0..cap).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>().into_boxed_slice();
        Self { head: AtomicUsize::new(0), tail: AtomicUsize::new(0), mask: cap - 1, slots }
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub(crate) fn len(&self) -> usize {
        let t = self.tail.load(Ordering::Acquire);
        let h = self.head.load(Ordering::Acquire);
        t.wrapping_sub(h)
    }

    /// Producer-only. Fails (returning the value) when the ring is full.
    pub(crate) fn push(&self, v: usize) -> Result<(), usize> {
        let t = self.tail.load(Ordering::Relaxed);
        let h = self.head.load(Ordering::Acquire);
        if t.wrapping_sub(h) >= self.capacity() {
            return Err(v);
        }
        self.slots[t & self.mask].store(v, Ordering::Relaxed);
        self.tail.store(t.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Owner-side dequeue; retries until success or empty.
    pub(crate) fn pop(&self) -> Option<usize> {
        loop {
            match self.take_front() {
                Taken::Value(v) => return Some(v),
                Taken::Empty => return None,
                Taken::Contended => continue,
            }
        }
    }

    /// Best-effort steal from another worker: a single attempt, returning
    /// nothing under contention.
    pub(crate) fn steal(&self) -> Option<usize> {
        match self.take_front() {
            Taken::Value(v) => Some(v),
            Taken::Empty | Taken::Contended => None,
        }
    }

    fn take_front(&self) -> Taken {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        if h == t {
            return Taken::Empty;
        }
        // Read before claiming; a lost CAS discards the read (the slot may
        // be overwritten by the producer once head has passed it).
        let v = self.slots[h & self.mask].load(Ordering::Relaxed);
        if self
            .head
            .compare_exchange(h, h.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Taken::Value(v)
        } else {
            Taken::Contended
        }
    }
}

enum Taken {
    Value(usize),
    Empty,
    Contended,
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
