// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Bounded in-memory scrollback: a circular byte buffer of raw PTY
/// output, tracking the total bytes ever written so replies can report a
/// global offset. Wrapping silently discards the oldest data.
#[derive(Debug)]
pub struct Scrollback {
    buf: Vec<u8>,
    capacity: usize,
    write_pos: usize,
    total_written: u64,
}

impl Scrollback {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: vec![0u8; capacity], capacity, write_pos: 0, total_written: 0 }
    }

    /// Append PTY output.
    pub fn write(&mut self, data: &[u8]) {
        // Only the last `capacity` bytes of a burst can ever be observed;
        // account for the rest without copying it.
        let skip = data.len().saturating_sub(self.capacity);
        self.total_written += skip as u64;
        let mut rest = &data[skip..];

        // Fill whatever room remains before the wrap point, then wrap.
        while !rest.is_empty() {
            let room = self.capacity - self.write_pos;
            let take = rest.len().min(room);
            self.buf[self.write_pos..self.write_pos + take].copy_from_slice(&rest[..take]);
            self.write_pos = (self.write_pos + take) % self.capacity;
            self.total_written += take as u64;
            rest = &rest[take..];
        }
    }

    /// How many bytes are currently retained.
    pub fn retained(&self) -> usize {
        self.total_written.min(self.capacity as u64) as usize
    }

    /// The most recent `len` bytes (all retained bytes if `len` exceeds
    /// them), plus the global offset of the first returned byte.
    pub fn tail(&self, len: usize) -> (Vec<u8>, u64) {
        let take = len.min(self.retained());
        let offset = self.total_written - take as u64;
        let mut out = Vec::with_capacity(take);

        let start = if self.write_pos >= take {
            self.write_pos - take
        } else {
            self.capacity - (take - self.write_pos)
        };
        if start + take <= self.capacity {
            out.extend_from_slice(&self.buf[start..start + take]);
        } else {
            out.extend_from_slice(&self.buf[start..self.capacity]);
            out.extend_from_slice(&self.buf[..take - (self.capacity - start)]);
        }
        (out, offset)
    }

    /// Total bytes ever written through this ring.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }
}

#[cfg(test)]
#[path = "scrollback_tests.rs"]
mod tests;
