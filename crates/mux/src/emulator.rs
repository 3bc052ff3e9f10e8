// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal emulator contract and the built-in avt-backed implementation.
//!
//! The pipeline consumes the emulator through the [`Emulator`] trait:
//! feed raw PTY bytes, borrow an RGBA snapshot for one encoder
//! submission, resize, and read the shell-reported title/pwd. The
//! built-in [`CellEmulator`] keeps grid state in an `avt::Vt` and
//! rasterizes cells as flat 8×16 blocks; glyph-accurate rendering
//! belongs to the external GPU renderer.

use std::mem;

/// Cell size of the rasterized surface, in pixels.
pub const CELL_W: u32 = 8;
pub const CELL_H: u32 = 16;

/// Borrowed RGBA8 framebuffer, row-major, tightly packed.
#[derive(Debug)]
pub struct Surface<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

pub trait Emulator: Send {
    /// Feed raw bytes from the PTY.
    fn feed(&mut self, bytes: &[u8]);

    /// Borrow the current surface. Valid for one encoder submission.
    fn snapshot(&mut self) -> Surface<'_>;

    /// Resize the grid; the pixel size follows from the cell size.
    fn resize(&mut self, cols: u16, rows: u16);

    fn size(&self) -> (u16, u16);

    fn pixel_size(&self) -> (u32, u32);

    /// Shell-reported title (OSC 0/2), if any.
    fn title(&self) -> Option<String>;

    /// Shell-reported working directory (OSC 7), if any.
    fn pwd(&self) -> Option<String>;

    /// Consume a pending bell.
    fn take_bell(&mut self) -> bool;

    /// Whether the grid changed since the last `clear_changed`.
    fn changed(&self) -> bool;

    fn clear_changed(&mut self);

    /// Plain-text view of the grid, for the scrollback/debug path.
    fn text_lines(&self) -> Vec<String>;
}

// -- OSC scanning -------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum OscKind {
    Title,
    Pwd,
    Other,
}

enum OscState {
    Idle,
    Esc,
    Num(Vec<u8>),
    Body { kind: OscKind, buf: Vec<u8>, esc: bool },
}

/// Incremental scanner for OSC title/pwd reports and BEL, tolerant of
/// sequences split across PTY read boundaries.
struct OscScanner {
    state: OscState,
    title: Option<String>,
    pwd: Option<String>,
    bell: bool,
}

impl OscScanner {
    fn new() -> Self {
        Self { state: OscState::Idle, title: None, pwd: None, bell: false }
    }

    fn scan(&mut self, data: &[u8]) {
        for &b in data {
            self.step(b);
        }
    }

    fn step(&mut self, b: u8) {
        match &mut self.state {
            OscState::Idle => {
                if b == 0x1b {
                    self.state = OscState::Esc;
                } else if b == 0x07 {
                    self.bell = true;
                }
            }
            OscState::Esc => {
                self.state = match b {
                    b']' => OscState::Num(Vec::new()),
                    0x1b => OscState::Esc,
                    _ => OscState::Idle,
                };
            }
            OscState::Num(buf) => {
                if b.is_ascii_digit() && buf.len() < 4 {
                    buf.push(b);
                } else if b == b';' {
                    let kind = match buf.as_slice() {
                        b"0" | b"2" => OscKind::Title,
                        b"7" => OscKind::Pwd,
                        _ => OscKind::Other,
                    };
                    self.state = OscState::Body { kind, buf: Vec::new(), esc: false };
                } else {
                    self.state = if b == 0x1b { OscState::Esc } else { OscState::Idle };
                }
            }
            OscState::Body { kind, buf, esc } => {
                if *esc {
                    // ESC \ is ST; anything else aborts the sequence.
                    if b == b'\\' {
                        let k = *kind;
                        let raw = mem::take(buf);
                        self.state = OscState::Idle;
                        self.finish(k, raw);
                    } else {
                        self.state = if b == 0x1b { OscState::Esc } else { OscState::Idle };
                    }
                } else if b == 0x07 {
                    let k = *kind;
                    let raw = mem::take(buf);
                    self.state = OscState::Idle;
                    self.finish(k, raw);
                } else if b == 0x1b {
                    *esc = true;
                } else if buf.len() < 1024 {
                    buf.push(b);
                }
            }
        }
    }

    fn finish(&mut self, kind: OscKind, raw: Vec<u8>) {
        let text = String::from_utf8_lossy(&raw).into_owned();
        match kind {
            OscKind::Title => self.title = Some(text),
            OscKind::Pwd => {
                // OSC 7 carries a file://host/path URL; keep the path.
                let path = match text.strip_prefix("file://") {
                    Some(rest) => match rest.find('/') {
                        Some(i) => rest[i..].to_owned(),
                        None => "/".to_owned(),
                    },
                    None => text,
                };
                self.pwd = Some(path);
            }
            OscKind::Other => {}
        }
    }
}

// -- UTF-8 boundary handling --------------------------------------------------

/// Number of trailing bytes that form an incomplete UTF-8 sequence.
///
/// Scans backwards from the end looking for a leading byte whose expected
/// sequence length exceeds the bytes available. Returns 0 when the tail
/// is complete (or pure ASCII).
fn incomplete_utf8_tail_len(data: &[u8]) -> usize {
    let len = data.len();
    for i in 1..=len.min(3) {
        let byte = data[len - i];
        if byte < 0x80 {
            return 0;
        }
        if byte >= 0xc0 {
            let expected = if byte < 0xe0 {
                2
            } else if byte < 0xf0 {
                3
            } else {
                4
            };
            return if i < expected { i } else { 0 };
        }
        // Continuation byte, keep scanning backwards.
    }
    0
}

// -- Built-in implementation --------------------------------------------------

/// Grid emulator over `avt::Vt` with a flat-block cell rasterizer.
pub struct CellEmulator {
    vt: avt::Vt,
    cols: u16,
    rows: u16,
    fb: Vec<u8>,
    fb_dirty: bool,
    changed: bool,
    osc: OscScanner,
    /// Carry for incomplete UTF-8 trailing bytes between `feed` calls.
    utf8_buf: [u8; 3],
    utf8_len: u8,
}

impl CellEmulator {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            vt: avt::Vt::new(cols as usize, rows as usize),
            cols,
            rows,
            fb: Vec::new(),
            fb_dirty: true,
            changed: true,
            osc: OscScanner::new(),
            utf8_buf: [0; 3],
            utf8_len: 0,
        }
    }

    fn rasterize(&mut self) {
        let w = self.cols as usize * CELL_W as usize;
        let h = self.rows as usize * CELL_H as usize;
        self.fb.clear();
        self.fb.resize(w * h * 4, 0);
        // Opaque black background.
        for px in self.fb.chunks_exact_mut(4) {
            px[3] = 0xff;
        }
        let rows = self.rows as usize;
        let cols = self.cols as usize;
        for (row, line) in self.vt.view().enumerate() {
            if row >= rows {
                break;
            }
            for (col, ch) in line.text().chars().enumerate() {
                if col >= cols {
                    break;
                }
                if !ch.is_whitespace() {
                    fill_cell(&mut self.fb, w, col, row);
                }
            }
        }
    }
}

fn fill_cell(fb: &mut [u8], width_px: usize, col: usize, row: usize) {
    let x0 = col * CELL_W as usize;
    let y0 = row * CELL_H as usize;
    for y in y0..y0 + CELL_H as usize {
        let base = (y * width_px + x0) * 4;
        for px in fb[base..base + CELL_W as usize * 4].chunks_exact_mut(4) {
            px[0] = 0xff;
            px[1] = 0xff;
            px[2] = 0xff;
        }
    }
}

impl Emulator for CellEmulator {
    fn feed(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.osc.scan(bytes);

        // Prepend buffered incomplete UTF-8 bytes from the previous call.
        let carry = self.utf8_len as usize;
        let owned: Vec<u8>;
        let input = if carry == 0 {
            bytes
        } else {
            owned = [&self.utf8_buf[..carry], bytes].concat();
            self.utf8_len = 0;
            &owned
        };

        let tail = incomplete_utf8_tail_len(input);
        let (to_feed, to_buffer) = input.split_at(input.len() - tail);
        if !to_buffer.is_empty() {
            self.utf8_buf[..to_buffer.len()].copy_from_slice(to_buffer);
            self.utf8_len = to_buffer.len() as u8;
        }
        if !to_feed.is_empty() {
            let s = String::from_utf8_lossy(to_feed);
            let _ = self.vt.feed_str(&s);
        }

        self.changed = true;
        self.fb_dirty = true;
    }

    fn snapshot(&mut self) -> Surface<'_> {
        if self.fb_dirty {
            self.rasterize();
            self.fb_dirty = false;
        }
        Surface {
            width: self.cols as u32 * CELL_W,
            height: self.rows as u32 * CELL_H,
            pixels: &self.fb,
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if (cols, rows) == (self.cols, self.rows) {
            return;
        }
        let _ = self.vt.resize(cols as usize, rows as usize);
        self.cols = cols;
        self.rows = rows;
        self.changed = true;
        self.fb_dirty = true;
    }

    fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    fn pixel_size(&self) -> (u32, u32) {
        (self.cols as u32 * CELL_W, self.rows as u32 * CELL_H)
    }

    fn title(&self) -> Option<String> {
        self.osc.title.clone()
    }

    fn pwd(&self) -> Option<String> {
        self.osc.pwd.clone()
    }

    fn take_bell(&mut self) -> bool {
        mem::take(&mut self.osc.bell)
    }

    fn changed(&self) -> bool {
        self.changed
    }

    fn clear_changed(&mut self) {
        self.changed = false;
    }

    fn text_lines(&self) -> Vec<String> {
        self.vt.view().map(|line| line.text()).collect()
    }
}

#[cfg(test)]
#[path = "emulator_tests.rs"]
mod tests;
