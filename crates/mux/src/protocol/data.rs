// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary data-plane framing.
//!
//! Every frame is `[opcode u8][panel u32 BE][payload]`. Server→client
//! frames carry encoded video; client→server frames carry input events.
//! Truncated frames and unknown opcodes are protocol errors that close
//! the offending connection only.

use crate::error::MuxError;

// Server → client.
const OP_KEYFRAME: u8 = 0x01;
const OP_DELTA: u8 = 0x02;

// Client → server.
const OP_KEY_INPUT: u8 = 0x01;
const OP_MOUSE_BUTTON: u8 = 0x02;
const OP_MOUSE_MOVE: u8 = 0x03;
const OP_MOUSE_SCROLL: u8 = 0x04;
const OP_TEXT_INPUT: u8 = 0x05;
const OP_RESIZE: u8 = 0x10;
const OP_REQUEST_KEYFRAME: u8 = 0x11;

/// Modifier bitset carried by key and mouse events.
pub const MOD_SHIFT: u8 = 0x01;
pub const MOD_CTRL: u8 = 0x02;
pub const MOD_ALT: u8 = 0x04;
pub const MOD_META: u8 = 0x08;

/// Kind of an outbound video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Keyframe,
    Delta,
}

/// Encode a server→client video frame.
pub fn encode_frame(panel: u32, kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let op = match kind {
        FrameKind::Keyframe => OP_KEYFRAME,
        FrameKind::Delta => OP_DELTA,
    };
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(op);
    out.extend_from_slice(&panel.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode a server→client video frame (client side / tests).
pub fn decode_frame(buf: &[u8]) -> Result<(u32, FrameKind, &[u8]), MuxError> {
    if buf.len() < 5 {
        return Err(MuxError::ProtocolError);
    }
    let kind = match buf[0] {
        OP_KEYFRAME => FrameKind::Keyframe,
        OP_DELTA => FrameKind::Delta,
        _ => return Err(MuxError::ProtocolError),
    };
    let panel = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    Ok((panel, kind, &buf[5..]))
}

/// Client→server input events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Key { keycode: u32, mods: u8 },
    MouseButton { button: u8, x: u16, y: u16, mods: u8 },
    MouseMove { x: u16, y: u16 },
    MouseScroll { dx: i16, dy: i16 },
    Text(Vec<u8>),
    Resize { width: u16, height: u16 },
    RequestKeyframe,
}

impl InputEvent {
    /// Whether the event injects input into the terminal (and therefore
    /// requires the editor role).
    pub fn is_input(&self) -> bool {
        !matches!(self, Self::Resize { .. } | Self::RequestKeyframe)
    }
}

/// A decoded client→server data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub panel: u32,
    pub event: InputEvent,
}

/// Decode a client→server frame. Truncated payloads and unknown opcodes
/// are protocol errors.
pub fn decode_input(buf: &[u8]) -> Result<DataFrame, MuxError> {
    if buf.len() < 5 {
        return Err(MuxError::ProtocolError);
    }
    let op = buf[0];
    let panel = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    let p = &buf[5..];

    let event = match op {
        OP_KEY_INPUT => {
            let [a, b, c, d, mods] = take::<5>(p)?;
            InputEvent::Key { keycode: u32::from_be_bytes([a, b, c, d]), mods }
        }
        OP_MOUSE_BUTTON => {
            let [button, xh, xl, yh, yl, mods] = take::<6>(p)?;
            InputEvent::MouseButton {
                button,
                x: u16::from_be_bytes([xh, xl]),
                y: u16::from_be_bytes([yh, yl]),
                mods,
            }
        }
        OP_MOUSE_MOVE => {
            let [xh, xl, yh, yl] = take::<4>(p)?;
            InputEvent::MouseMove { x: u16::from_be_bytes([xh, xl]), y: u16::from_be_bytes([yh, yl]) }
        }
        OP_MOUSE_SCROLL => {
            let [ah, al, bh, bl] = take::<4>(p)?;
            InputEvent::MouseScroll {
                dx: i16::from_be_bytes([ah, al]),
                dy: i16::from_be_bytes([bh, bl]),
            }
        }
        OP_TEXT_INPUT => InputEvent::Text(p.to_vec()),
        OP_RESIZE => {
            let [wh, wl, hh, hl] = take::<4>(p)?;
            InputEvent::Resize {
                width: u16::from_be_bytes([wh, wl]),
                height: u16::from_be_bytes([hh, hl]),
            }
        }
        OP_REQUEST_KEYFRAME => {
            if !p.is_empty() {
                return Err(MuxError::ProtocolError);
            }
            InputEvent::RequestKeyframe
        }
        _ => return Err(MuxError::ProtocolError),
    };
    Ok(DataFrame { panel, event })
}

/// Encode a client→server frame (client side / tests).
pub fn encode_input(panel: u32, event: &InputEvent) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    let op = match event {
        InputEvent::Key { .. } => OP_KEY_INPUT,
        InputEvent::MouseButton { .. } => OP_MOUSE_BUTTON,
        InputEvent::MouseMove { .. } => OP_MOUSE_MOVE,
        InputEvent::MouseScroll { .. } => OP_MOUSE_SCROLL,
        InputEvent::Text(_) => OP_TEXT_INPUT,
        InputEvent::Resize { .. } => OP_RESIZE,
        InputEvent::RequestKeyframe => OP_REQUEST_KEYFRAME,
    };
    out.push(op);
    out.extend_from_slice(&panel.to_be_bytes());
    match event {
        InputEvent::Key { keycode, mods } => {
            out.extend_from_slice(&keycode.to_be_bytes());
            out.push(*mods);
        }
        InputEvent::MouseButton { button, x, y, mods } => {
            out.push(*button);
            out.extend_from_slice(&x.to_be_bytes());
            out.extend_from_slice(&y.to_be_bytes());
            out.push(*mods);
        }
        InputEvent::MouseMove { x, y } => {
            out.extend_from_slice(&x.to_be_bytes());
            out.extend_from_slice(&y.to_be_bytes());
        }
        InputEvent::MouseScroll { dx, dy } => {
            out.extend_from_slice(&dx.to_be_bytes());
            out.extend_from_slice(&dy.to_be_bytes());
        }
        InputEvent::Text(bytes) => out.extend_from_slice(bytes),
        InputEvent::Resize { width, height } => {
            out.extend_from_slice(&width.to_be_bytes());
            out.extend_from_slice(&height.to_be_bytes());
        }
        InputEvent::RequestKeyframe => {}
    }
    out
}

fn take<const N: usize>(p: &[u8]) -> Result<[u8; N], MuxError> {
    if p.len() != N {
        return Err(MuxError::ProtocolError);
    }
    let mut out = [0u8; N];
    out.copy_from_slice(p);
    Ok(out)
}

/// Translate an input event into the byte sequence written to the PTY.
/// Resize and keyframe requests produce nothing here; they are handled by
/// the panel state machine.
pub fn event_to_pty_bytes(event: &InputEvent) -> Option<Vec<u8>> {
    match event {
        InputEvent::Text(bytes) => Some(bytes.clone()),
        InputEvent::Key { keycode, mods } => key_to_bytes(*keycode, *mods),
        InputEvent::MouseButton { button, x, y, .. } => {
            // SGR (1006) press encoding, cell coordinates are 1-based.
            Some(format!("\x1b[<{};{};{}M", button, x.max(&1), y.max(&1)).into_bytes())
        }
        InputEvent::MouseMove { x, y } => {
            // Motion with no button: SGR button 35 + motion flag.
            Some(format!("\x1b[<35;{};{}M", x.max(&1), y.max(&1)).into_bytes())
        }
        InputEvent::MouseScroll { dy, .. } => {
            let btn = if *dy < 0 { 64 } else { 65 };
            Some(format!("\x1b[<{btn};1;1M").into_bytes())
        }
        InputEvent::Resize { .. } | InputEvent::RequestKeyframe => None,
    }
}

/// Browser-style keycodes to terminal byte sequences.
fn key_to_bytes(keycode: u32, mods: u8) -> Option<Vec<u8>> {
    let seq: Vec<u8> = match keycode {
        8 => vec![0x7f],          // backspace
        9 => vec![b'\t'],
        13 => vec![b'\r'],
        27 => vec![0x1b],
        33 => b"\x1b[5~".to_vec(), // page up
        34 => b"\x1b[6~".to_vec(), // page down
        35 => b"\x1b[F".to_vec(),  // end
        36 => b"\x1b[H".to_vec(),  // home
        37 => b"\x1b[D".to_vec(),  // left
        38 => b"\x1b[A".to_vec(),  // up
        39 => b"\x1b[C".to_vec(),  // right
        40 => b"\x1b[B".to_vec(),  // down
        46 => b"\x1b[3~".to_vec(), // delete
        c @ 0x20..=0x7e => {
            let mut byte = c as u8;
            if mods & MOD_CTRL != 0 && byte.is_ascii_alphabetic() {
                byte = byte.to_ascii_lowercase() & 0x1f;
            } else if mods & MOD_SHIFT == 0 {
                byte = byte.to_ascii_lowercase();
            }
            vec![byte]
        }
        _ => return None,
    };
    if mods & MOD_ALT != 0 {
        let mut out = vec![0x1b];
        out.extend_from_slice(&seq);
        Some(out)
    } else {
        Some(seq)
    }
}

#[cfg(test)]
#[path = "data_tests.rs"]
mod tests;
