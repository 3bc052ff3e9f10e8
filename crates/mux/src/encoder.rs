// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Video encoder contract and the baseline software implementation.
//!
//! The pipeline drives encoders through the narrow [`VideoEncoder`]
//! contract: submit a surface (optionally forcing a keyframe), resize,
//! close. Hardware H.264 backends implement the same trait and emit one
//! NALU per packet; the built-in [`BandEncoder`] is the software
//! baseline, emitting full-surface keyframes and changed-row-band deltas
//! that decode deterministically (see [`apply_packet`]).

use std::fmt;

use crate::emulator::Surface;

/// One encoded frame. Keyframes decode without any prior frame; deltas
/// require the previous frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub keyframe: bool,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct EncoderError(String);

impl EncoderError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encoder: {}", self.0)
    }
}

impl std::error::Error for EncoderError {}

pub trait VideoEncoder: Send {
    /// Encode one surface. Returns `None` when nothing changed and no
    /// keyframe was forced.
    fn submit(
        &mut self,
        surface: &Surface<'_>,
        force_keyframe: bool,
    ) -> Result<Option<Packet>, EncoderError>;

    /// Reinitialise for new dimensions; the next packet is a keyframe.
    fn resize(&mut self, width: u32, height: u32);

    fn close(&mut self);
}

const MAGIC_KEY: u8 = b'K';
const MAGIC_DELTA: u8 = b'D';

/// Baseline software encoder: raw keyframes, row-band deltas.
pub struct BandEncoder {
    width: u32,
    height: u32,
    /// Advisory; carried for parity with hardware backends.
    pub fps: u32,
    pub bitrate: u32,
    prev: Option<Vec<u8>>,
    closed: bool,
}

impl BandEncoder {
    pub fn new(width: u32, height: u32, fps: u32, bitrate: u32) -> Self {
        Self { width, height, fps, bitrate, prev: None, closed: false }
    }
}

impl VideoEncoder for BandEncoder {
    fn submit(
        &mut self,
        surface: &Surface<'_>,
        force_keyframe: bool,
    ) -> Result<Option<Packet>, EncoderError> {
        if self.closed {
            return Err(EncoderError::new("submit on closed encoder"));
        }
        let expect = surface.width as usize * surface.height as usize * 4;
        if surface.pixels.len() != expect {
            return Err(EncoderError::new(format!(
                "surface is {} bytes, dimensions say {expect}",
                surface.pixels.len()
            )));
        }

        let dims_changed = surface.width != self.width || surface.height != self.height;
        if dims_changed {
            self.width = surface.width;
            self.height = surface.height;
            self.prev = None;
        }

        if force_keyframe || self.prev.is_none() {
            self.prev = Some(surface.pixels.to_vec());
            let mut data = Vec::with_capacity(9 + surface.pixels.len());
            data.push(MAGIC_KEY);
            data.extend_from_slice(&surface.width.to_be_bytes());
            data.extend_from_slice(&surface.height.to_be_bytes());
            data.extend_from_slice(surface.pixels);
            return Ok(Some(Packet { keyframe: true, data }));
        }

        let stride = surface.width as usize * 4;
        let prev = match self.prev.as_mut() {
            Some(p) => p,
            None => return Err(EncoderError::new("delta without reference frame")),
        };

        let mut changed: Vec<u32> = Vec::new();
        for row in 0..surface.height as usize {
            let span = row * stride..(row + 1) * stride;
            if prev[span.clone()] != surface.pixels[span] {
                changed.push(row as u32);
            }
        }
        if changed.is_empty() {
            return Ok(None);
        }

        let mut data = Vec::with_capacity(13 + changed.len() * (4 + stride));
        data.push(MAGIC_DELTA);
        data.extend_from_slice(&surface.width.to_be_bytes());
        data.extend_from_slice(&surface.height.to_be_bytes());
        data.extend_from_slice(&(changed.len() as u32).to_be_bytes());
        for &row in &changed {
            let span = row as usize * stride..(row as usize + 1) * stride;
            data.extend_from_slice(&row.to_be_bytes());
            data.extend_from_slice(&surface.pixels[span.clone()]);
            prev[span.clone()].copy_from_slice(&surface.pixels[span]);
        }
        Ok(Some(Packet { keyframe: false, data }))
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.prev = None;
        self.closed = false;
    }

    fn close(&mut self) {
        self.prev = None;
        self.closed = true;
    }
}

/// Client-side frame state for decoding baseline packets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Apply one baseline packet to a frame buffer. Keyframes replace the
/// frame; deltas patch row bands and require a matching prior frame.
pub fn apply_packet(fb: &mut FrameBuffer, data: &[u8]) -> Result<(), EncoderError> {
    if data.len() < 9 {
        return Err(EncoderError::new("packet too short"));
    }
    let width = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    let height = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
    let stride = width as usize * 4;
    let body = &data[9..];

    match data[0] {
        MAGIC_KEY => {
            if body.len() != stride * height as usize {
                return Err(EncoderError::new("keyframe size mismatch"));
            }
            fb.width = width;
            fb.height = height;
            fb.pixels = body.to_vec();
            Ok(())
        }
        MAGIC_DELTA => {
            if fb.width != width || fb.height != height || fb.pixels.is_empty() {
                return Err(EncoderError::new("delta without matching keyframe"));
            }
            if body.len() < 4 {
                return Err(EncoderError::new("delta header truncated"));
            }
            let count = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
            let mut rest = &body[4..];
            for _ in 0..count {
                if rest.len() < 4 + stride {
                    return Err(EncoderError::new("delta band truncated"));
                }
                let row = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
                if row >= height as usize {
                    return Err(EncoderError::new("delta band out of range"));
                }
                fb.pixels[row * stride..(row + 1) * stride].copy_from_slice(&rest[4..4 + stride]);
                rest = &rest[4 + stride..];
            }
            if !rest.is_empty() {
                return Err(EncoderError::new("delta trailing bytes"));
            }
            Ok(())
        }
        _ => Err(EncoderError::new("unknown packet magic")),
    }
}

#[cfg(test)]
#[path = "encoder_tests.rs"]
mod tests;
