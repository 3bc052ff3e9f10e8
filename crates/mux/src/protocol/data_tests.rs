// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn frame_round_trip() {
    let buf = encode_frame(7, FrameKind::Keyframe, b"nalu-bytes");
    let (panel, kind, payload) = decode_frame(&buf).unwrap();
    assert_eq!(panel, 7);
    assert_eq!(kind, FrameKind::Keyframe);
    assert_eq!(payload, b"nalu-bytes");

    let buf = encode_frame(u32::MAX, FrameKind::Delta, &[]);
    let (panel, kind, payload) = decode_frame(&buf).unwrap();
    assert_eq!(panel, u32::MAX);
    assert_eq!(kind, FrameKind::Delta);
    assert!(payload.is_empty());
}

#[test]
fn truncated_frame_is_protocol_error() {
    assert_eq!(decode_frame(&[0x01, 0, 0]), Err(MuxError::ProtocolError));
    assert_eq!(decode_input(&[0x01]), Err(MuxError::ProtocolError));
}

#[test]
fn unknown_opcode_is_protocol_error() {
    let mut buf = encode_input(1, &InputEvent::RequestKeyframe);
    buf[0] = 0x7f;
    assert_eq!(decode_input(&buf), Err(MuxError::ProtocolError));
    assert_eq!(decode_frame(&[0x09, 0, 0, 0, 1]), Err(MuxError::ProtocolError));
}

#[test]
fn input_events_round_trip() {
    let events = [
        InputEvent::Key { keycode: 13, mods: MOD_CTRL },
        InputEvent::MouseButton { button: 0, x: 12, y: 40, mods: MOD_SHIFT },
        InputEvent::MouseMove { x: 640, y: 384 },
        InputEvent::MouseScroll { dx: 0, dy: -3 },
        InputEvent::Text(b"ls -la\n".to_vec()),
        InputEvent::Resize { width: 960, height: 640 },
        InputEvent::RequestKeyframe,
    ];
    for (i, event) in events.iter().enumerate() {
        let buf = encode_input(i as u32, event);
        let frame = decode_input(&buf).unwrap();
        assert_eq!(frame.panel, i as u32);
        assert_eq!(&frame.event, event);
    }
}

#[test]
fn short_key_payload_is_rejected() {
    let mut buf = encode_input(1, &InputEvent::Key { keycode: 13, mods: 0 });
    buf.truncate(buf.len() - 1);
    assert_eq!(decode_input(&buf), Err(MuxError::ProtocolError));
}

#[test]
fn keyframe_request_payload_must_be_empty() {
    let mut buf = encode_input(1, &InputEvent::RequestKeyframe);
    buf.push(0);
    assert_eq!(decode_input(&buf), Err(MuxError::ProtocolError));
}

#[test]
fn input_classification() {
    assert!(InputEvent::Text(vec![b'x']).is_input());
    assert!(InputEvent::Key { keycode: 13, mods: 0 }.is_input());
    assert!(!InputEvent::Resize { width: 1, height: 1 }.is_input());
    assert!(!InputEvent::RequestKeyframe.is_input());
}

#[test]
fn key_translation() {
    assert_eq!(
        event_to_pty_bytes(&InputEvent::Key { keycode: 13, mods: 0 }),
        Some(vec![b'\r'])
    );
    assert_eq!(
        event_to_pty_bytes(&InputEvent::Key { keycode: 38, mods: 0 }),
        Some(b"\x1b[A".to_vec())
    );
    // Ctrl-C: keycode for 'C' with the ctrl modifier.
    assert_eq!(
        event_to_pty_bytes(&InputEvent::Key { keycode: b'C' as u32, mods: MOD_CTRL }),
        Some(vec![0x03])
    );
    // Alt prefixes ESC.
    assert_eq!(
        event_to_pty_bytes(&InputEvent::Key { keycode: b'X' as u32, mods: MOD_ALT }),
        Some(vec![0x1b, b'x'])
    );
    // Unmapped keycodes produce nothing.
    assert_eq!(event_to_pty_bytes(&InputEvent::Key { keycode: 999, mods: 0 }), None);
}

#[test]
fn resize_produces_no_pty_bytes() {
    assert_eq!(event_to_pty_bytes(&InputEvent::Resize { width: 640, height: 384 }), None);
    assert_eq!(event_to_pty_bytes(&InputEvent::RequestKeyframe), None);
}

#[test]
fn mouse_translation_is_sgr() {
    let bytes = event_to_pty_bytes(&InputEvent::MouseButton { button: 0, x: 3, y: 5, mods: 0 });
    assert_eq!(bytes, Some(b"\x1b[<0;3;5M".to_vec()));
}
