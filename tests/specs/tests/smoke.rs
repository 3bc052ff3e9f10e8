// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `mux` binary and exercise
//! HTTP, the control plane and the data plane.

use std::time::Duration;

use mux::encoder::{apply_packet, FrameBuffer};
use mux::protocol::data::{decode_frame, encode_input, FrameKind, InputEvent};
use mux_specs::{
    next_binary, send_binary, send_json, wait_json_type, MuxProcess,
};

const TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let mux = MuxProcess::start()?;
    mux.wait_healthy(TIMEOUT).await?;

    let body = mux_specs::http_get(mux.port, "/api/v1/health").await?;
    let v: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(v["status"], "running");
    assert_eq!(v["sessions"], 0);

    Ok(())
}

#[tokio::test]
async fn control_handshake_sends_welcome() -> anyhow::Result<()> {
    let mux = MuxProcess::start()?;
    mux.wait_healthy(TIMEOUT).await?;

    let token = mux.new_session(true).await?;
    let mut ws = mux.control_ws(&token, "admin").await?;

    let welcome = wait_json_type(&mut ws, "welcome", TIMEOUT).await?;
    assert_eq!(welcome["session"], token.as_str());
    assert_eq!(welcome["role"], "admin");
    assert!(welcome["conn"].is_number());

    Ok(())
}

#[tokio::test]
async fn unknown_token_is_rejected_at_handshake() -> anyhow::Result<()> {
    let mux = MuxProcess::start()?;
    mux.wait_healthy(TIMEOUT).await?;

    let result = mux.control_ws("not-a-real-token", "editor").await;
    assert!(result.is_err(), "handshake must fail for an unknown token");

    Ok(())
}

#[tokio::test]
async fn panel_lifecycle_keyframe_resize_exit() -> anyhow::Result<()> {
    let mux = MuxProcess::start()?;
    mux.wait_healthy(TIMEOUT).await?;

    let token = mux.new_session(true).await?;
    let mut ctl = mux.control_ws(&token, "admin").await?;
    let welcome = wait_json_type(&mut ctl, "welcome", TIMEOUT).await?;
    let conn = welcome["conn"].as_u64().expect("conn id");

    send_json(&mut ctl, serde_json::json!({ "type": "create_panel", "cols": 80, "rows": 24 }))
        .await?;
    let created = wait_json_type(&mut ctl, "created", TIMEOUT).await?;
    let panel = created["panel"].as_u64().expect("panel id") as u32;

    // First frame on the data plane must be a keyframe.
    let mut data = mux.data_ws(&token, conn).await?;
    let frame = next_binary(&mut data, TIMEOUT).await?;
    let (got_panel, kind, payload) = decode_frame(&frame).expect("frame decodes");
    assert_eq!(got_panel, panel);
    assert_eq!(kind, FrameKind::Keyframe);

    let mut fb = FrameBuffer::default();
    apply_packet(&mut fb, payload).expect("keyframe applies");
    assert_eq!((fb.width, fb.height), (80 * 8, 24 * 16));

    // Resize on the data plane: the next delivered keyframe has the new
    // dimensions.
    send_binary(&mut data, encode_input(panel, &InputEvent::Resize { width: 960, height: 640 }))
        .await?;
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        assert!(tokio::time::Instant::now() < deadline, "no keyframe at new dimensions");
        let frame = next_binary(&mut data, TIMEOUT).await?;
        let (_, kind, payload) = decode_frame(&frame).expect("frame decodes");
        if kind != FrameKind::Keyframe {
            continue;
        }
        let mut fb = FrameBuffer::default();
        apply_packet(&mut fb, payload).expect("keyframe applies");
        if (fb.width, fb.height) == (960, 640) {
            break;
        }
    }

    // Close: subscribers receive `exit`.
    send_json(&mut ctl, serde_json::json!({ "type": "close_panel", "panel": panel })).await?;
    let exit = wait_json_type(&mut ctl, "exit", TIMEOUT).await?;
    assert_eq!(exit["panel"].as_u64(), Some(u64::from(panel)));

    Ok(())
}

#[tokio::test]
async fn viewer_input_is_forbidden_editor_input_lands() -> anyhow::Result<()> {
    let mux = MuxProcess::start()?;
    mux.wait_healthy(TIMEOUT).await?;

    let token = mux.new_session(true).await?;
    let mut admin = mux.control_ws(&token, "admin").await?;
    let welcome = wait_json_type(&mut admin, "welcome", TIMEOUT).await?;
    let admin_conn = welcome["conn"].as_u64().expect("conn id");

    send_json(&mut admin, serde_json::json!({ "type": "create_panel" })).await?;
    let created = wait_json_type(&mut admin, "created", TIMEOUT).await?;
    let panel = created["panel"].as_u64().expect("panel id") as u32;

    // Viewer connection on the same session.
    let mut viewer = mux.control_ws(&token, "viewer").await?;
    let vw = wait_json_type(&mut viewer, "welcome", TIMEOUT).await?;
    let viewer_conn = vw["conn"].as_u64().expect("conn id");
    let mut viewer_data = mux.data_ws(&token, viewer_conn).await?;

    // Viewer tries to type: the message is dropped and `forbidden`
    // arrives on the control plane.
    send_binary(
        &mut viewer_data,
        encode_input(panel, &InputEvent::Text(b"rm -rf /\n".to_vec())),
    )
    .await?;
    let notice = wait_json_type(&mut viewer, "forbidden", TIMEOUT).await?;
    assert!(notice["reason"].is_string());

    // Editor input reaches the shell; its echo shows up in scrollback.
    let mut admin_data = mux.data_ws(&token, admin_conn).await?;
    send_binary(
        &mut admin_data,
        encode_input(panel, &InputEvent::Text(b"echo mux-smoke-marker\n".to_vec())),
    )
    .await?;

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        assert!(tokio::time::Instant::now() < deadline, "marker never reached scrollback");
        send_json(&mut admin, serde_json::json!({ "type": "scrollback", "panel": panel })).await?;
        let reply = wait_json_type(&mut admin, "scrollback_data", TIMEOUT).await?;
        let b64 = reply["data"].as_str().unwrap_or_default();
        use base64::Engine as _;
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap_or_default();
        if String::from_utf8_lossy(&bytes).contains("mux-smoke-marker") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    Ok(())
}
