// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn client_messages_decode_by_tag() {
    let msg: ClientMessage =
        serde_json::from_str(r#"{"type":"create_panel","cols":120,"rows":40}"#).unwrap();
    assert!(matches!(msg, ClientMessage::CreatePanel { cols: Some(120), rows: Some(40) }));

    let msg: ClientMessage = serde_json::from_str(r#"{"type":"close_panel","panel":3}"#).unwrap();
    assert!(matches!(msg, ClientMessage::ClosePanel { panel: 3 }));

    let msg: ClientMessage = serde_json::from_str(r#"{"type":"scrollback","panel":1}"#).unwrap();
    assert!(matches!(msg, ClientMessage::Scrollback { panel: 1, len: None }));
}

#[test]
fn unknown_type_is_rejected() {
    let res = serde_json::from_str::<ClientMessage>(r#"{"type":"reboot_server"}"#);
    assert!(res.is_err());
}

#[test]
fn server_messages_serialize_with_snake_case_tags() {
    let json = serde_json::to_string(&ServerMessage::Created { panel: 9, cols: 80, rows: 24 })
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["type"], "created");
    assert_eq!(v["panel"], 9);

    let json = serde_json::to_string(&error_msg(MuxError::Forbidden, "viewer cannot type"))
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["type"], "error");
    assert_eq!(v["code"], "forbidden");
}

#[test]
fn exit_carries_optional_code_and_signal() {
    let json =
        serde_json::to_string(&ServerMessage::Exit { panel: 2, code: Some(0), signal: None })
            .unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["type"], "exit");
    assert_eq!(v["code"], 0);
    assert!(v["signal"].is_null());
}
