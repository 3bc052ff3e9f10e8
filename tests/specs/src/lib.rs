// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `mux` binary as a subprocess and exercises it over
//! HTTP and both WebSocket planes.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Resolve the path to the compiled `mux` binary.
pub fn mux_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("mux")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Minimal HTTP/1.1 request over TCP, returning the response body.
pub async fn http_request(
    port: u16,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> anyhow::Result<String> {
    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;
    let body = response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("").to_string();
    Ok(body)
}

pub async fn http_get(port: u16, path: &str) -> anyhow::Result<String> {
    http_request(port, "GET", path, None).await
}

pub async fn http_post(port: u16, path: &str, body: &str) -> anyhow::Result<String> {
    http_request(port, "POST", path, Some(body)).await
}

/// A running `mux` server, killed on drop.
pub struct MuxProcess {
    child: Child,
    pub port: u16,
    pub control_port: u16,
    pub data_port: u16,
}

impl MuxProcess {
    pub fn start() -> anyhow::Result<Self> {
        let binary = mux_binary();
        anyhow::ensure!(binary.exists(), "mux binary not found at {}", binary.display());

        let port = free_port()?;
        let control_port = free_port()?;
        let data_port = free_port()?;

        let mut args: Vec<String> = Vec::new();
        args.extend(["--host".into(), "127.0.0.1".into()]);
        args.extend(["--port".into(), port.to_string()]);
        args.extend(["--control-port".into(), control_port.to_string()]);
        args.extend(["--data-port".into(), data_port.to_string()]);
        args.extend(["--fps".into(), "30".into()]);

        let child = Command::new(&binary)
            .args(&args)
            .env("SHELL", "/bin/sh")
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, control_port, data_port })
    }

    /// Poll health until the server responds.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("mux did not become healthy within {timeout:?}");
            }
            if let Ok(body) = http_get(self.port, "/api/v1/health").await {
                if body.contains("running") {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Create a session via HTTP, returning its token.
    pub async fn new_session(&self, admin: bool) -> anyhow::Result<String> {
        let body =
            http_post(self.port, "/api/v1/sessions", &format!("{{\"admin\":{admin}}}")).await?;
        let v: serde_json::Value = serde_json::from_str(&body)?;
        v["token"]
            .as_str()
            .map(|s| s.to_owned())
            .ok_or_else(|| anyhow::anyhow!("no token in {body}"))
    }

    /// Open a control-plane WebSocket.
    pub async fn control_ws(&self, token: &str, role: &str) -> anyhow::Result<Ws> {
        let url =
            format!("ws://127.0.0.1:{}/ws/control?token={token}&role={role}", self.control_port);
        let (ws, _) = connect_async(url).await?;
        Ok(ws)
    }

    /// Open a data-plane WebSocket paired with a control connection.
    pub async fn data_ws(&self, token: &str, conn: u64) -> anyhow::Result<Ws> {
        let url = format!("ws://127.0.0.1:{}/ws/data?token={token}&conn={conn}", self.data_port);
        let (ws, _) = connect_async(url).await?;
        Ok(ws)
    }
}

impl Drop for MuxProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Next JSON text message, skipping everything else.
pub async fn next_json(ws: &mut Ws, timeout: Duration) -> anyhow::Result<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("timed out waiting for a json message"))?;
        let msg = tokio::time::timeout(remaining, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

/// Wait for a JSON message whose `type` matches.
pub async fn wait_json_type(
    ws: &mut Ws,
    msg_type: &str,
    timeout: Duration,
) -> anyhow::Result<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("timed out waiting for type={msg_type}"))?;
        let msg = tokio::time::timeout(remaining, next_json(ws, remaining)).await??;
        if msg["type"] == msg_type {
            return Ok(msg);
        }
    }
}

/// Next binary message, skipping everything else.
pub async fn next_binary(ws: &mut Ws, timeout: Duration) -> anyhow::Result<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("timed out waiting for a binary message"))?;
        let msg = tokio::time::timeout(remaining, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        if let Message::Binary(buf) = msg {
            return Ok(buf.to_vec());
        }
    }
}

/// Send one JSON control message.
pub async fn send_json(ws: &mut Ws, value: serde_json::Value) -> anyhow::Result<()> {
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

/// Send one binary data-plane frame.
pub async fn send_binary(ws: &mut Ws, frame: Vec<u8>) -> anyhow::Result<()> {
    ws.send(Message::Binary(frame.into())).await?;
    Ok(())
}
