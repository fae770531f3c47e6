// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, time::Duration};

use exchange_client_rs::cfg::config::{BufferConfig, ExchangeClientConfig, RetryConfig, RuntimeConfig};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

/// Config tuned for fast, deterministic integration tests: small buffer,
/// short retry envelope, short poll timeout.
pub fn test_config() -> ExchangeClientConfig {
    ExchangeClientConfig {
        buffer: BufferConfig {
            max_buffered_bytes: 10_000,
            max_response_size: 1_000_000,
            concurrent_request_multiplier: 3,
        },
        retry: RetryConfig {
            min_error_duration: Duration::from_millis(5),
            max_error_duration: Duration::from_millis(50),
            max_error_retries: 2,
        },
        runtime: RuntimeConfig {
            poll_timeout: Duration::from_millis(200),
        },
    }
}

/// Encodes one page using the crate's length-prefixed frame format (mirrors
/// the private layout in `client::http_sub_client`): `[u32 LE
/// total_len][u64 LE size_in_bytes][u64 LE retained_size_in_bytes][payload]`.
pub fn encode_frame(size_in_bytes: u64, retained_size_in_bytes: u64, payload: &[u8]) -> Vec<u8> {
    const FRAME_HEADER_LEN: usize = 4 + 8 + 8;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    let total_len = (FRAME_HEADER_LEN + payload.len()) as u32;
    buf.extend_from_slice(&total_len.to_le_bytes());
    buf.extend_from_slice(&size_in_bytes.to_le_bytes());
    buf.extend_from_slice(&retained_size_in_bytes.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Minimal one-shot HTTP/1.1 server over raw TCP (no mock-http crate in the
/// dependency stack, so this is hand-rolled the way the teacher's own
/// `ClientConnection` drives raw sockets): accepts exactly one connection,
/// ignores the request line, and writes back `body` with an optional
/// `X-Exchange-Complete: true` header. Returns the base URL to hit.
pub async fn serve_once(body: Vec<u8>, finished: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr: SocketAddr = listener.local_addr().expect("local_addr");

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;

            let complete_header = if finished { "X-Exchange-Complete: true\r\n" } else { "" };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{complete_header}Connection: close\r\n\r\n",
                body.len(),
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{addr}")
}

/// Like [`serve_once`] but refuses the connection outright (listener is
/// dropped immediately), for exercising the sub-client's retry/escalation
/// path deterministically.
pub async fn serve_connection_refused() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    drop(listener);
    format!("http://{addr}")
}
