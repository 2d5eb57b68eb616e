//! Local one-shot HTTP responder for exercising the client end to end.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What the client sent.
pub struct Received {
    pub request_line: String,
    pub api_key: Option<String>,
    pub body: serde_json::Value,
}

/// Answer the next request with `body` as `application/json`.
pub async fn reply_json(body: &str) -> (String, JoinHandle<Received>) {
    serve_once("application/json", body.to_string()).await
}

/// Answer the next request with one SSE `data:` event per entry.
pub async fn reply_sse(events: &[&str]) -> (String, JoinHandle<Received>) {
    let body: String = events.iter().map(|e| format!("data: {}\r\n\r\n", e)).collect();
    serve_once("text/event-stream", body).await
}

fn header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

async fn serve_once(content_type: &'static str, body: String) -> (String, JoinHandle<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];

        let head_len = loop {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the request head");
            raw.extend_from_slice(&buf[..n]);
            if let Some(end) = header_end(&raw) {
                break end;
            }
        };
        let head = String::from_utf8_lossy(&raw[..head_len]).into_owned();
        let total = head_len + content_length(&head);
        while raw.len() < total {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the request body");
            raw.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;

        let api_key = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("x-goog-api-key"))
            .map(|(_, value)| value.trim().to_string());

        Received {
            request_line: head.lines().next().unwrap_or_default().to_string(),
            api_key,
            body: serde_json::from_slice(&raw[head_len..total]).unwrap_or(serde_json::Value::Null),
        }
    });

    (base_url, handle)
}
