//! Minimal HTTP/1.1 server for exercising the update downloader.
//!
//! Hand-written on a tokio `TcpListener` so tests control the raw headers,
//! including omitting `Content-Length` or advertising the wrong value.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// The canned response served for every request.
#[derive(Debug, Clone)]
pub struct TestResponse {
    status: u16,
    body: Vec<u8>,
    /// `None` omits the header; the body is then delimited by connection close.
    content_length: Option<String>,
}

impl TestResponse {
    /// `200 OK` with a correct `Content-Length`.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_length: Some(body.len().to_string()),
            body,
        }
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            content_length: Some("0".to_string()),
        }
    }

    pub fn without_content_length(mut self) -> Self {
        self.content_length = None;
        self
    }

    pub fn with_content_length(mut self, value: impl Into<String>) -> Self {
        self.content_length = Some(value.into());
        self
    }
}

/// A running server, stopped on drop.
pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(response: TestResponse) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("test server address");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let response = response.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                request.extend_from_slice(&buf[..n]);
                                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                        }
                    }

                    let reason = if response.status == 200 { "OK" } else { "Status" };
                    let mut head = format!("HTTP/1.1 {} {reason}\r\n", response.status);
                    if let Some(length) = &response.content_length {
                        head.push_str(&format!("Content-Length: {length}\r\n"));
                    }
                    head.push_str("Connection: close\r\n\r\n");

                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(&response.body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            addr,
            hits,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/update", self.addr)
    }

    /// Number of connections accepted so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
