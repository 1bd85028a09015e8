//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use embed_proxy::config::ProxyConfig;
use embed_proxy::http::HttpServer;
use embed_proxy::lifecycle::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// A captured upstream request: head text and body bytes.
#[derive(Debug, Clone)]
pub struct Captured {
    pub head: String,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.trim()
                .eq_ignore_ascii_case(name)
                .then(|| v.trim().to_string())
        })
    }
}

/// Raw TCP upstream that answers every request with the same bytes.
pub struct MockUpstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl MockUpstream {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Captured> {
        self.requests.lock().unwrap().last().cloned()
    }
}

/// Build a complete HTTP/1.1 response with `Content-Length` and `Connection: close`.
pub fn http_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (k, v) in headers {
        out.push_str(&format!("{k}: {v}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

async fn read_request(socket: &mut TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break buf.len(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut captured = Captured {
        head,
        body: buf[head_end..].to_vec(),
    };
    let declared: usize = captured
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while captured.body.len() < declared {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => captured.body.extend_from_slice(&chunk[..n]),
        }
    }
    captured
}

/// Start an upstream that replies with `response` to every request.
pub async fn start_mock_upstream(response: Vec<u8>) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let response = Arc::new(response);

    let (h, r) = (hits.clone(), requests.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let (h, r, response) = (h.clone(), r.clone(), response.clone());
            tokio::spawn(async move {
                let captured = read_request(&mut socket).await;
                h.fetch_add(1, Ordering::SeqCst);
                r.lock().unwrap().push(captured);
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });

    MockUpstream {
        addr,
        hits,
        requests,
    }
}

/// Start an upstream that accepts connections and never answers.
pub async fn start_hanging_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _held = socket;
                std::future::pending::<()>().await;
            });
        }
    });
    addr
}

/// Upstream that trickles a large octet body in 1 KiB writes and records
/// when a write fails because the reader went away.
pub struct DribblingUpstream {
    pub addr: SocketAddr,
    pub total: usize,
    sent: Arc<AtomicUsize>,
    closed: Arc<Notify>,
}

impl DribblingUpstream {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Body bytes handed to the socket so far.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Wait for the connection to be closed from the other side.
    pub async fn closed_within(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.closed.notified()).await.is_ok()
    }
}

pub async fn start_dribbling_upstream(total: usize) -> DribblingUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sent = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(Notify::new());

    let (s, c) = (sent.clone(), closed.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let (s, c) = (s.clone(), c.clone());
            tokio::spawn(async move {
                read_request(&mut socket).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {total}\r\n\r\n"
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    c.notify_one();
                    return;
                }
                let chunk = [b'z'; 1024];
                while s.load(Ordering::SeqCst) < total {
                    if socket.write_all(&chunk).await.is_err() {
                        c.notify_one();
                        return;
                    }
                    s.fetch_add(chunk.len(), Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            });
        }
    });

    DribblingUpstream {
        addr,
        total,
        sent,
        closed,
    }
}

/// An address with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct TestProxy {
    pub addr: SocketAddr,
    pub origin: String,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Query-mode URL for `target`.
    pub fn proxied(&self, target: &str) -> String {
        self.url(&format!("/proxy?url={}", encode(target)))
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Start a proxy on an ephemeral loopback port.
pub async fn spawn_proxy(configure: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    configure(&mut config);

    let server = HttpServer::bind(config).await.unwrap();
    let addr = server.local_addr();
    let origin = server.public_origin().to_string();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(rx).await;
    });

    TestProxy {
        addr,
        origin,
        shutdown,
    }
}

/// Client that sees exactly what the proxy sends: no decompression, no redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
