//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use delay_proxy::config::{ProxyConfig, UpstreamConfig};
use delay_proxy::net::{ConnectionTracker, Listener};
use delay_proxy::{EchoServer, ProxyServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A proxy and echo service running on ephemeral ports.
pub struct Stack {
    pub proxy_addr: SocketAddr,
    pub upstream_addr: SocketAddr,
    pub upstream_connections: ConnectionTracker,
    pub proxy_connections: ConnectionTracker,
    pub shutdown: Shutdown,
}

impl Stack {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.proxy_addr, path)
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

async fn ephemeral() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// Start the echo service and a proxy pointing at it.
pub async fn start_stack(delay_ms: u64) -> Stack {
    let shutdown = Shutdown::new();

    let echo = EchoServer::new(UpstreamConfig::default());
    let upstream_connections = echo.connections();
    let upstream_listener = Listener::from_tcp(ephemeral().await, 1_000);
    let upstream_addr = upstream_listener.local_addr().unwrap();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = echo.run(upstream_listener, signal).await;
    });

    let (proxy_addr, proxy_connections) =
        start_proxy(&upstream_addr.to_string(), delay_ms, &shutdown).await;

    Stack {
        proxy_addr,
        upstream_addr,
        upstream_connections,
        proxy_connections,
        shutdown,
    }
}

/// Start a proxy forwarding to `target`.
pub async fn start_proxy(
    target: &str,
    delay_ms: u64,
    shutdown: &Shutdown,
) -> (SocketAddr, ConnectionTracker) {
    let mut config = ProxyConfig::default();
    config.target.address = target.to_string();
    config.delay.millis = delay_ms;
    config.timeouts.connect_ms = 1_000;
    config.timeouts.response_secs = 5;

    let proxy = ProxyServer::new(config).unwrap();
    let connections = proxy.connections();
    let listener = Listener::from_tcp(ephemeral().await, 1_000);
    let addr = listener.local_addr().unwrap();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = proxy.run(listener, signal).await;
    });

    (addr, connections)
}

/// Serve an arbitrary router on an ephemeral port.
pub async fn start_router_backend(router: Router) -> SocketAddr {
    let listener = ephemeral().await;
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// An address with nothing listening on it.
pub async fn dead_addr() -> SocketAddr {
    let listener = ephemeral().await;
    listener.local_addr().unwrap()
}

/// Start a programmable raw backend; `f` decides status and body per request.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = ephemeral().await;
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let path = head
                            .lines()
                            .next()
                            .and_then(|line| line.split_whitespace().nth(1))
                            .unwrap_or("/")
                            .to_string();

                        let (status, body) = f(path).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read until the end of the request head.
async fn read_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Send raw bytes and read the whole response until the peer closes.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).into_owned()
}

/// A client that never pools or goes through a system proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
