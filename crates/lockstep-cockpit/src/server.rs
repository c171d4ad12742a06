//! [`MonitorServer`] – HTTP + WebSocket server for the status dashboard.
//!
//! Listens on `0.0.0.0:9091` (configurable via [`MonitorServer::with_port`]).

use std::io;
use std::net::SocketAddr;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use lockstep_middleware::SnapshotReader;
use lockstep_types::Snapshot;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default TCP port for the monitor.
pub const DEFAULT_PORT: u16 = 9091;

/// The compiled-in dashboard page.
const MONITOR_HTML: &str = include_str!("monitor.html");

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connection I/O: {0}")]
    Io(#[from] io::Error),

    #[error("websocket: {0}")]
    WebSocket(String),

    #[error("snapshot serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Status body
// ---------------------------------------------------------------------------

/// JSON body of `/api/status` and of every WebSocket frame: the snapshot plus
/// a few derived figures the dashboard would otherwise compute itself.
#[derive(Debug, Serialize)]
pub struct StatusResponse<'a> {
    #[serde(flatten)]
    pub snapshot: &'a Snapshot,
    pub cycle_count: u64,
    pub success_rate: f64,
    pub uptime_secs: u64,
}

impl<'a> StatusResponse<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            cycle_count: snapshot.cycle_count(),
            success_rate: snapshot.statistics.success_rate(),
            uptime_secs: snapshot.statistics.uptime(Utc::now()).as_secs(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// MonitorServer
// ---------------------------------------------------------------------------

pub struct MonitorServer {
    reader: SnapshotReader,
    port: u16,
}

impl MonitorServer {
    /// Create a server over `reader` on the [`DEFAULT_PORT`].
    pub fn new(reader: SnapshotReader) -> Self {
        Self {
            reader,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Bind`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), MonitorError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| MonitorError::Bind { addr, source })?;
        info!("monitor listening on http://localhost:{}", self.port);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), MonitorError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let reader = self.reader.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, reader).await {
                            debug!(%peer, error = %e, "monitor client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "monitor accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

/// Request line and upgrade intent parsed from the head of a request.
#[derive(Debug, PartialEq)]
struct RequestHead {
    method: String,
    path: String,
    websocket: bool,
}

fn parse_head(raw: &str) -> Option<RequestHead> {
    let mut lines = raw.lines();
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;
    let path = target.split('?').next().unwrap_or(target).to_string();
    let websocket = lines.any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });
    Some(RequestHead {
        method,
        path,
        websocket,
    })
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    reader: SnapshotReader,
) -> Result<(), MonitorError> {
    // Peek so the WebSocket handshaker still sees the full request.
    let mut buf = [0u8; 2048];
    let n = stream.peek(&mut buf).await?;
    let Some(head) = parse_head(&String::from_utf8_lossy(&buf[..n])) else {
        return respond(&mut stream, "400 Bad Request", "text/plain", "bad request").await;
    };

    if head.websocket && head.path == "/ws" {
        return stream_snapshots(stream, peer, reader).await;
    }

    // Plain HTTP: drain what was peeked before answering.
    let _ = stream.read(&mut buf).await?;
    debug!(%peer, method = %head.method, path = %head.path, "monitor request");

    if head.method != "GET" {
        return respond(
            &mut stream,
            "405 Method Not Allowed",
            "text/plain",
            "read-only interface",
        )
        .await;
    }

    match head.path.as_str() {
        "/" | "/index.html" => {
            respond(&mut stream, "200 OK", "text/html; charset=utf-8", MONITOR_HTML).await
        }
        "/api/status" => {
            let snapshot = reader.latest();
            let body = StatusResponse::new(&snapshot).to_json()?;
            respond(&mut stream, "200 OK", "application/json", &body).await
        }
        _ => respond(&mut stream, "404 Not Found", "text/plain", "not found").await,
    }
}

async fn respond(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), MonitorError> {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// WebSocket: snapshot stream
// ---------------------------------------------------------------------------

async fn stream_snapshots(
    stream: TcpStream,
    peer: SocketAddr,
    mut reader: SnapshotReader,
) -> Result<(), MonitorError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| MonitorError::WebSocket(format!("handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    debug!(%peer, "websocket client connected");

    let first = StatusResponse::new(&reader.latest()).to_json()?;
    if ws_tx.send(Message::Text(first.into())).await.is_err() {
        return Ok(());
    }

    loop {
        tokio::select! {
            // ── Downstream: snapshots → browser ────────────────────────────
            next = reader.changed() => {
                let Some(snapshot) = next else { break };
                let json = StatusResponse::new(&snapshot).to_json()?;
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            // ── Upstream: only close frames matter ──────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    debug!(%peer, "websocket client disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
