//! `lockstep-cockpit` – read-only monitoring server
//!
//! Boots a small HTTP + WebSocket server (default port `9091`) over a
//! [`SnapshotReader`][lockstep_middleware::SnapshotReader]:
//!
//! | Path | Response |
//! |---|---|
//! | `GET /` | Embedded dashboard page. |
//! | `GET /api/status` | Latest snapshot as JSON. |
//! | `GET /ws` (upgrade) | Pushes every published snapshot as a JSON text frame. |
//!
//! Nothing here can reach the gateways or the controller: the server only
//! ever sees snapshots.
//!
//! # Usage
//!
//! ```rust,no_run
//! use lockstep_cockpit::MonitorServer;
//! use lockstep_middleware::StatusBroadcaster;
//!
//! #[tokio::main]
//! async fn main() {
//!     let broadcaster = StatusBroadcaster::new();
//!     MonitorServer::new(broadcaster.reader())
//!         .run()
//!         .await
//!         .expect("monitor server failed");
//! }
//! ```

pub mod server;

pub use server::{DEFAULT_PORT, MonitorError, MonitorServer, StatusResponse};
