//! [`LockerGateway`] over the locker server's JSON API.
//!
//! The server authenticates with a password exchanged for a session token
//! (`POST /api/login`).  The token travels as a `session` cookie on every
//! later request.  A `401`/`403` on an authenticated call triggers exactly one
//! fresh login before the request is retried.
//!
//! | Call | Request | Response |
//! |---|---|---|
//! | login | `POST /api/login {"password"}` | `{"success", "session"}` |
//! | status | `GET /api/status` | `{"connected", "uptime", "total_commands", "lockers": {"<n>": {"door_open", "sensor_status"}}}` |
//! | open | `POST /api/locker/<n>/open` | `{"success", "error"}` |

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use lockstep_types::{DoorState, GatewayError, LockerId, SensorState};
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::COOKIE;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::gateway::LockerGateway;

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct LoginRequest<'a> {
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    session: Option<String>,
}

#[derive(Deserialize)]
struct OpenResponse {
    #[serde(default)]
    success: bool,
    error: Option<String>,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    /// Whether the server currently has a link to the locker hardware.
    #[serde(default)]
    pub connected: bool,
    pub uptime: Option<f64>,
    pub total_commands: Option<u64>,
    #[serde(default)]
    pub lockers: HashMap<String, CompartmentStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompartmentStatus {
    pub door_open: bool,
    #[serde(default)]
    pub sensor_status: Option<String>,
}

impl ServerStatus {
    fn compartment(&self, locker: LockerId) -> Result<&CompartmentStatus, GatewayError> {
        self.lockers.get(&locker.0.to_string()).ok_or_else(|| {
            GatewayError::MalformedResponse(format!("status has no entry for locker {locker}"))
        })
    }
}

/// Session-authenticated HTTP client for the locker server.
pub struct HttpLocker {
    client: Client,
    base_url: String,
    password: Zeroizing<String>,
    session: Mutex<Option<String>>,
}

impl fmt::Debug for HttpLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLocker")
            .field("base_url", &self.base_url)
            .field("password", &"[REDACTED]")
            .field("has_session", &self.session_token().is_some())
            .finish()
    }
}

impl HttpLocker {
    /// Build a client for `base_url` (e.g. `http://10.0.0.5`).  No request is
    /// sent until the first gateway call.
    pub fn new(
        base_url: impl Into<String>,
        password: Zeroizing<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Connection(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            password,
            session: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange the password for a session token.
    pub fn login(&self) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url("/api/login"))
            .json(&LoginRequest {
                password: self.password.as_str(),
            })
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!("login failed: HTTP {status}")));
        }
        let body: LoginResponse = response
            .json()
            .map_err(|e| GatewayError::MalformedResponse(format!("login body: {e}")))?;
        if !body.success {
            return Err(GatewayError::Rejected("login refused".into()));
        }
        let token = body.session.ok_or_else(|| {
            GatewayError::MalformedResponse("login succeeded without a session token".into())
        })?;

        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        info!(server = %self.base_url, "logged in to locker server");
        Ok(())
    }

    /// Full server status, including every compartment.
    pub fn status(&self) -> Result<ServerStatus, GatewayError> {
        let response = self.authenticated(Method::GET, "/api/status")?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!("status query failed: HTTP {status}")));
        }
        response
            .json()
            .map_err(|e| GatewayError::MalformedResponse(format!("status body: {e}")))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn session_token(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn send(&self, method: Method, path: &str) -> Result<Response, GatewayError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(token) = self.session_token() {
            request = request.header(COOKIE, format!("session={token}"));
        }
        request.send().map_err(transport_error)
    }

    fn authenticated(&self, method: Method, path: &str) -> Result<Response, GatewayError> {
        if self.session_token().is_none() {
            self.login()?;
        }
        let response = self.send(method.clone(), path)?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            warn!(path, "session rejected, logging in again");
            self.login()?;
            return self.send(method, path);
        }
        Ok(response)
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Connection(err.to_string())
}

impl LockerGateway for HttpLocker {
    fn open(&self, locker: LockerId) -> Result<(), GatewayError> {
        let path = format!("/api/locker/{}/open", locker.0);
        let response = self.authenticated(Method::POST, &path)?;
        let status = response.status();
        let body: OpenResponse = match response.json() {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(GatewayError::Rejected(format!("open failed: HTTP {status}")));
            }
            Err(e) => return Err(GatewayError::MalformedResponse(format!("open body: {e}"))),
        };
        if body.success {
            debug!(%locker, "open command accepted");
            Ok(())
        } else {
            Err(GatewayError::Rejected(
                body.error.unwrap_or_else(|| "open refused".into()),
            ))
        }
    }

    fn door_state(&self, locker: LockerId) -> Result<DoorState, GatewayError> {
        let status = self.status()?;
        let compartment = status.compartment(locker)?;
        Ok(if compartment.door_open {
            DoorState::Open
        } else {
            DoorState::Closed
        })
    }

    fn sensor_state(&self, locker: LockerId) -> Result<SensorState, GatewayError> {
        let status = self.status()?;
        let compartment = status.compartment(locker)?;
        Ok(match compartment.sensor_status.as_deref() {
            Some("Empty") => SensorState::Empty,
            Some("Occupied") => SensorState::Occupied,
            _ => SensorState::Unknown,
        })
    }

    fn probe(&self) -> bool {
        match self.status() {
            Ok(status) => status.connected,
            Err(e) => {
                debug!(error = %e, "locker probe failed");
                false
            }
        }
    }
}
