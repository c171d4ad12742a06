//! Station configuration – reads/writes `~/.lockstep/config.toml`.
//!
//! Every section is optional; a missing file means "simulated locker and
//! robot with factory timings", which is enough to watch the controller run.
//!
//! ```toml
//! [locker]
//! driver = "http"
//! url = "http://10.0.0.5"
//! password = "…"
//! locker_id = 1
//!
//! [cycle]
//! close_timeout_ms = 30000
//!
//! [positions]
//! home = [80.555, -111.609, 110.737, -188.994, -84.695, 144.436]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lockstep_hal::PositionTable;
use lockstep_hal::positions::HOME;
use lockstep_runtime::ControllerConfig;
use lockstep_types::LockerId;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Which locker implementation to drive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockerDriver {
    Http,
    #[default]
    Sim,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotDriver {
    #[default]
    Sim,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockerSection {
    pub driver: LockerDriver,
    /// Base URL of the locker server.
    pub url: String,
    /// Login password (kept out of `Debug` output and wiped on drop).
    #[serde(skip_serializing_if = "is_blank")]
    pub password: Zeroizing<String>,
    pub locker_id: u32,
    pub request_timeout_ms: u64,
    /// `sim` only: delay between an accepted open command and the door opening.
    pub sim_open_delay_ms: u64,
    /// `sim` only: how long the door stays open before it swings shut.
    pub sim_close_delay_ms: u64,
}

impl Default for LockerSection {
    fn default() -> Self {
        Self {
            driver: LockerDriver::default(),
            url: "http://localhost:8080".to_string(),
            password: Zeroizing::new(String::new()),
            locker_id: 1,
            request_timeout_ms: 5_000,
            sim_open_delay_ms: 500,
            sim_close_delay_ms: 4_000,
        }
    }
}

impl std::fmt::Debug for LockerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockerSection")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("locker_id", &self.locker_id)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("sim_open_delay_ms", &self.sim_open_delay_ms)
            .field("sim_close_delay_ms", &self.sim_close_delay_ms)
            .finish()
    }
}

fn is_blank(secret: &Zeroizing<String>) -> bool {
    secret.is_empty()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotSection {
    pub driver: RobotDriver,
    /// Attempts per `connect()` call.
    pub connect_attempts: u32,
    pub connect_delay_ms: u64,
    /// `sim` only: how long each move takes.
    pub sim_move_time_ms: u64,
}

impl Default for RobotSection {
    fn default() -> Self {
        Self {
            driver: RobotDriver::default(),
            connect_attempts: 3,
            connect_delay_ms: 1_000,
            sim_move_time_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleSection {
    pub max_open_retries: u32,
    pub retry_delay_ms: u64,
    pub open_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub reconnect_delay_ms: u64,
    pub joint_tolerance_deg: f64,
    pub routine: Vec<String>,
}

impl Default for CycleSection {
    fn default() -> Self {
        Self {
            max_open_retries: 3,
            retry_delay_ms: 2_000,
            open_timeout_ms: 10_000,
            close_timeout_ms: 30_000,
            poll_interval_ms: 500,
            settle_delay_ms: 3_000,
            reconnect_delay_ms: 5_000,
            joint_tolerance_deg: 2.0,
            routine: vec![HOME.into(), "position_1".into(), HOME.into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: lockstep_cockpit::DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Audit log file; omit to log to the console only.
    pub file: Option<PathBuf>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("cycle_controller.log")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted station configuration stored in `~/.lockstep/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub locker: LockerSection,
    pub robot: RobotSection,
    pub cycle: CycleSection,
    pub positions: PositionTable,
    pub monitor: MonitorSection,
    pub log: LogSection,
}

impl Config {
    /// Runtime settings for the [`CycleController`][lockstep_runtime::CycleController].
    pub fn controller_config(&self) -> ControllerConfig {
        let c = &self.cycle;
        ControllerConfig {
            locker: LockerId(self.locker.locker_id),
            max_open_retries: c.max_open_retries,
            retry_delay: Duration::from_millis(c.retry_delay_ms),
            open_timeout: Duration::from_millis(c.open_timeout_ms),
            close_timeout: Duration::from_millis(c.close_timeout_ms),
            poll_interval: Duration::from_millis(c.poll_interval_ms),
            settle_delay: Duration::from_millis(c.settle_delay_ms),
            reconnect_delay: Duration::from_millis(c.reconnect_delay_ms),
            joint_tolerance_deg: c.joint_tolerance_deg,
            routine: c.routine.clone(),
            positions: self.positions.clone(),
        }
    }
}

/// Return the config path: `$LOCKSTEP_CONFIG` if set, else
/// `~/.lockstep/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("LOCKSTEP_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".lockstep").join("config.toml")
}

/// Load the config from [`config_path`], falling back to defaults when the
/// file does not exist, then apply `LOCKSTEP_*` overrides.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `LOCKSTEP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LOCKSTEP_LOCKER_URL` | `locker.url` |
/// | `LOCKSTEP_LOCKER_PASSWORD` | `locker.password` |
/// | `LOCKSTEP_LOCKER_ID` | `locker.locker_id` |
/// | `LOCKSTEP_MONITOR_PORT` | `monitor.port` |
///
/// Unparsable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LOCKSTEP_LOCKER_URL") {
        cfg.locker.url = v;
    }
    if let Ok(v) = std::env::var("LOCKSTEP_LOCKER_PASSWORD") {
        cfg.locker.password = Zeroizing::new(v);
    }
    if let Ok(v) = std::env::var("LOCKSTEP_LOCKER_ID")
        && let Ok(id) = v.parse::<u32>()
    {
        cfg.locker.locker_id = id;
    }
    if let Ok(v) = std::env::var("LOCKSTEP_MONITOR_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.monitor.port = port;
    }
}

/// Write `cfg` to `path` with owner-only permissions on Unix, creating the
/// parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
