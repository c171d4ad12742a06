use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of completed cycles carried in every [`Snapshot`].
pub const HISTORY_LEN: usize = 10;

/// Identifier of a single compartment on the locker bank (1-based, as printed
/// on the doors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockerId(pub u32);

impl fmt::Display for LockerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Physical door state reported by the locker controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DoorState {
    Open,
    Closed,
    /// Not observed yet, or the last read failed.
    #[default]
    Unknown,
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DoorState::Open => "Open",
            DoorState::Closed => "Closed",
            DoorState::Unknown => "Unknown",
        })
    }
}

/// Occupancy reported by the compartment's IR sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SensorState {
    Empty,
    Occupied,
    #[default]
    Unknown,
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorState::Empty => "Empty",
            SensorState::Occupied => "Occupied",
            SensorState::Unknown => "Unknown",
        })
    }
}

/// Last observed state of the manipulator within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RobotState {
    #[default]
    Unknown,
    /// Connected and idle, no motion issued in this cycle yet.
    Ready,
    Moving,
    /// The whole routine finished within tolerance.
    Completed,
    Faulted,
}

/// Ordered steps of a cycle.  The derived ordering is the execution order, so
/// `Phase::OpenLocker < Phase::VerifyOpen` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    CheckInitialState,
    CheckConnection,
    OpenLocker,
    VerifyOpen,
    RobotSequence,
    VerifyClose,
    Complete,
}

impl Phase {
    /// Human-readable label shown on the dashboard.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::CheckInitialState => "Checking Initial State",
            Phase::CheckConnection => "Checking Connection",
            Phase::OpenLocker => "Opening Locker",
            Phase::VerifyOpen => "Verifying Open",
            Phase::RobotSequence => "Robot Sequence",
            Phase::VerifyClose => "Verifying Close",
            Phase::Complete => "Complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a cycle.  Only `Pending` cycles are still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Outcome {
    #[default]
    Pending,
    Success,
    Failed,
    /// Close verification timed out; automatic cycling is halted.
    Critical,
}

impl Outcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}

/// Coarse error classification used in logs and on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Connection,
    Timeout,
    UnsafeState,
    Motion,
    Critical,
    Interrupted,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorClass::Connection => "connection",
            ErrorClass::Timeout => "timeout",
            ErrorClass::UnsafeState => "unsafe_state",
            ErrorClass::Motion => "motion",
            ErrorClass::Critical => "critical",
            ErrorClass::Interrupted => "interrupted",
        })
    }
}

/// Failure of a single gateway call, classified so the controller can branch
/// on it instead of crashing.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unknown position '{0}'")]
    UnknownPosition(String),
}

/// Why a cycle did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CycleError {
    #[error("{component} unreachable: {details}")]
    Connection { component: String, details: String },

    #[error(
        "timed out after {waited_ms} ms waiting for locker to become {expected} (last observed: {last_observed})"
    )]
    Timeout {
        phase: Phase,
        expected: DoorState,
        last_observed: DoorState,
        waited_ms: u64,
    },

    #[error("unsafe {} state: locker is {observed}, expected {expected}", unsafe_context(.phase))]
    UnsafeState {
        phase: Phase,
        observed: DoorState,
        expected: DoorState,
    },

    #[error("motion to '{position}' failed: {details}")]
    Motion { position: String, details: String },

    #[error(
        "CRITICAL: locker {locker} did not close within {waited_ms} ms; physical inspection required"
    )]
    Critical { locker: LockerId, waited_ms: u64 },

    #[error("shutdown requested before {phase}")]
    Interrupted { phase: Phase },
}

fn unsafe_context(phase: &Phase) -> &'static str {
    match phase {
        Phase::CheckInitialState => "initial",
        Phase::RobotSequence => "pre-motion",
        _ => "locker",
    }
}

impl CycleError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CycleError::Connection { .. } => ErrorClass::Connection,
            CycleError::Timeout { .. } => ErrorClass::Timeout,
            CycleError::UnsafeState { .. } => ErrorClass::UnsafeState,
            CycleError::Motion { .. } => ErrorClass::Motion,
            CycleError::Critical { .. } => ErrorClass::Critical,
            CycleError::Interrupted { .. } => ErrorClass::Interrupted,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            class: self.class(),
            message: self.to_string(),
        }
    }
}

/// Serializable form of a [`CycleError`] as stored on a [`Cycle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub class: ErrorClass,
    pub message: String,
}

/// One attempt at open → verify → motion → verify-close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub cycle_number: u64,
    pub phase: Phase,
    pub locker_state: DoorState,
    /// IR sensor reading, taken before opening and again after a confirmed close.
    pub occupancy: SensorState,
    pub robot_state: RobotState,
    /// Name of the last routine position the robot confirmed.
    pub robot_position: Option<String>,
    pub open_attempts: u32,
    pub outcome: Outcome,
    pub error: Option<ErrorReport>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// `ended_at - started_at`; absent while the cycle is pending.
    pub duration_secs: Option<f64>,
}

impl Cycle {
    /// Start cycle `cycle_number` at [`Phase::CheckInitialState`].
    pub fn new(cycle_number: u64) -> Self {
        Self {
            cycle_number,
            phase: Phase::CheckInitialState,
            locker_state: DoorState::Unknown,
            occupancy: SensorState::Unknown,
            robot_state: RobotState::Unknown,
            robot_position: None,
            open_attempts: 0,
            outcome: Outcome::Pending,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_secs: None,
        }
    }

    /// Move to `phase`.  Returns `false` and leaves the cycle untouched when
    /// `phase` is not strictly after the current one, so a cycle can never
    /// regress.
    pub fn advance(&mut self, phase: Phase) -> bool {
        if phase > self.phase {
            self.phase = phase;
            true
        } else {
            false
        }
    }

    /// Seal the cycle with `result`.  A second call is a no-op.
    pub fn finish(&mut self, result: Result<(), &CycleError>) {
        if self.outcome.is_finished() {
            return;
        }
        match result {
            Ok(()) => {
                self.advance(Phase::Complete);
                self.outcome = Outcome::Success;
                self.error = None;
            }
            Err(err) => {
                self.outcome = match err {
                    CycleError::Critical { .. } => Outcome::Critical,
                    _ => Outcome::Failed,
                };
                self.error = Some(err.report());
            }
        }
        let ended_at = Utc::now();
        self.duration_secs = Some(
            (ended_at - self.started_at)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64(),
        );
        self.ended_at = Some(ended_at);
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs_f64)
    }
}

/// Process-lifetime aggregate over finished cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub total_cycles: u64,
    pub success_count: u64,
    /// Includes critical cycles.
    pub failed_count: u64,
    pub critical_count: u64,
    pub started_at: DateTime<Utc>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            total_cycles: 0,
            success_count: 0,
            failed_count: 0,
            critical_count: 0,
            started_at: Utc::now(),
        }
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a finished cycle.  Pending outcomes are ignored and return `false`.
    pub fn record(&mut self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Pending => return false,
            Outcome::Success => self.success_count += 1,
            Outcome::Failed => self.failed_count += 1,
            Outcome::Critical => {
                self.failed_count += 1;
                self.critical_count += 1;
            }
        }
        self.total_cycles += 1;
        true
    }

    /// Percentage of finished cycles that succeeded (0.0 when none finished).
    pub fn success_rate(&self) -> f64 {
        if self.total_cycles == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_cycles as f64 * 100.0
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}

/// Raised when a locker fails to close after motion.  Stays on every
/// [`Snapshot`] until an operator acknowledges it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalAlert {
    pub cycle_number: u64,
    pub locker: LockerId,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Immutable, atomically published view of the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// `false` before the first cycle starts and after shutdown.
    pub running: bool,
    /// Automatic cycling is paused on a critical condition.
    pub halted: bool,
    pub current: Option<Cycle>,
    pub statistics: Statistics,
    /// Most recent finished cycles, oldest first, at most [`HISTORY_LEN`].
    pub recent_cycles: Vec<Cycle>,
    pub locker_connected: bool,
    pub robot_connected: bool,
    pub critical: Option<CriticalAlert>,
    pub published_at: DateTime<Utc>,
}

impl Snapshot {
    /// The snapshot readers see before the controller publishes anything.
    pub fn not_started() -> Self {
        Self {
            running: false,
            halted: false,
            current: None,
            statistics: Statistics::new(),
            recent_cycles: Vec::new(),
            locker_connected: false,
            robot_connected: false,
            critical: None,
            published_at: Utc::now(),
        }
    }

    /// Number of the cycle currently shown, or 0 before the first one.
    pub fn cycle_count(&self) -> u64 {
        self.current.as_ref().map_or(0, |c| c.cycle_number)
    }
}
