//! [`ControllerConfig`] – timing, retry and motion settings for the cycle loop.

use std::time::Duration;

use lockstep_hal::PositionTable;
use lockstep_hal::positions::HOME;
use lockstep_kernel::tolerance::DEFAULT_TOLERANCE_DEG;
use lockstep_types::LockerId;
use thiserror::Error;

/// Rejected at construction time, before any hardware is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("max_open_retries must be at least 1")]
    NoOpenAttempts,

    #[error("poll_interval must be greater than zero")]
    ZeroPollInterval,

    #[error("joint tolerance must be a finite number of degrees above zero, got {0}")]
    InvalidTolerance(f64),

    #[error("motion routine is empty")]
    EmptyRoutine,

    #[error("routine references unknown position '{0}'")]
    UnknownPosition(String),

    #[error("position '{position}' has {found} joints, expected {expected}")]
    JointCountMismatch {
        position: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Compartment the robot serves.
    pub locker: LockerId,
    /// Open commands per cycle, including the first.
    pub max_open_retries: u32,
    pub retry_delay: Duration,
    pub open_timeout: Duration,
    pub close_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after a failed cycle before the next one starts.
    pub settle_delay: Duration,
    /// Pause between connectivity probes while waiting for the gateways.
    pub reconnect_delay: Duration,
    pub joint_tolerance_deg: f64,
    /// Position names visited in order by every cycle.
    pub routine: Vec<String>,
    pub positions: PositionTable,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            locker: LockerId(1),
            max_open_retries: 3,
            retry_delay: Duration::from_secs(2),
            open_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(5),
            joint_tolerance_deg: DEFAULT_TOLERANCE_DEG,
            routine: vec![HOME.into(), "position_1".into(), HOME.into()],
            positions: PositionTable::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.max_open_retries == 0 {
            return Err(ControllerError::NoOpenAttempts);
        }
        if self.poll_interval.is_zero() {
            return Err(ControllerError::ZeroPollInterval);
        }
        if !(self.joint_tolerance_deg.is_finite() && self.joint_tolerance_deg > 0.0) {
            return Err(ControllerError::InvalidTolerance(self.joint_tolerance_deg));
        }
        if self.routine.is_empty() {
            return Err(ControllerError::EmptyRoutine);
        }

        let mut expected = None;
        for name in &self.routine {
            let angles = self
                .positions
                .get(name)
                .ok_or_else(|| ControllerError::UnknownPosition(name.clone()))?;
            let expected = *expected.get_or_insert(angles.len());
            if angles.len() != expected || angles.is_empty() {
                return Err(ControllerError::JointCountMismatch {
                    position: name.clone(),
                    expected,
                    found: angles.len(),
                });
            }
        }
        Ok(())
    }
}
