//! Capability traits for the two physical subsystems.
//!
//! Every call is synchronous and may block for the duration of a network
//! round trip or a complete move.  Failures come back as a classified
//! [`GatewayError`] so the caller can branch on connection vs. rejected
//! command vs. malformed response instead of crashing.
//!
//! Both traits take `&self` so a single driver can be shared behind an `Arc`
//! between the cycle loop and an operator issuing an emergency stop.

use lockstep_types::{DoorState, GatewayError, LockerId, SensorState};

use crate::positions::JointAngles;

/// Remote locker bank: open commands plus door and occupancy queries.
pub trait LockerGateway: Send + Sync {
    /// Command compartment `locker` to unlock.  Safe to retry.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Rejected`] when the server refuses the command,
    /// [`GatewayError::Connection`] when it cannot be reached.
    fn open(&self, locker: LockerId) -> Result<(), GatewayError>;

    /// Physical door state of `locker`.  Side-effect free.
    fn door_state(&self, locker: LockerId) -> Result<DoorState, GatewayError>;

    /// IR occupancy reading of `locker`.  Side-effect free.
    fn sensor_state(&self, locker: LockerId) -> Result<SensorState, GatewayError>;

    /// Lightweight reachability check.
    fn probe(&self) -> bool;
}

/// Motion controller driving the manipulator between named joint targets.
pub trait RobotGateway: Send + Sync {
    /// Open (or re-open) the session to the motion controller.  Any
    /// reconnect-with-delay policy belongs to the driver.
    fn connect(&self) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    /// Move to the named position and block until the driver reports
    /// arrival or an error.
    ///
    /// # Errors
    ///
    /// [`GatewayError::UnknownPosition`] when `position` is not in the
    /// driver's table; other variants for driver failures.
    fn move_to(&self, position: &str) -> Result<(), GatewayError>;

    /// Measured joint angles, or `None` when the controller cannot report them.
    fn feedback(&self) -> Option<JointAngles>;

    /// Emergency stop.  Callable at any time, pre-empting an in-flight move.
    fn stop(&self) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// Minimal locker that is always closed.
    struct ClosedLocker;

    impl LockerGateway for ClosedLocker {
        fn open(&self, _locker: LockerId) -> Result<(), GatewayError> {
            Err(GatewayError::Rejected("door jammed".into()))
        }

        fn door_state(&self, _locker: LockerId) -> Result<DoorState, GatewayError> {
            Ok(DoorState::Closed)
        }

        fn sensor_state(&self, _locker: LockerId) -> Result<SensorState, GatewayError> {
            Ok(SensorState::Empty)
        }

        fn probe(&self) -> bool {
            true
        }
    }

    struct StoppableRobot {
        stopped: AtomicBool,
    }

    impl RobotGateway for StoppableRobot {
        fn connect(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn move_to(&self, position: &str) -> Result<(), GatewayError> {
            Err(GatewayError::UnknownPosition(position.into()))
        }

        fn feedback(&self) -> Option<JointAngles> {
            None
        }

        fn stop(&self) -> Result<(), GatewayError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn locker_gateway_is_object_safe() {
        let locker: Arc<dyn LockerGateway> = Arc::new(ClosedLocker);
        assert_eq!(locker.door_state(LockerId(1)).unwrap(), DoorState::Closed);
        assert!(matches!(
            locker.open(LockerId(1)),
            Err(GatewayError::Rejected(_))
        ));
    }

    #[test]
    fn stop_is_reachable_through_shared_handle() {
        let robot = Arc::new(StoppableRobot {
            stopped: AtomicBool::new(false),
        });
        let shared: Arc<dyn RobotGateway> = robot.clone();
        let other = Arc::clone(&shared);
        std::thread::spawn(move || other.stop().unwrap())
            .join()
            .unwrap();
        assert!(robot.stopped.load(Ordering::SeqCst));
    }
}
