//! In-process simulation gateways for tests and hardware-free runs.
//!
//! [`SimLocker`] scripts the door: an accepted open command arms an "opens"
//! trigger that is evaluated on every door read, and once the door is seen
//! open a "closes" trigger is armed the same way.  Triggers count reads or
//! wall-clock time.  [`SimRobot`] resolves moves against a
//! [`PositionTable`] and reports feedback with an optional offset.
//!
//! # Example
//!
//! ```rust
//! use lockstep_hal::sim::{SimLocker, Trigger};
//! use lockstep_hal::LockerGateway;
//! use lockstep_types::{DoorState, LockerId};
//!
//! let locker = SimLocker::new(LockerId(1))
//!     .opens_after(Trigger::Reads(0))
//!     .closes_after(Trigger::Reads(0));
//!
//! locker.open(LockerId(1)).unwrap();
//! assert_eq!(locker.door_state(LockerId(1)).unwrap(), DoorState::Open);
//! assert_eq!(locker.door_state(LockerId(1)).unwrap(), DoorState::Closed);
//! ```

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use lockstep_types::{DoorState, GatewayError, LockerId, SensorState};
use tracing::{debug, info, warn};

use crate::gateway::{LockerGateway, RobotGateway};
use crate::positions::{JointAngles, PositionTable};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Door triggers
// ────────────────────────────────────────────────────────────────────────────

/// When a scripted door transition happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// After this many further door reads (`0` = on the next read).
    Reads(u32),
    /// Once this much time has passed since the trigger was armed.
    After(Duration),
}

#[derive(Debug)]
enum Countdown {
    Reads(u32),
    Until(Instant),
}

impl Countdown {
    fn arm(trigger: Trigger) -> Self {
        match trigger {
            Trigger::Reads(n) => Countdown::Reads(n),
            Trigger::After(d) => Countdown::Until(Instant::now() + d),
        }
    }

    /// Evaluate on a door read.  Returns `true` when the transition fires.
    fn tick(&mut self) -> bool {
        match self {
            Countdown::Reads(0) => true,
            Countdown::Reads(n) => {
                *n -= 1;
                false
            }
            Countdown::Until(deadline) => Instant::now() >= *deadline,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimLocker
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct LockerSim {
    door: DoorState,
    sensor: SensorState,
    pending_open: Option<Countdown>,
    pending_close: Option<Countdown>,
    rejections_left: u32,
    reachable: bool,
    open_commands: u32,
    door_reads: u32,
}

/// A scripted locker compartment.
///
/// Defaults: door `Closed`, sensor `Empty`, opens on the first read after an
/// accepted command, closes on the second read after that.
#[derive(Debug)]
pub struct SimLocker {
    id: LockerId,
    open_trigger: Option<Trigger>,
    close_trigger: Option<Trigger>,
    state: Mutex<LockerSim>,
}

impl SimLocker {
    pub fn new(id: LockerId) -> Self {
        Self {
            id,
            open_trigger: Some(Trigger::Reads(0)),
            close_trigger: Some(Trigger::Reads(1)),
            state: Mutex::new(LockerSim {
                door: DoorState::Closed,
                sensor: SensorState::Empty,
                pending_open: None,
                pending_close: None,
                rejections_left: 0,
                reachable: true,
                open_commands: 0,
                door_reads: 0,
            }),
        }
    }

    pub fn with_door(self, door: DoorState) -> Self {
        lock(&self.state).door = door;
        self
    }

    pub fn with_sensor(self, sensor: SensorState) -> Self {
        lock(&self.state).sensor = sensor;
        self
    }

    pub fn opens_after(mut self, trigger: Trigger) -> Self {
        self.open_trigger = Some(trigger);
        self
    }

    pub fn closes_after(mut self, trigger: Trigger) -> Self {
        self.close_trigger = Some(trigger);
        self
    }

    /// Accepted open commands never move the door.
    pub fn jammed(mut self) -> Self {
        self.open_trigger = None;
        self
    }

    /// Once open, the door stays open.
    pub fn never_closes(mut self) -> Self {
        self.close_trigger = None;
        self
    }

    /// Reject the next `n` open commands.
    pub fn rejecting_opens(self, n: u32) -> Self {
        lock(&self.state).rejections_left = n;
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).reachable = reachable;
    }

    /// Force the door, cancelling any scripted transition.
    pub fn set_door(&self, door: DoorState) {
        let mut st = lock(&self.state);
        st.door = door;
        st.pending_open = None;
        st.pending_close = None;
    }

    pub fn set_sensor(&self, sensor: SensorState) {
        lock(&self.state).sensor = sensor;
    }

    pub fn open_commands(&self) -> u32 {
        lock(&self.state).open_commands
    }

    pub fn door_reads(&self) -> u32 {
        lock(&self.state).door_reads
    }

    fn check(&self, locker: LockerId, st: &LockerSim) -> Result<(), GatewayError> {
        if !st.reachable {
            return Err(GatewayError::Connection("simulated locker offline".into()));
        }
        if locker != self.id {
            return Err(GatewayError::MalformedResponse(format!(
                "status has no entry for locker {locker}"
            )));
        }
        Ok(())
    }
}

impl LockerGateway for SimLocker {
    fn open(&self, locker: LockerId) -> Result<(), GatewayError> {
        let mut guard = lock(&self.state);
        let st = &mut *guard;
        self.check(locker, st)?;
        st.open_commands += 1;
        if st.rejections_left > 0 {
            st.rejections_left -= 1;
            warn!(%locker, "sim: rejecting open command");
            return Err(GatewayError::Rejected("simulated rejection".into()));
        }
        if st.door != DoorState::Open && st.pending_open.is_none() {
            st.pending_open = self.open_trigger.map(Countdown::arm);
        }
        debug!(%locker, "sim: open command accepted");
        Ok(())
    }

    fn door_state(&self, locker: LockerId) -> Result<DoorState, GatewayError> {
        let mut guard = lock(&self.state);
        let st = &mut *guard;
        self.check(locker, st)?;
        st.door_reads += 1;

        if let Some(countdown) = st.pending_open.as_mut() {
            if countdown.tick() {
                st.door = DoorState::Open;
                st.pending_open = None;
                st.pending_close = self.close_trigger.map(Countdown::arm);
            }
        } else if let Some(countdown) = st.pending_close.as_mut() {
            if countdown.tick() {
                st.door = DoorState::Closed;
                st.pending_close = None;
            }
        }
        Ok(st.door)
    }

    fn sensor_state(&self, locker: LockerId) -> Result<SensorState, GatewayError> {
        let st = lock(&self.state);
        self.check(locker, &st)?;
        Ok(st.sensor)
    }

    fn probe(&self) -> bool {
        lock(&self.state).reachable
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRobot
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RobotSim {
    connected: bool,
    joints: Option<JointAngles>,
    moves: Vec<String>,
    stops: u32,
    connect_failures_left: u32,
    connect_calls: u32,
}

/// A simulated six-axis arm.
#[derive(Debug)]
pub struct SimRobot {
    positions: PositionTable,
    move_time: Duration,
    feedback_offset: f64,
    feedback_enabled: bool,
    fail_on: Option<String>,
    connect_attempts: u32,
    reconnect_delay: Duration,
    state: Mutex<RobotSim>,
}

impl SimRobot {
    pub fn new(positions: PositionTable) -> Self {
        Self {
            positions,
            move_time: Duration::ZERO,
            feedback_offset: 0.0,
            feedback_enabled: true,
            fail_on: None,
            connect_attempts: 1,
            reconnect_delay: Duration::ZERO,
            state: Mutex::new(RobotSim::default()),
        }
    }

    /// How long each move blocks.
    pub fn with_move_time(mut self, move_time: Duration) -> Self {
        self.move_time = move_time;
        self
    }

    /// Report feedback `delta` degrees away from every commanded joint.
    pub fn with_feedback_offset(mut self, delta: f64) -> Self {
        self.feedback_offset = delta;
        self
    }

    pub fn without_feedback(mut self) -> Self {
        self.feedback_enabled = false;
        self
    }

    /// The driver rejects every move to `position`.
    pub fn failing_on(mut self, position: impl Into<String>) -> Self {
        self.fail_on = Some(position.into());
        self
    }

    /// Each `connect()` call tries up to `attempts` times, sleeping `delay`
    /// between tries.
    pub fn with_connect_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.reconnect_delay = delay;
        self
    }

    /// The next `n` connection attempts fail.
    pub fn with_connect_failures(self, n: u32) -> Self {
        lock(&self.state).connect_failures_left = n;
        self
    }

    /// Start with an established session.
    pub fn connected(self) -> Self {
        lock(&self.state).connected = true;
        self
    }

    /// Drop the session as if the controller rebooted.
    pub fn disconnect(&self) {
        lock(&self.state).connected = false;
    }

    /// Names of every completed move, in order.
    pub fn moves(&self) -> Vec<String> {
        lock(&self.state).moves.clone()
    }

    pub fn stop_count(&self) -> u32 {
        lock(&self.state).stops
    }

    pub fn connect_calls(&self) -> u32 {
        lock(&self.state).connect_calls
    }

    fn try_connect(&self) -> bool {
        let mut st = lock(&self.state);
        if st.connect_failures_left > 0 {
            st.connect_failures_left -= 1;
            false
        } else {
            st.connected = true;
            true
        }
    }
}

impl RobotGateway for SimRobot {
    fn connect(&self) -> Result<(), GatewayError> {
        lock(&self.state).connect_calls += 1;
        for attempt in 1..=self.connect_attempts {
            if self.try_connect() {
                info!(attempt, "sim: robot connected");
                return Ok(());
            }
            warn!(attempt, max = self.connect_attempts, "sim: robot connection failed");
            if attempt < self.connect_attempts {
                thread::sleep(self.reconnect_delay);
            }
        }
        Err(GatewayError::Connection(format!(
            "robot unreachable after {} attempts",
            self.connect_attempts
        )))
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn move_to(&self, position: &str) -> Result<(), GatewayError> {
        let target = self.positions.resolve(position)?;
        if !self.is_connected() {
            return Err(GatewayError::Connection("robot not connected".into()));
        }
        if self.fail_on.as_deref() == Some(position) {
            return Err(GatewayError::Rejected(format!(
                "driver refused move to '{position}'"
            )));
        }

        // The lock is released while "moving" so stop() stays callable.
        thread::sleep(self.move_time);

        let mut st = lock(&self.state);
        st.joints = Some(target.offset(self.feedback_offset));
        st.moves.push(position.to_string());
        debug!(position, "sim: move complete");
        Ok(())
    }

    fn feedback(&self) -> Option<JointAngles> {
        if !self.feedback_enabled {
            return None;
        }
        let st = lock(&self.state);
        if st.connected { st.joints.clone() } else { None }
    }

    fn stop(&self) -> Result<(), GatewayError> {
        lock(&self.state).stops += 1;
        info!("sim: emergency stop");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: LockerId = LockerId(1);

    #[test]
    fn default_locker_opens_then_closes() {
        let locker = SimLocker::new(ID);
        assert_eq!(locker.door_state(ID).unwrap(), DoorState::Closed);
        locker.open(ID).unwrap();
        assert_eq!(locker.door_state(ID).unwrap(), DoorState::Open);
        assert_eq!(locker.door_state(ID).unwrap(), DoorState::Open);
        assert_eq!(locker.door_state(ID).unwrap(), DoorState::Closed);
        assert_eq!(locker.open_commands(), 1);
        assert_eq!(locker.door_reads(), 4);
    }

    #[test]
    fn jammed_locker_stays_closed() {
        let locker = SimLocker::new(ID).jammed();
        locker.open(ID).unwrap();
        for _ in 0..5 {
            assert_eq!(locker.door_state(ID).unwrap(), DoorState::Closed);
        }
    }

    #[test]
    fn rejections_are_counted_as_commands() {
        let locker = SimLocker::new(ID).rejecting_opens(2);
        assert!(matches!(locker.open(ID), Err(GatewayError::Rejected(_))));
        assert!(matches!(locker.open(ID), Err(GatewayError::Rejected(_))));
        locker.open(ID).unwrap();
        assert_eq!(locker.open_commands(), 3);
    }

    #[test]
    fn timed_trigger_waits_for_deadline() {
        let locker = SimLocker::new(ID).opens_after(Trigger::After(Duration::from_millis(30)));
        locker.open(ID).unwrap();
        assert_eq!(locker.door_state(ID).unwrap(), DoorState::Closed);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(locker.door_state(ID).unwrap(), DoorState::Open);
    }

    #[test]
    fn offline_locker_reports_connection_error() {
        let locker = SimLocker::new(ID);
        locker.set_reachable(false);
        assert!(!locker.probe());
        assert!(matches!(
            locker.door_state(ID),
            Err(GatewayError::Connection(_))
        ));
        assert!(matches!(locker.open(ID), Err(GatewayError::Connection(_))));
    }

    #[test]
    fn unknown_compartment_is_malformed() {
        let locker = SimLocker::new(ID);
        assert!(matches!(
            locker.door_state(LockerId(4)),
            Err(GatewayError::MalformedResponse(_))
        ));
    }

    #[test]
    fn robot_moves_and_reports_feedback() {
        let table = PositionTable::default();
        let robot = SimRobot::new(table.clone());
        robot.connect().unwrap();
        robot.move_to("position_1").unwrap();
        assert_eq!(robot.feedback().as_ref(), table.get("position_1"));
        assert_eq!(robot.moves(), vec!["position_1".to_string()]);
    }

    #[test]
    fn robot_requires_connection_before_moving() {
        let robot = SimRobot::new(PositionTable::default());
        assert!(matches!(
            robot.move_to("home"),
            Err(GatewayError::Connection(_))
        ));
    }

    #[test]
    fn robot_connect_policy_retries_internally() {
        let robot = SimRobot::new(PositionTable::default())
            .with_connect_failures(2)
            .with_connect_policy(3, Duration::ZERO);
        robot.connect().unwrap();
        assert!(robot.is_connected());
        assert_eq!(robot.connect_calls(), 1);
    }

    #[test]
    fn robot_connect_gives_up_after_policy() {
        let robot = SimRobot::new(PositionTable::default())
            .with_connect_failures(5)
            .with_connect_policy(2, Duration::ZERO);
        assert!(matches!(robot.connect(), Err(GatewayError::Connection(_))));
        assert!(!robot.is_connected());
    }

    #[test]
    fn robot_failing_position_is_rejected() {
        let robot = SimRobot::new(PositionTable::default())
            .connected()
            .failing_on("position_1");
        robot.move_to("home").unwrap();
        assert!(matches!(
            robot.move_to("position_1"),
            Err(GatewayError::Rejected(_))
        ));
        assert_eq!(robot.moves(), vec!["home".to_string()]);
    }

    #[test]
    fn robot_stop_is_recorded() {
        let robot = SimRobot::new(PositionTable::default());
        robot.stop().unwrap();
        robot.stop().unwrap();
        assert_eq!(robot.stop_count(), 2);
    }
}
