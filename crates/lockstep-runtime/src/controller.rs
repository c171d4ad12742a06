//! [`CycleController`] – the locker ⇄ robot hand-off state machine.
//!
//! Each cycle walks the phases in order:
//!
//! 1. **CheckInitialState** – the compartment must read `Closed`.
//! 2. **CheckConnection** – probe the locker and connect the robot; blocks
//!    (with `reconnect_delay` between probes) until both are reachable.
//! 3. **OpenLocker** – up to `max_open_retries` open commands.
//! 4. **VerifyOpen** – poll until the door reads `Open` or `open_timeout`.
//! 5. **RobotSequence** – re-read the door through the
//!    [`MotionInterlock`], then run the routine move by move, checking each
//!    arrival with the [`ToleranceVerifier`].
//! 6. **VerifyClose** – poll until the door reads `Closed` or
//!    `close_timeout`.  A timeout here is critical: cycling halts until an
//!    operator acknowledges it through the [`ControllerHandle`].
//!
//! Only OpenLocker and connectivity probing retry.  Verification phases never
//! do; a failed cycle is followed by a fresh one after `settle_delay`.
//!
//! Shutdown is checked at every phase boundary up to RobotSequence.  Once
//! motion has started the cycle always runs through VerifyClose.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use lockstep_hal::{LockerGateway, RobotGateway};
use lockstep_kernel::{DoorRequirement, MotionInterlock, MotionPermit, ToleranceVerifier};
use lockstep_middleware::{SnapshotReader, StatusBroadcaster};
use lockstep_types::{
    CriticalAlert, Cycle, CycleError, DoorState, GatewayError, HISTORY_LEN, Outcome, Phase,
    RobotState, SensorState, Snapshot, Statistics,
};
use tracing::{debug, error, info, info_span, warn};

use crate::config::{ControllerConfig, ControllerError};
use crate::ledger::{CycleLedger, FinalSummary};
use crate::signals::ControllerHandle;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// CycleController
// ─────────────────────────────────────────────────────────────────────────────

pub struct CycleController {
    config: ControllerConfig,
    locker: Arc<dyn LockerGateway>,
    robot: Arc<dyn RobotGateway>,
    broadcaster: StatusBroadcaster,
    handle: ControllerHandle,
    interlock: MotionInterlock,
    verifier: ToleranceVerifier,
    ledger: CycleLedger,
    /// Live cycle; `cycle_number == 0` until the first cycle starts.
    current: Cycle,
    running: bool,
    locker_connected: bool,
    robot_connected: bool,
    critical: Option<CriticalAlert>,
}

impl CycleController {
    /// Validate `config` and wire the controller to its gateways.
    pub fn new(
        config: ControllerConfig,
        locker: Arc<dyn LockerGateway>,
        robot: Arc<dyn RobotGateway>,
        broadcaster: StatusBroadcaster,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self {
            interlock: MotionInterlock::new(config.locker),
            verifier: ToleranceVerifier::new(config.joint_tolerance_deg),
            config,
            locker,
            robot,
            broadcaster,
            handle: ControllerHandle::new(),
            ledger: CycleLedger::new(HISTORY_LEN),
            current: Cycle::new(0),
            running: false,
            locker_connected: false,
            robot_connected: false,
            critical: None,
        })
    }

    /// Control handle for other threads (shutdown, acknowledge).
    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    pub fn reader(&self) -> SnapshotReader {
        self.broadcaster.reader()
    }

    pub fn request_shutdown(&self) {
        self.handle.request_shutdown();
    }

    pub fn statistics(&self) -> &Statistics {
        self.ledger.statistics()
    }

    /// Run cycles back to back until shutdown is requested, then return the
    /// final statistics.  A critical cycle parks the loop until the halt is
    /// acknowledged.
    pub fn run_forever(&mut self) -> FinalSummary {
        self.running = true;
        info!(
            locker = %self.config.locker,
            routine = ?self.config.routine,
            "cycle controller started"
        );
        self.publish();

        while !self.handle.is_shutdown_requested() {
            match self.run_cycle() {
                Outcome::Critical => {
                    if !self.hold_for_acknowledgement() {
                        break;
                    }
                }
                Outcome::Failed => {
                    debug!(settle_ms = millis(self.config.settle_delay), "settling");
                    if !self.handle.sleep(self.config.settle_delay) {
                        break;
                    }
                }
                Outcome::Success | Outcome::Pending => {}
            }
        }

        self.running = false;
        self.publish();
        let summary = self.ledger.summary(Utc::now());
        info!(
            total = summary.total_cycles,
            success = summary.success_count,
            failed = summary.failed_count,
            critical = summary.critical_count,
            success_rate = summary.success_rate,
            "cycle controller stopped"
        );
        summary
    }

    /// Execute exactly one cycle and record its outcome.
    pub fn run_cycle(&mut self) -> Outcome {
        let number = self.current.cycle_number + 1;
        let span = info_span!("cycle", cycle = number);
        let _entered = span.enter();

        self.current = Cycle::new(number);
        info!("cycle started");
        self.publish();

        let result = self.execute();
        self.conclude(result)
    }

    // ── phases ──────────────────────────────────────────────────────────────

    fn execute(&mut self) -> Result<(), CycleError> {
        self.check_initial_state()?;

        self.enter(Phase::CheckConnection)?;
        self.ensure_connected()?;

        self.enter(Phase::OpenLocker)?;
        self.open_locker()?;

        self.enter(Phase::VerifyOpen)?;
        self.verify_open()?;

        self.enter(Phase::RobotSequence)?;
        let door = self.read_door();
        let permit = self.interlock.permit(door)?;
        let motion = self.run_routine(permit);

        // The close is verified even after a motion error; a close timeout
        // outranks it.
        self.advance(Phase::VerifyClose);
        let closed = self.verify_close();
        closed.and(motion)
    }

    fn check_initial_state(&mut self) -> Result<(), CycleError> {
        info!(phase = %Phase::CheckInitialState, "entering phase");
        let door = self.read_door();
        self.current.occupancy = self.read_sensor();
        DoorRequirement::INITIAL_CLOSED.check(door)?;
        info!(occupancy = %self.current.occupancy, "locker confirmed closed");
        Ok(())
    }

    fn ensure_connected(&mut self) -> Result<(), CycleError> {
        loop {
            self.locker_connected = self.locker.probe();
            self.robot_connected = self.robot.is_connected()
                || match self.robot.connect() {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "robot connection failed");
                        false
                    }
                };
            if self.robot_connected {
                self.current.robot_state = RobotState::Ready;
            }
            self.publish();

            if self.locker_connected && self.robot_connected {
                info!("locker and robot reachable");
                return Ok(());
            }

            warn!(
                locker = self.locker_connected,
                robot = self.robot_connected,
                retry_in_ms = millis(self.config.reconnect_delay),
                "waiting for connectivity"
            );
            if !self.handle.sleep(self.config.reconnect_delay) {
                return Err(CycleError::Interrupted {
                    phase: Phase::CheckConnection,
                });
            }
        }
    }

    fn open_locker(&mut self) -> Result<(), CycleError> {
        let max = self.config.max_open_retries;
        let mut last_error = None;

        for attempt in 1..=max {
            self.current.open_attempts = attempt;
            match self.locker.open(self.config.locker) {
                Ok(()) => {
                    info!(attempt, "open command accepted");
                    self.publish();
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max, error = %e, "open command failed");
                    self.note_locker_error(&e);
                    last_error = Some(e);
                    if attempt < max && !self.handle.sleep(self.config.retry_delay) {
                        return Err(CycleError::Interrupted {
                            phase: Phase::OpenLocker,
                        });
                    }
                }
            }
        }

        let details = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(CycleError::Connection {
            component: "locker".into(),
            details: format!("open command failed after {max} attempts: {details}"),
        })
    }

    fn verify_open(&mut self) -> Result<(), CycleError> {
        let timeout = self.config.open_timeout;
        let started = Instant::now();
        match self.poll_door(DoorState::Open, timeout) {
            Ok(()) => {
                info!(elapsed_ms = millis(started.elapsed()), "locker confirmed open");
                Ok(())
            }
            Err(last_observed) => Err(CycleError::Timeout {
                phase: Phase::VerifyOpen,
                expected: DoorState::Open,
                last_observed,
                waited_ms: millis(timeout),
            }),
        }
    }

    fn run_routine(&mut self, permit: MotionPermit) -> Result<(), CycleError> {
        debug!(locker = %permit.locker(), "motion permitted");
        let routine = self.config.routine.clone();

        for position in &routine {
            self.current.robot_state = RobotState::Moving;
            self.publish();
            info!(position = %position, "moving");

            let started = Instant::now();
            if let Err(e) = self.robot.move_to(position) {
                if matches!(e, GatewayError::Connection(_)) {
                    self.robot_connected = false;
                }
                self.abort_motion();
                return Err(CycleError::Motion {
                    position: position.clone(),
                    details: e.to_string(),
                });
            }

            let measured = self.robot.feedback();
            let arrival = self
                .config
                .positions
                .resolve(position)
                .map_err(|e| CycleError::Motion {
                    position: position.clone(),
                    details: e.to_string(),
                })
                .and_then(|target| {
                    self.verifier.verify(
                        position,
                        target.as_slice(),
                        measured.as_ref().map(|m| m.as_slice()),
                    )
                });
            if let Err(e) = arrival {
                self.abort_motion();
                return Err(e);
            }

            self.current.robot_position = Some(position.clone());
            info!(
                position = %position,
                elapsed_ms = millis(started.elapsed()),
                "position reached"
            );
        }

        self.current.robot_state = RobotState::Completed;
        info!("routine completed");
        Ok(())
    }

    fn verify_close(&mut self) -> Result<(), CycleError> {
        info!(phase = %Phase::VerifyClose, "entering phase");
        let timeout = self.config.close_timeout;
        let started = Instant::now();
        match self.poll_door(DoorState::Closed, timeout) {
            Ok(()) => {
                self.current.occupancy = self.read_sensor();
                info!(
                    elapsed_ms = millis(started.elapsed()),
                    occupancy = %self.current.occupancy,
                    "locker confirmed closed"
                );
                Ok(())
            }
            Err(last_observed) => {
                error!(
                    %last_observed,
                    waited_ms = millis(timeout),
                    "locker did not close; physical inspection required"
                );
                Err(CycleError::Critical {
                    locker: self.config.locker,
                    waited_ms: millis(timeout),
                })
            }
        }
    }

    // ── helpers ─────────────────────────────────────────────────────────────

    /// Phase boundary: honour shutdown, then move forward and publish.
    fn enter(&mut self, phase: Phase) -> Result<(), CycleError> {
        if self.handle.is_shutdown_requested() {
            info!(%phase, "shutdown requested; abandoning cycle");
            return Err(CycleError::Interrupted { phase });
        }
        self.advance(phase);
        info!(%phase, "entering phase");
        Ok(())
    }

    fn advance(&mut self, phase: Phase) {
        if self.current.advance(phase) {
            self.publish();
        }
    }

    /// Poll until the door reads `expected`.  On timeout returns the last
    /// observed state.
    fn poll_door(&mut self, expected: DoorState, timeout: Duration) -> Result<(), DoorState> {
        let started = Instant::now();
        loop {
            let observed = self.read_door();
            debug!(%observed, %expected, "door poll");
            if observed == expected {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(observed);
            }
            thread::sleep(self.config.poll_interval.min(timeout - elapsed));
        }
    }

    /// Door read with transport failures folded into `Unknown`.
    fn read_door(&mut self) -> DoorState {
        let state = match self.locker.door_state(self.config.locker) {
            Ok(state) => {
                self.locker_connected = true;
                state
            }
            Err(e) => {
                warn!(error = %e, "door state unavailable");
                self.note_locker_error(&e);
                DoorState::Unknown
            }
        };
        if state != self.current.locker_state {
            self.current.locker_state = state;
            self.publish();
        }
        state
    }

    fn read_sensor(&mut self) -> SensorState {
        match self.locker.sensor_state(self.config.locker) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "sensor state unavailable");
                self.note_locker_error(&e);
                SensorState::Unknown
            }
        }
    }

    fn note_locker_error(&mut self, err: &GatewayError) {
        if matches!(err, GatewayError::Connection(_)) {
            self.locker_connected = false;
        }
    }

    fn abort_motion(&mut self) {
        self.current.robot_state = RobotState::Faulted;
        warn!("aborting routine; stopping robot");
        if let Err(e) = self.robot.stop() {
            error!(error = %e, "emergency stop failed");
        }
        self.publish();
    }

    fn conclude(&mut self, result: Result<(), CycleError>) -> Outcome {
        self.current.finish(result.as_ref().map(|_| ()));
        let duration_ms = self.current.duration().map_or(0, millis);
        let phase = self.current.phase;

        match &result {
            Ok(()) => info!(%phase, duration_ms, "cycle completed"),
            Err(e @ CycleError::Critical { .. }) => {
                error!(%phase, class = %e.class(), duration_ms, error = %e, "cycle critical");
                self.critical = Some(CriticalAlert {
                    cycle_number: self.current.cycle_number,
                    locker: self.config.locker,
                    message: e.to_string(),
                    raised_at: Utc::now(),
                });
                self.handle.set_halted();
            }
            Err(e) => warn!(%phase, class = %e.class(), duration_ms, error = %e, "cycle failed"),
        }

        self.ledger.record(self.current.clone());
        let stats = self.ledger.statistics();
        info!(
            success = stats.success_count,
            failed = stats.failed_count,
            critical = stats.critical_count,
            "statistics"
        );
        self.publish();
        self.current.outcome
    }

    /// Park until acknowledged.  Returns `false` on shutdown.
    fn hold_for_acknowledgement(&mut self) -> bool {
        error!("automatic cycling halted; awaiting operator acknowledgement");
        if !self.handle.wait_for_acknowledgement() {
            return false;
        }
        info!("critical condition acknowledged; resuming");
        self.critical = None;
        self.publish();
        true
    }

    fn publish(&self) {
        self.broadcaster.publish(Snapshot {
            running: self.running,
            halted: self.critical.is_some(),
            current: (self.current.cycle_number > 0).then(|| self.current.clone()),
            statistics: self.ledger.statistics().clone(),
            recent_cycles: self.ledger.recent(),
            locker_connected: self.locker_connected,
            robot_connected: self.robot_connected,
            critical: self.critical.clone(),
            published_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use lockstep_hal::PositionTable;
    use lockstep_hal::sim::{SimLocker, SimRobot, Trigger};
    use lockstep_types::{ErrorClass, LockerId};

    use super::*;

    const LOCKER: LockerId = LockerId(1);

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            retry_delay: Duration::from_millis(1),
            open_timeout: Duration::from_millis(60),
            close_timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(5),
            settle_delay: Duration::from_millis(5),
            reconnect_delay: Duration::from_millis(5),
            ..ControllerConfig::default()
        }
    }

    fn robot() -> SimRobot {
        SimRobot::new(PositionTable::default()).connected()
    }

    fn make_controller(
        locker: SimLocker,
        robot: SimRobot,
    ) -> (CycleController, Arc<SimLocker>, Arc<SimRobot>) {
        let locker = Arc::new(locker);
        let robot = Arc::new(robot);
        let controller = CycleController::new(
            fast_config(),
            locker.clone(),
            robot.clone(),
            StatusBroadcaster::new(),
        )
        .unwrap();
        (controller, locker, robot)
    }

    fn wait_until(reader: &SnapshotReader, what: &str, pred: impl Fn(&Snapshot) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !pred(reader.latest().as_ref()) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn error_class(snapshot: &Snapshot) -> Option<ErrorClass> {
        snapshot
            .current
            .as_ref()
            .and_then(|c| c.error.as_ref())
            .map(|e| e.class)
    }

    #[test]
    fn full_cycle_succeeds() {
        let (mut controller, locker, robot) =
            make_controller(SimLocker::new(LOCKER), robot());

        assert_eq!(controller.run_cycle(), Outcome::Success);
        assert_eq!(robot.moves(), vec!["home", "position_1", "home"]);
        assert_eq!(locker.open_commands(), 1);

        let snapshot = controller.reader().latest();
        let cycle = snapshot.current.as_ref().unwrap();
        assert_eq!(cycle.cycle_number, 1);
        assert_eq!(cycle.phase, Phase::Complete);
        assert_eq!(cycle.locker_state, DoorState::Closed);
        assert_eq!(cycle.robot_state, RobotState::Completed);
        assert_eq!(cycle.robot_position.as_deref(), Some("home"));
        assert_eq!(cycle.occupancy, SensorState::Empty);
        assert!(cycle.error.is_none());
        assert!(cycle.duration().is_some());
        assert_eq!(snapshot.statistics.success_count, 1);
        assert!(snapshot.locker_connected && snapshot.robot_connected);
    }

    #[test]
    fn published_phases_never_regress_within_a_cycle() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let robot = robot().with_move_time(Duration::from_millis(10));
        let (mut controller, _locker, _robot) = make_controller(SimLocker::new(LOCKER), robot);
        let reader = controller.reader();
        let done = Arc::new(AtomicBool::new(false));

        let sampler = {
            let done = done.clone();
            thread::spawn(move || {
                let mut seen: Vec<(u64, Phase)> = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    if let Some(cycle) = reader.latest().current.as_ref() {
                        let entry = (cycle.cycle_number, cycle.phase);
                        if seen.last() != Some(&entry) {
                            seen.push(entry);
                        }
                    }
                }
                if let Some(cycle) = reader.latest().current.as_ref() {
                    seen.push((cycle.cycle_number, cycle.phase));
                }
                seen
            })
        };

        assert_eq!(controller.run_cycle(), Outcome::Success);
        assert_eq!(controller.run_cycle(), Outcome::Success);
        done.store(true, Ordering::SeqCst);
        let seen = sampler.join().unwrap();

        for pair in seen.windows(2) {
            let ((prev_cycle, prev_phase), (cycle, phase)) = (pair[0], pair[1]);
            assert!(cycle >= prev_cycle, "cycle number went back: {seen:?}");
            if cycle == prev_cycle {
                assert!(phase >= prev_phase, "phase regressed in cycle {cycle}: {seen:?}");
            }
        }
        assert!(seen.contains(&(1, Phase::RobotSequence)));
        assert_eq!(seen.last(), Some(&(2, Phase::Complete)));
    }

    #[test]
    fn open_door_at_start_fails_without_commands() {
        let (mut controller, locker, robot) = make_controller(
            SimLocker::new(LOCKER).with_door(DoorState::Open),
            robot(),
        );

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        assert_eq!(locker.open_commands(), 0);
        assert!(robot.moves().is_empty());

        let snapshot = controller.reader().latest();
        let cycle = snapshot.current.as_ref().unwrap();
        assert_eq!(cycle.phase, Phase::CheckInitialState);
        assert!(cycle.error.as_ref().unwrap().message.contains("unsafe initial state"));
        assert_eq!(error_class(&snapshot), Some(ErrorClass::UnsafeState));
    }

    #[test]
    fn unreachable_locker_reads_unknown_and_fails_initial_check() {
        let locker = SimLocker::new(LOCKER);
        locker.set_reachable(false);
        let (mut controller, locker, _robot) = make_controller(locker, robot());

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        let snapshot = controller.reader().latest();
        assert_eq!(
            snapshot.current.as_ref().unwrap().locker_state,
            DoorState::Unknown
        );
        assert!(!snapshot.locker_connected);
        assert_eq!(locker.open_commands(), 0);
    }

    #[test]
    fn door_that_never_opens_times_out_after_all_commands() {
        let (mut controller, locker, robot) = make_controller(
            SimLocker::new(LOCKER).jammed().rejecting_opens(2),
            robot(),
        );

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        assert_eq!(locker.open_commands(), 3);
        assert!(robot.moves().is_empty());

        let snapshot = controller.reader().latest();
        let cycle = snapshot.current.as_ref().unwrap();
        assert_eq!(cycle.phase, Phase::VerifyOpen);
        assert_eq!(cycle.open_attempts, 3);
        let error = cycle.error.as_ref().unwrap();
        assert_eq!(error.class, ErrorClass::Timeout);
        assert!(error.message.contains("timed out"));
        assert!(error.message.contains("Closed"));
        assert!(snapshot.critical.is_none());
        assert!(!controller.handle().is_halted());
    }

    #[test]
    fn open_attempts_are_capped() {
        let (mut controller, locker, _robot) = make_controller(
            SimLocker::new(LOCKER).rejecting_opens(10),
            robot(),
        );

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        assert_eq!(locker.open_commands(), 3);
        let snapshot = controller.reader().latest();
        assert_eq!(error_class(&snapshot), Some(ErrorClass::Connection));
        assert_eq!(snapshot.statistics.critical_count, 0);
    }

    #[test]
    fn shutdown_interrupts_open_retry_wait() {
        let locker = Arc::new(SimLocker::new(LOCKER).rejecting_opens(10));
        let config = ControllerConfig {
            retry_delay: Duration::from_secs(30),
            ..fast_config()
        };
        let mut controller = CycleController::new(
            config,
            locker.clone(),
            Arc::new(robot()),
            StatusBroadcaster::new(),
        )
        .unwrap();

        let handle = controller.handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.request_shutdown();
        });

        let started = Instant::now();
        assert_eq!(controller.run_cycle(), Outcome::Failed);
        stopper.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(locker.open_commands(), 1);
        let snapshot = controller.reader().latest();
        assert_eq!(error_class(&snapshot), Some(ErrorClass::Interrupted));
        assert_eq!(snapshot.current.as_ref().unwrap().phase, Phase::OpenLocker);
    }

    #[test]
    fn door_that_never_closes_is_critical() {
        let (mut controller, _locker, robot) =
            make_controller(SimLocker::new(LOCKER).never_closes(), robot());

        assert_eq!(controller.run_cycle(), Outcome::Critical);
        assert_eq!(robot.moves().len(), 3);

        let snapshot = controller.reader().latest();
        assert!(snapshot.halted);
        let alert = snapshot.critical.as_ref().unwrap();
        assert_eq!(alert.cycle_number, 1);
        assert!(alert.message.contains("physical inspection required"));
        assert_eq!(snapshot.statistics.critical_count, 1);
        assert_eq!(snapshot.statistics.failed_count, 1);
        assert!(controller.handle().is_halted());
    }

    #[test]
    fn door_closed_before_motion_blocks_the_robot() {
        let (mut controller, _locker, robot) = make_controller(
            SimLocker::new(LOCKER).closes_after(Trigger::Reads(0)),
            robot(),
        );

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        assert!(robot.moves().is_empty());
        assert_eq!(robot.stop_count(), 0);

        let snapshot = controller.reader().latest();
        let cycle = snapshot.current.as_ref().unwrap();
        assert_eq!(cycle.phase, Phase::RobotSequence);
        assert_eq!(error_class(&snapshot), Some(ErrorClass::UnsafeState));
    }

    #[test]
    fn rejected_move_aborts_routine_and_stops_robot() {
        let (mut controller, _locker, robot) = make_controller(
            SimLocker::new(LOCKER),
            robot().failing_on("position_1"),
        );

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        assert_eq!(robot.moves(), vec!["home"]);
        assert_eq!(robot.stop_count(), 1);

        let snapshot = controller.reader().latest();
        let cycle = snapshot.current.as_ref().unwrap();
        assert_eq!(cycle.robot_state, RobotState::Faulted);
        assert_eq!(cycle.robot_position.as_deref(), Some("home"));
        // The door was still verified closed after the abort.
        assert_eq!(cycle.locker_state, DoorState::Closed);
        assert_eq!(error_class(&snapshot), Some(ErrorClass::Motion));
    }

    #[test]
    fn out_of_tolerance_feedback_is_a_motion_error() {
        let (mut controller, _locker, robot) = make_controller(
            SimLocker::new(LOCKER),
            robot().with_feedback_offset(2.5),
        );

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        assert_eq!(robot.moves(), vec!["home"]);
        assert_eq!(robot.stop_count(), 1);
        let snapshot = controller.reader().latest();
        assert_eq!(error_class(&snapshot), Some(ErrorClass::Motion));
    }

    #[test]
    fn small_feedback_offset_is_tolerated() {
        let (mut controller, _locker, _robot) = make_controller(
            SimLocker::new(LOCKER),
            robot().with_feedback_offset(1.5),
        );
        assert_eq!(controller.run_cycle(), Outcome::Success);
    }

    #[test]
    fn missing_feedback_is_a_motion_error() {
        let (mut controller, _locker, _robot) =
            make_controller(SimLocker::new(LOCKER), robot().without_feedback());
        assert_eq!(controller.run_cycle(), Outcome::Failed);
        let snapshot = controller.reader().latest();
        assert_eq!(error_class(&snapshot), Some(ErrorClass::Motion));
    }

    #[test]
    fn connection_phase_waits_for_robot() {
        let robot = SimRobot::new(PositionTable::default()).with_connect_failures(2);
        let (mut controller, _locker, robot) = make_controller(SimLocker::new(LOCKER), robot);

        assert_eq!(controller.run_cycle(), Outcome::Success);
        assert_eq!(robot.connect_calls(), 3);
    }

    #[test]
    fn shutdown_interrupts_reconnect_wait() {
        let robot = SimRobot::new(PositionTable::default()).with_connect_failures(u32::MAX);
        let (mut controller, locker, _robot) = make_controller(SimLocker::new(LOCKER), robot);

        let handle = controller.handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.request_shutdown();
        });

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        stopper.join().unwrap();
        assert_eq!(locker.open_commands(), 0);
        let snapshot = controller.reader().latest();
        assert_eq!(error_class(&snapshot), Some(ErrorClass::Interrupted));
    }

    #[test]
    fn shutdown_is_honoured_at_phase_boundary() {
        let (mut controller, locker, _robot) = make_controller(SimLocker::new(LOCKER), robot());
        controller.request_shutdown();

        assert_eq!(controller.run_cycle(), Outcome::Failed);
        assert_eq!(locker.open_commands(), 0);
        let snapshot = controller.reader().latest();
        let cycle = snapshot.current.as_ref().unwrap();
        assert_eq!(cycle.phase, Phase::CheckInitialState);
        assert_eq!(error_class(&snapshot), Some(ErrorClass::Interrupted));
    }

    #[test]
    fn statistics_balance_and_history_is_bounded() {
        let (mut controller, locker, _robot) = make_controller(SimLocker::new(LOCKER), robot());

        for _ in 0..6 {
            assert_eq!(controller.run_cycle(), Outcome::Success);
        }
        locker.set_door(DoorState::Open);
        for _ in 0..6 {
            assert_eq!(controller.run_cycle(), Outcome::Failed);
        }

        let stats = controller.statistics();
        assert_eq!(stats.total_cycles, 12);
        assert_eq!(stats.total_cycles, stats.success_count + stats.failed_count);

        let snapshot = controller.reader().latest();
        assert_eq!(snapshot.recent_cycles.len(), HISTORY_LEN);
        assert_eq!(snapshot.recent_cycles[0].cycle_number, 3);
        assert_eq!(snapshot.recent_cycles[9].cycle_number, 12);
        assert!(snapshot.recent_cycles.iter().all(|c| c.outcome.is_finished()));
    }

    #[test]
    fn cycle_numbers_are_never_reused() {
        let (mut controller, _locker, _robot) = make_controller(SimLocker::new(LOCKER), robot());
        controller.run_cycle();
        controller.run_cycle();
        let snapshot = controller.reader().latest();
        let numbers: Vec<u64> = snapshot.recent_cycles.iter().map(|c| c.cycle_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn run_forever_stops_on_shutdown_with_summary() {
        let (mut controller, _locker, _robot) = make_controller(SimLocker::new(LOCKER), robot());
        let reader = controller.reader();
        let handle = controller.handle();

        let worker = thread::spawn(move || controller.run_forever());
        wait_until(&reader, "two cycles", |s| s.statistics.total_cycles >= 2);
        assert!(reader.latest().running);
        handle.request_shutdown();

        let summary = worker.join().unwrap();
        assert!(summary.total_cycles >= 2);
        assert_eq!(
            summary.total_cycles,
            summary.success_count + summary.failed_count
        );
        assert!(!reader.latest().running);
    }

    #[test]
    fn critical_halt_persists_until_acknowledged() {
        let (mut controller, locker, _robot) =
            make_controller(SimLocker::new(LOCKER).never_closes(), robot());
        let reader = controller.reader();
        let handle = controller.handle();

        let worker = thread::spawn(move || controller.run_forever());
        wait_until(&reader, "critical halt", |s| s.halted);

        thread::sleep(Duration::from_millis(50));
        let snapshot = reader.latest();
        assert_eq!(snapshot.statistics.total_cycles, 1);
        assert!(snapshot.critical.is_some());
        assert!(snapshot.running);

        // Operator closes the door and acknowledges.
        locker.set_door(DoorState::Closed);
        assert!(handle.acknowledge_critical());
        wait_until(&reader, "alert cleared", |s| s.critical.is_none());
        wait_until(&reader, "next cycle", |s| s.statistics.total_cycles >= 2);

        handle.request_shutdown();
        let summary = worker.join().unwrap();
        assert!(summary.critical_count >= 1);
    }

    #[test]
    fn shutdown_while_halted_keeps_alert_visible() {
        let (mut controller, _locker, _robot) =
            make_controller(SimLocker::new(LOCKER).never_closes(), robot());
        let reader = controller.reader();
        let handle = controller.handle();

        let worker = thread::spawn(move || controller.run_forever());
        wait_until(&reader, "critical halt", |s| s.halted);
        handle.request_shutdown();

        let summary = worker.join().unwrap();
        assert_eq!(summary.critical_count, 1);
        let snapshot = reader.latest();
        assert!(!snapshot.running);
        assert!(snapshot.critical.is_some());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ControllerConfig {
            routine: vec!["nowhere".into()],
            ..fast_config()
        };
        let result = CycleController::new(
            config,
            Arc::new(SimLocker::new(LOCKER)),
            Arc::new(robot()),
            StatusBroadcaster::new(),
        );
        assert!(matches!(result, Err(ControllerError::UnknownPosition(_))));
    }
}
