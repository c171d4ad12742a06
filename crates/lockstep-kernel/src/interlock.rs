//! Door-state preconditions.
//!
//! A cycle may only start with the compartment `Closed`, and the robot may
//! only move while it is `Open`.  The second rule is enforced by type: the
//! routine executor takes a [`MotionPermit`], and the only way to obtain one
//! is [`MotionInterlock::permit`] with a fresh door read of `Open`.

use lockstep_types::{CycleError, DoorState, LockerId, Phase};
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// DoorRequirement
// ────────────────────────────────────────────────────────────────────────────

/// A door state that must hold at a given phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorRequirement {
    pub phase: Phase,
    pub expected: DoorState,
}

impl DoorRequirement {
    /// The compartment must be closed before a cycle touches it.
    pub const INITIAL_CLOSED: Self = Self {
        phase: Phase::CheckInitialState,
        expected: DoorState::Closed,
    };

    /// The compartment must be open immediately before motion.
    pub const OPEN_FOR_MOTION: Self = Self {
        phase: Phase::RobotSequence,
        expected: DoorState::Open,
    };

    /// `Ok` only for an exact match; `Unknown` never satisfies a requirement.
    ///
    /// ```
    /// use lockstep_kernel::DoorRequirement;
    /// use lockstep_types::DoorState;
    ///
    /// let req = DoorRequirement::INITIAL_CLOSED;
    /// assert!(req.check(DoorState::Closed).is_ok());
    /// assert!(req.check(DoorState::Unknown).is_err());
    /// ```
    pub fn check(&self, observed: DoorState) -> Result<(), CycleError> {
        if observed == self.expected {
            Ok(())
        } else {
            Err(CycleError::UnsafeState {
                phase: self.phase,
                observed,
                expected: self.expected,
            })
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MotionInterlock
// ────────────────────────────────────────────────────────────────────────────

/// Proof that the door read immediately before motion was `Open`.
///
/// Not `Clone`: a permit is consumed by exactly one routine run.
#[derive(Debug)]
pub struct MotionPermit {
    locker: LockerId,
}

impl MotionPermit {
    pub fn locker(&self) -> LockerId {
        self.locker
    }
}

/// Issues [`MotionPermit`]s for one compartment.
#[derive(Debug, Clone, Copy)]
pub struct MotionInterlock {
    locker: LockerId,
}

impl MotionInterlock {
    pub fn new(locker: LockerId) -> Self {
        Self { locker }
    }

    /// Grant a permit when `observed` is `Open`.
    pub fn permit(&self, observed: DoorState) -> Result<MotionPermit, CycleError> {
        DoorRequirement::OPEN_FOR_MOTION
            .check(observed)
            .inspect_err(|_| {
                warn!(locker = %self.locker, %observed, "motion interlock engaged");
            })?;
        Ok(MotionPermit {
            locker: self.locker,
        })
    }
}

#[cfg(test)]
mod tests {
    use lockstep_types::ErrorClass;

    use super::*;

    #[test]
    fn initial_requirement_rejects_open_door() {
        let err = DoorRequirement::INITIAL_CLOSED
            .check(DoorState::Open)
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::UnsafeState);
        assert!(err.to_string().contains("unsafe initial state"));
    }

    #[test]
    fn unknown_never_satisfies_a_requirement() {
        assert!(DoorRequirement::INITIAL_CLOSED.check(DoorState::Unknown).is_err());
        assert!(DoorRequirement::OPEN_FOR_MOTION.check(DoorState::Unknown).is_err());
    }

    #[test]
    fn permit_issued_only_for_open_door() {
        let interlock = MotionInterlock::new(LockerId(3));
        let permit = interlock.permit(DoorState::Open).unwrap();
        assert_eq!(permit.locker(), LockerId(3));

        match interlock.permit(DoorState::Closed) {
            Err(CycleError::UnsafeState { phase, observed, .. }) => {
                assert_eq!(phase, Phase::RobotSequence);
                assert_eq!(observed, DoorState::Closed);
            }
            other => panic!("expected unsafe state, got {other:?}"),
        }
    }
}
