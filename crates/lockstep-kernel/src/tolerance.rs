//! Arrival check for joint moves.

use std::cmp::Ordering;

use lockstep_types::CycleError;
use tracing::debug;

/// Default per-joint tolerance in degrees.
pub const DEFAULT_TOLERANCE_DEG: f64 = 2.0;

/// Largest single-joint deviation between target and measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviation {
    /// Zero-based joint index.
    pub joint: usize,
    pub target: f64,
    pub measured: f64,
}

impl Deviation {
    pub fn degrees(&self) -> f64 {
        (self.measured - self.target).abs()
    }
}

/// Verifies that measured joint angles are within a fixed band of the target.
#[derive(Debug, Clone, Copy)]
pub struct ToleranceVerifier {
    tolerance_deg: f64,
}

impl Default for ToleranceVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_DEG)
    }
}

impl ToleranceVerifier {
    pub fn new(tolerance_deg: f64) -> Self {
        Self {
            tolerance_deg: tolerance_deg.abs(),
        }
    }

    pub fn tolerance_deg(&self) -> f64 {
        self.tolerance_deg
    }

    /// `true` only for a deviation provably inside the band; NaN on either
    /// side fails.
    fn within(&self, deviation: f64) -> bool {
        matches!(
            deviation.partial_cmp(&self.tolerance_deg),
            Some(Ordering::Less | Ordering::Equal)
        )
    }

    /// Joint with the largest absolute deviation, or `None` for empty input.
    pub fn worst(target: &[f64], measured: &[f64]) -> Option<Deviation> {
        target
            .iter()
            .zip(measured)
            .enumerate()
            .map(|(joint, (&target, &measured))| Deviation {
                joint,
                target,
                measured,
            })
            .max_by(|a, b| a.degrees().total_cmp(&b.degrees()))
    }

    /// Check the measurement taken after a move to `position`.
    ///
    /// Missing feedback, a joint-count mismatch and a non-finite reading are
    /// all motion errors; arrival is never assumed.
    ///
    /// ```
    /// use lockstep_kernel::ToleranceVerifier;
    ///
    /// let verifier = ToleranceVerifier::new(2.0);
    /// assert!(verifier.verify("home", &[10.0, 20.0], Some(&[11.5, 19.0][..])).is_ok());
    /// assert!(verifier.verify("home", &[10.0, 20.0], Some(&[13.0, 20.0][..])).is_err());
    /// assert!(verifier.verify("home", &[10.0, 20.0], None).is_err());
    /// ```
    pub fn verify(
        &self,
        position: &str,
        target: &[f64],
        measured: Option<&[f64]>,
    ) -> Result<(), CycleError> {
        let motion_error = |details: String| CycleError::Motion {
            position: position.to_string(),
            details,
        };

        let measured = measured.ok_or_else(|| motion_error("no feedback after move".into()))?;
        if measured.len() != target.len() {
            return Err(motion_error(format!(
                "feedback has {} joints, target has {}",
                measured.len(),
                target.len()
            )));
        }
        if let Some(joint) = measured.iter().position(|m| !m.is_finite()) {
            return Err(motion_error(format!(
                "non-finite feedback on joint {}: {}",
                joint + 1,
                measured[joint]
            )));
        }

        match Self::worst(target, measured) {
            Some(dev) if !self.within(dev.degrees()) => Err(motion_error(format!(
                "joint {} off by {:.2}° (target {:.3}°, measured {:.3}°, tolerance ±{:.1}°)",
                dev.joint + 1,
                dev.degrees(),
                dev.target,
                dev.measured,
                self.tolerance_deg
            ))),
            worst => {
                debug!(
                    position,
                    max_deviation = worst.map_or(0.0, |d| d.degrees()),
                    "position verified"
                );
                Ok(())
            }
        }
    }
}
