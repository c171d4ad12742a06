//! [`CycleLedger`] – statistics plus a bounded history of finished cycles.
//!
//! # Example
//!
//! ```rust
//! use lockstep_runtime::ledger::CycleLedger;
//! use lockstep_types::Cycle;
//!
//! let mut ledger = CycleLedger::new(2);
//! for n in 1..=3 {
//!     let mut cycle = Cycle::new(n);
//!     cycle.finish(Ok(()));
//!     ledger.record(cycle);
//! }
//!
//! let kept: Vec<u64> = ledger.recent().iter().map(|c| c.cycle_number).collect();
//! assert_eq!(kept, vec![2, 3]); // oldest evicted first
//! assert_eq!(ledger.statistics().success_count, 3);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lockstep_types::{Cycle, Statistics};

// ─────────────────────────────────────────────────────────────────────────────
// CycleLedger
// ─────────────────────────────────────────────────────────────────────────────

/// Owned exclusively by the cycle loop.
#[derive(Debug)]
pub struct CycleLedger {
    statistics: Statistics,
    history: VecDeque<Cycle>,
    capacity: usize,
}

impl CycleLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            statistics: Statistics::new(),
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Count `cycle` and append it to the history.  Pending cycles are
    /// refused and `false` is returned.
    pub fn record(&mut self, cycle: Cycle) -> bool {
        if !self.statistics.record(cycle.outcome) {
            return false;
        }
        self.history.push_back(cycle);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        true
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Retained cycles, oldest first.
    pub fn recent(&self) -> Vec<Cycle> {
        self.history.iter().cloned().collect()
    }

    pub fn summary(&self, now: DateTime<Utc>) -> FinalSummary {
        FinalSummary {
            runtime: self.statistics.uptime(now),
            total_cycles: self.statistics.total_cycles,
            success_count: self.statistics.success_count,
            failed_count: self.statistics.failed_count,
            critical_count: self.statistics.critical_count,
            success_rate: self.statistics.success_rate(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FinalSummary
// ─────────────────────────────────────────────────────────────────────────────

/// End-of-run report printed and logged at exit.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalSummary {
    pub runtime: Duration,
    pub total_cycles: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub critical_count: u64,
    /// Percentage, 0.0 when no cycle finished.
    pub success_rate: f64,
}

/// `HH:MM:SS`, hours not wrapped at 24.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl fmt::Display for FinalSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runtime:          {}", format_hms(self.runtime))?;
        writeln!(f, "Total cycles:     {}", self.total_cycles)?;
        writeln!(f, "Successful:       {}", self.success_count)?;
        writeln!(
            f,
            "Failed:           {} (critical: {})",
            self.failed_count, self.critical_count
        )?;
        write!(f, "Success rate:     {:.1}%", self.success_rate)
    }
}

#[cfg(test)]
mod tests {
    use lockstep_types::{CycleError, LockerId, Outcome};

    use super::*;

    fn finished(n: u64, err: Option<CycleError>) -> Cycle {
        let mut cycle = Cycle::new(n);
        cycle.finish(err.as_ref().map_or(Ok(()), Err));
        cycle
    }

    #[test]
    fn pending_cycle_is_not_recorded() {
        let mut ledger = CycleLedger::new(10);
        assert!(!ledger.record(Cycle::new(1)));
        assert_eq!(ledger.statistics().total_cycles, 0);
        assert!(ledger.recent().is_empty());
    }

    #[test]
    fn history_is_capped_and_ordered() {
        let mut ledger = CycleLedger::new(10);
        for n in 1..=12 {
            ledger.record(finished(n, None));
        }
        let recent = ledger.recent();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.first().unwrap().cycle_number, 3);
        assert_eq!(recent.last().unwrap().cycle_number, 12);
        assert_eq!(ledger.statistics().total_cycles, 12);
    }

    #[test]
    fn summary_counts_critical_as_failed() {
        let mut ledger = CycleLedger::new(10);
        ledger.record(finished(1, None));
        ledger.record(finished(
            2,
            Some(CycleError::Critical {
                locker: LockerId(1),
                waited_ms: 30_000,
            }),
        ));
        assert_eq!(ledger.recent()[1].outcome, Outcome::Critical);

        let summary = ledger.summary(Utc::now());
        assert_eq!(summary.total_cycles, 2);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.critical_count, 1);
        assert!((summary.success_rate - 50.0).abs() < f64::EPSILON);
        assert!(summary.to_string().contains("Success rate:     50.0%"));
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_hms(Duration::from_secs(90_000)), "25:00:00");
    }
}
