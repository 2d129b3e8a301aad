//! Job-progress bookkeeping.
//!
//! A job is a sequence of weighted stages. [`ProgressTracker`] folds each
//! stage's local fraction into one global fraction that never decreases and
//! lands exactly on the stage-boundary values (1/3, 2/3, 1.0 for the
//! three-stage plan). [`ProgressGate`] rate-limits how often that fraction
//! is allowed out to the job source; stage boundaries bypass the timer.

use std::time::{Duration, Instant};

/// Minimum wall-clock gap between two unforced progress emissions.
pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_secs(3);

/// Fixed per-stage weights, normalized to sum to 1.
#[derive(Debug, Clone)]
pub struct StagePlan {
    weights: Vec<f64>,
}

impl StagePlan {
    /// A plan with `stages` equally weighted stages.
    ///
    /// # Panics
    /// Panics if `stages` is zero.
    pub fn equal(stages: usize) -> Self {
        assert!(stages > 0, "a stage plan needs at least one stage");
        Self {
            weights: vec![1.0 / stages as f64; stages],
        }
    }

    /// A single-stage plan: the stage's own fraction is the job fraction.
    pub fn single() -> Self {
        Self::equal(1)
    }

    pub fn stages(&self) -> usize {
        self.weights.len()
    }
}

/// Folds stage-local fractions into a monotonically non-decreasing global
/// job fraction in `[0.0, 1.0]`. Publishers withhold the leading zero, so
/// the job source only ever sees values in `(0.0, 1.0]`.
#[derive(Debug)]
pub struct ProgressTracker {
    plan: StagePlan,
    stage: usize,
    reported: f64,
}

impl ProgressTracker {
    pub fn new(plan: StagePlan) -> Self {
        Self {
            plan,
            stage: 0,
            reported: 0.0,
        }
    }

    /// Fold `fraction` (clamped to `[0, 1]`) of the current stage into the
    /// global fraction. Never returns less than a previously returned value.
    pub fn update(&mut self, fraction: f64) -> f64 {
        if self.stage >= self.plan.stages() {
            return self.reported;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let global = self.completed_weight() + self.plan.weights[self.stage] * fraction;
        self.reported = self.reported.max(global);
        self.reported
    }

    /// Mark the current stage finished and return the exact boundary value.
    ///
    /// The final stage's boundary is exactly `1.0`, free of accumulated
    /// floating-point drift.
    pub fn finish_stage(&mut self) -> f64 {
        if self.stage < self.plan.stages() {
            self.stage += 1;
        }
        self.reported = self.reported.max(self.completed_weight());
        self.reported
    }

    pub fn is_complete(&self) -> bool {
        self.stage >= self.plan.stages()
    }

    fn completed_weight(&self) -> f64 {
        if self.stage >= self.plan.stages() {
            return 1.0;
        }
        self.plan.weights[..self.stage].iter().sum()
    }
}

/// Wall-clock rate limiter for progress emissions.
///
/// `permits(false)` is the throttled path; `permits(true)` always passes and
/// is used at stage boundaries and terminal values. Either way a granted
/// emission restarts the interval.
#[derive(Debug)]
pub struct ProgressGate {
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
        }
    }

    /// Whether an emission is allowed now; records the grant when it is.
    pub fn permits(&mut self, force: bool) -> bool {
        let now = Instant::now();
        let due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        };
        if force || due {
            self.last_emit = Some(now);
            return true;
        }
        false
    }
}

impl Default for ProgressGate {
    fn default() -> Self {
        Self::new(DEFAULT_EMIT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_equal_stages_are_monotonic_and_end_at_one() {
        let mut tracker = ProgressTracker::new(StagePlan::equal(3));
        let mut seen = Vec::new();

        for _ in 0..3 {
            for step in 0..=10 {
                seen.push(tracker.update(step as f64 / 10.0));
            }
            seen.push(tracker.finish_stage());
        }

        for pair in seen.windows(2) {
            assert!(pair[1] >= pair[0], "progress regressed: {:?}", pair);
        }
        assert_eq!(*seen.last().expect("progress recorded"), 1.0);
        assert!(tracker.is_complete());
    }

    #[test]
    fn stage_boundaries_hit_exact_thirds() {
        let mut tracker = ProgressTracker::new(StagePlan::equal(3));
        let first = tracker.finish_stage();
        assert!((first - 1.0 / 3.0).abs() < 1e-12);
        let second = tracker.finish_stage();
        assert!((second - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(tracker.finish_stage(), 1.0);
    }

    #[test]
    fn update_clamps_out_of_range_fractions() {
        let mut tracker = ProgressTracker::new(StagePlan::single());
        assert_eq!(tracker.update(-0.5), 0.0);
        assert_eq!(tracker.update(7.0), 1.0);
    }

    #[test]
    fn update_never_regresses_within_a_stage() {
        let mut tracker = ProgressTracker::new(StagePlan::single());
        assert_eq!(tracker.update(0.8), 0.8);
        // A lower local fraction must not pull the global value back.
        assert_eq!(tracker.update(0.2), 0.8);
    }

    #[test]
    fn update_after_completion_stays_at_one() {
        let mut tracker = ProgressTracker::new(StagePlan::single());
        tracker.finish_stage();
        assert_eq!(tracker.update(0.1), 1.0);
    }

    #[test]
    fn gate_suppresses_within_interval() {
        let mut gate = ProgressGate::new(Duration::from_secs(60));
        assert!(gate.permits(false), "first emission always passes");
        assert!(!gate.permits(false), "second emission inside the interval");
    }

    #[test]
    fn gate_force_overrides_interval() {
        let mut gate = ProgressGate::new(Duration::from_secs(60));
        assert!(gate.permits(false));
        assert!(gate.permits(true), "forced emission must pass");
    }

    #[test]
    fn gate_reopens_after_interval() {
        let mut gate = ProgressGate::new(Duration::from_millis(10));
        assert!(gate.permits(false));
        std::thread::sleep(Duration::from_millis(20));
        assert!(gate.permits(false), "interval elapsed; emission due");
    }
}
