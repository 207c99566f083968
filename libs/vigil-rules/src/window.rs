//! Window tracking for threshold-over-time conditions
//!
//! Each temporal condition owns one tracker. A satisfying value opens the
//! window, any violation closes it, and a missing sensor pauses it without
//! failing. State lives only in memory.

use crate::buffer::duration_as_ms;
use crate::logic::EvalResult;
use crate::types::ComparisonOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Idle,
    InWindow { start_ms: i64 },
}

#[derive(Debug, Clone)]
pub struct WindowTracker {
    operator: ComparisonOp,
    threshold: f64,
    duration_ms: u64,
    state: WindowState,
}

impl WindowTracker {
    pub fn new(operator: ComparisonOp, threshold: f64, duration_ms: u64) -> Self {
        Self {
            operator,
            threshold,
            duration_ms,
            state: WindowState::Idle,
        }
    }

    pub fn evaluate(&mut self, value: Option<f64>, now_ms: i64) -> EvalResult {
        let Some(value) = value else {
            self.state = WindowState::Idle;
            return EvalResult::Indeterminate;
        };

        if !self.operator.compare(value, self.threshold) {
            self.state = WindowState::Idle;
            return EvalResult::False;
        }

        let start_ms = match self.state {
            WindowState::InWindow { start_ms } => start_ms,
            WindowState::Idle => {
                self.state = WindowState::InWindow { start_ms: now_ms };
                now_ms
            },
        };

        EvalResult::from(now_ms.saturating_sub(start_ms) >= duration_as_ms(self.duration_ms))
    }

    pub fn reset(&mut self) {
        self.state = WindowState::Idle;
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn in_window(&self) -> bool {
        matches!(self.state, WindowState::InWindow { .. })
    }

    pub fn window_start(&self) -> Option<i64> {
        match self.state {
            WindowState::InWindow { start_ms } => Some(start_ms),
            WindowState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_opens_and_matures() {
        let mut w = WindowTracker::new(ComparisonOp::Gt, 50.0, 3_000);
        assert_eq!(w.evaluate(Some(55.0), 1_000), EvalResult::False);
        assert_eq!(w.window_start(), Some(1_000));
        assert_eq!(w.evaluate(Some(56.0), 3_000), EvalResult::False);
        assert_eq!(w.evaluate(Some(57.0), 4_000), EvalResult::True);
        assert_eq!(w.evaluate(Some(57.0), 9_000), EvalResult::True);
        assert_eq!(w.window_start(), Some(1_000));
    }

    #[test]
    fn test_zero_duration_is_immediate() {
        let mut w = WindowTracker::new(ComparisonOp::Le, 10.0, 0);
        assert_eq!(w.evaluate(Some(10.0), 5), EvalResult::True);
    }

    #[test]
    fn test_oversized_duration_never_matures() {
        let mut w = WindowTracker::new(ComparisonOp::Gt, 50.0, u64::MAX);
        assert_eq!(w.evaluate(Some(60.0), 0), EvalResult::False);
        assert_eq!(w.evaluate(Some(60.0), i64::MAX), EvalResult::True);

        let mut w = WindowTracker::new(ComparisonOp::Gt, 50.0, u64::MAX);
        assert_eq!(w.evaluate(Some(60.0), 1_000), EvalResult::False);
        assert_eq!(w.evaluate(Some(60.0), i64::MAX), EvalResult::False);
    }

    #[test]
    fn test_violation_always_resets() {
        let histories: [&[(f64, i64)]; 3] = [&[], &[(60.0, 0)], &[(60.0, 0), (70.0, 10_000)]];
        for history in histories {
            let mut w = WindowTracker::new(ComparisonOp::Gt, 50.0, 1_000);
            for (v, t) in history {
                w.evaluate(Some(*v), *t);
            }
            assert_eq!(w.evaluate(Some(10.0), 20_000), EvalResult::False);
            assert!(!w.in_window());
            assert_eq!(w.evaluate(Some(10.0), 20_001), EvalResult::False);
            assert_eq!(w.state(), WindowState::Idle);
        }
    }

    #[test]
    fn test_missing_value_pauses_window() {
        let mut w = WindowTracker::new(ComparisonOp::Gt, 50.0, 1_000);
        w.evaluate(Some(60.0), 0);
        assert_eq!(w.evaluate(None, 2_000), EvalResult::Indeterminate);
        assert!(!w.in_window());
        // Window restarts from the next satisfying value
        assert_eq!(w.evaluate(Some(60.0), 3_000), EvalResult::False);
        assert_eq!(w.evaluate(Some(60.0), 4_000), EvalResult::True);
    }

    #[test]
    fn test_reset() {
        let mut w = WindowTracker::new(ComparisonOp::Gt, 0.0, 0);
        w.evaluate(Some(1.0), 0);
        assert!(w.in_window());
        w.reset();
        assert_eq!(w.state(), WindowState::Idle);
    }
}
