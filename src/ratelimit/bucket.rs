//! Token bucket state and the continuous refill arithmetic.

use serde::{Deserialize, Serialize};

/// Budget for one family of rate-limit scopes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketBudget {
    /// Maximum number of tokens (burst size)
    pub capacity: f64,
    /// Tokens added per second (steady-state throughput)
    pub refill_per_second: f64,
}

impl BucketBudget {
    /// Create a new budget.
    pub fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }
}

/// Outcome of a single check-and-consume step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketDecision {
    /// Whether one token was consumed
    pub granted: bool,
    /// Tokens left in the bucket after this step
    pub tokens_remaining: f64,
}

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Currently available tokens, within `[0, capacity]`
    pub tokens: f64,
    /// Seconds since the Unix epoch of the last accounting update
    pub last_refill: f64,
}

impl BucketState {
    /// State of a bucket that has never been touched.
    pub fn fresh(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: 0.0,
        }
    }

    /// Refill for the time elapsed since the last update, then try to take one token.
    ///
    /// The state is updated in both outcomes: a denied step still stores the
    /// refilled token count and moves `last_refill` to `now`. Time running
    /// backwards never removes tokens.
    pub fn refill_and_take(&mut self, budget: &BucketBudget, now: f64) -> BucketDecision {
        let elapsed = (now - self.last_refill).max(0.0);
        let mut tokens = (self.tokens + elapsed * budget.refill_per_second).min(budget.capacity);

        let granted = tokens >= 1.0;
        if granted {
            tokens -= 1.0;
        }

        self.tokens = tokens;
        self.last_refill = now;

        BucketDecision {
            granted,
            tokens_remaining: tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_bucket_grants_and_decrements() {
        let budget = BucketBudget::new(3.0, 0.0);
        let mut state = BucketState::fresh(budget.capacity);

        let decision = state.refill_and_take(&budget, 1_000.0);
        assert!(decision.granted);
        assert_eq!(decision.tokens_remaining, 2.0);
        assert_eq!(state.last_refill, 1_000.0);
    }

    #[test]
    fn test_refill_after_drain() {
        let budget = BucketBudget::new(5.0, 1.0);
        let mut state = BucketState::fresh(budget.capacity);

        for _ in 0..5 {
            assert!(state.refill_and_take(&budget, 100.0).granted);
        }
        let denied = state.refill_and_take(&budget, 100.0);
        assert!(!denied.granted);
        assert_eq!(denied.tokens_remaining, 0.0);

        let decision = state.refill_and_take(&budget, 102.0);
        assert!(decision.granted);
        assert!((decision.tokens_remaining - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let budget = BucketBudget::new(4.0, 10.0);
        let mut state = BucketState::fresh(budget.capacity);

        let mut now = 0.0;
        for step in 0..200 {
            now += if step % 7 == 0 { 30.0 } else { 0.05 };
            let decision = state.refill_and_take(&budget, now);
            assert!(decision.tokens_remaining <= budget.capacity);
            assert!(decision.tokens_remaining >= 0.0);
        }
    }

    #[test]
    fn test_clock_skew_is_clamped() {
        let budget = BucketBudget::new(2.0, 1.0);
        let mut state = BucketState {
            tokens: 0.5,
            last_refill: 500.0,
        };

        let decision = state.refill_and_take(&budget, 400.0);
        assert!(!decision.granted);
        assert_eq!(decision.tokens_remaining, 0.5);
        assert_eq!(state.last_refill, 400.0);
    }

    #[test]
    fn test_denial_keeps_fractional_refill() {
        let budget = BucketBudget::new(1.0, 0.25);
        let mut state = BucketState {
            tokens: 0.0,
            last_refill: 10.0,
        };

        let decision = state.refill_and_take(&budget, 12.0);
        assert!(!decision.granted);
        assert_eq!(state.tokens, 0.5);

        let decision = state.refill_and_take(&budget, 14.0);
        assert!(decision.granted);
        assert_eq!(decision.tokens_remaining, 0.0);
    }

    #[test]
    fn test_zero_refill_never_recovers() {
        let budget = BucketBudget::new(1.0, 0.0);
        let mut state = BucketState::fresh(budget.capacity);

        assert!(state.refill_and_take(&budget, 1.0).granted);
        assert!(!state.refill_and_take(&budget, 1_000_000.0).granted);
    }
}
