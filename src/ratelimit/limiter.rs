//! Token bucket limiter on top of the shared counter store.

use std::sync::Arc;

use tracing::{debug, trace};

use super::bucket::{BucketBudget, BucketDecision};
use super::scope::ScopeKey;
use crate::clock::Clock;
use crate::store::{CounterStore, StoreError};

/// Decides whether one unit of a scope's budget may be consumed right now.
///
/// The limiter itself is stateless; every call is a single atomic
/// check-and-consume in the store, so it can be cloned freely and shared
/// across tasks.
pub struct TokenBucketLimiter<S: ?Sized> {
    /// Shared counter store holding the bucket state
    store: Arc<S>,
    /// Time source for refill accounting
    clock: Arc<dyn Clock>,
}

impl<S: ?Sized> Clone for TokenBucketLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: CounterStore + ?Sized> TokenBucketLimiter<S> {
    /// Create a new limiter.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Try to take one token from the bucket for `scope`.
    ///
    /// Store failures are returned as-is; they are never turned into a grant
    /// or a denial here.
    pub async fn allow(
        &self,
        scope: &ScopeKey,
        budget: &BucketBudget,
    ) -> Result<BucketDecision, StoreError> {
        let now = self.clock.now();

        trace!(
            scope = %scope,
            capacity = budget.capacity,
            refill_per_second = budget.refill_per_second,
            "Checking token bucket"
        );

        let decision = self.store.take_token(scope, budget, now).await?;

        if !decision.granted {
            debug!(
                scope = %scope,
                tokens_remaining = decision.tokens_remaining,
                "Token bucket exhausted"
            );
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::BucketState;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn limiter_at(
        start: f64,
    ) -> (
        TokenBucketLimiter<MemoryStore>,
        Arc<MemoryStore>,
        Arc<ManualClock>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start));
        let limiter = TokenBucketLimiter::new(store.clone(), clock.clone());
        (limiter, store, clock)
    }

    #[tokio::test]
    async fn test_refill_after_wait() {
        let (limiter, _store, clock) = limiter_at(1_000.0);
        let scope = ScopeKey::api_key("k");
        let budget = BucketBudget::new(5.0, 1.0);

        for _ in 0..5 {
            assert!(limiter.allow(&scope, &budget).await.unwrap().granted);
        }
        assert!(!limiter.allow(&scope, &budget).await.unwrap().granted);

        clock.advance(Duration::from_secs(2));

        let decision = limiter.allow(&scope, &budget).await.unwrap();
        assert!(decision.granted);
        assert!((decision.tokens_remaining - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_remaining_never_exceeds_capacity() {
        let (limiter, _store, clock) = limiter_at(0.0);
        let scope = ScopeKey::ip("192.0.2.1");
        let budget = BucketBudget::new(3.0, 2.0);

        for step in 0..100u64 {
            clock.advance(Duration::from_millis(step * 37 % 900));
            let decision = limiter.allow(&scope, &budget).await.unwrap();
            assert!(decision.tokens_remaining <= budget.capacity);
        }
    }

    #[tokio::test]
    async fn test_unseen_scope_matches_fresh_state() {
        let (limiter, store, _clock) = limiter_at(500.0);
        let budget = BucketBudget::new(4.0, 0.5);

        let decision = limiter
            .allow(&ScopeKey::api_key("never-seen"), &budget)
            .await
            .unwrap();

        let mut fresh = BucketState::fresh(budget.capacity);
        let expected = fresh.refill_and_take(&budget, 500.0);

        assert_eq!(decision, expected);
        assert_eq!(
            store.bucket(&ScopeKey::api_key("never-seen")),
            Some(fresh)
        );
    }

    #[tokio::test]
    async fn test_scopes_do_not_share_budget() {
        let (limiter, _store, _clock) = limiter_at(10.0);
        let budget = BucketBudget::new(1.0, 0.0);

        assert!(limiter.allow(&ScopeKey::api_key("a"), &budget).await.unwrap().granted);
        assert!(limiter.allow(&ScopeKey::api_key("b"), &budget).await.unwrap().granted);
        assert!(!limiter.allow(&ScopeKey::api_key("a"), &budget).await.unwrap().granted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_over_grant_under_concurrency() {
        let (limiter, _store, _clock) = limiter_at(10.0);
        let budget = BucketBudget::new(1.0, 0.0);

        for n in [2usize, 16, 128] {
            let scope = ScopeKey::api_key(format!("contended-{}", n));
            let calls = (0..n).map(|_| {
                let limiter = limiter.clone();
                let scope = scope.clone();
                tokio::spawn(async move { limiter.allow(&scope, &budget).await.unwrap() })
            });

            let decisions = futures::future::join_all(calls).await;
            let granted = decisions
                .into_iter()
                .filter(|decision| decision.as_ref().unwrap().granted)
                .count();

            assert_eq!(granted, 1, "exactly one of {} callers wins", n);
        }
    }
}
