//! In-process counter store.
//!
//! Per-key atomicity comes from holding the `DashMap` entry (and with it the
//! shard lock) for the whole read-modify-write. State is local to the process,
//! so budgets are not shared between instances.
//!
//! Access records carry the second they were last touched. Records idle for a
//! whole window are swept out at most once per window, from inside
//! `record_access`, which stands in for the key TTL the Redis store sets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{access_key, CounterStore, StoreError};
use crate::ratelimit::{BucketBudget, BucketDecision, BucketState, ScopeKey};

/// Endpoints one client touched inside the current window.
#[derive(Debug, Default)]
struct AccessRecord {
    /// Endpoint -> last-seen second
    endpoints: HashMap<String, u64>,
    /// Latest second any endpoint was recorded
    touched: u64,
}

/// A counter store backed by concurrent hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Bucket state indexed by scope
    buckets: DashMap<String, BucketState>,
    /// Access records indexed by access key
    access: DashMap<String, AccessRecord>,
    /// Second of the last idle-record sweep
    last_sweep: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a bucket, if it has ever been touched.
    pub fn bucket(&self, scope: &ScopeKey) -> Option<BucketState> {
        self.buckets.get(&scope.to_string()).map(|state| *state)
    }

    /// Number of endpoints currently held for a client, without pruning.
    pub fn access_count(&self, client_id: &str) -> usize {
        self.access
            .get(&access_key(client_id))
            .map(|record| record.endpoints.len())
            .unwrap_or(0)
    }

    /// Number of clients with an access record held in memory.
    pub fn access_record_count(&self) -> usize {
        self.access.len()
    }

    /// Number of buckets that have been created.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.buckets.clear();
        self.access.clear();
        self.last_sweep.store(0, Ordering::Relaxed);
    }

    /// Drop every access record idle for a full window, at most once per window.
    fn sweep_idle_records(&self, now: u64, window_secs: u64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now < last.saturating_add(window_secs) {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let cutoff = now as i64 - window_secs as i64;
        self.access.retain(|_, record| {
            if record.touched as i64 <= cutoff {
                return false;
            }
            record.endpoints.retain(|_, seen| *seen as i64 > cutoff);
            !record.endpoints.is_empty()
        });
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn take_token(
        &self,
        scope: &ScopeKey,
        budget: &BucketBudget,
        now: f64,
    ) -> Result<BucketDecision, StoreError> {
        let mut state = self
            .buckets
            .entry(scope.to_string())
            .or_insert_with(|| BucketState::fresh(budget.capacity));

        Ok(state.refill_and_take(budget, now))
    }

    async fn record_access(
        &self,
        client_id: &str,
        endpoint: &str,
        now: u64,
        window_secs: u64,
    ) -> Result<u64, StoreError> {
        let cutoff = now as i64 - window_secs as i64;

        let distinct = {
            let mut record = self.access.entry(access_key(client_id)).or_default();
            record.touched = record.touched.max(now);

            let last_seen = record.endpoints.entry(endpoint.to_string()).or_insert(now);
            *last_seen = (*last_seen).max(now);

            record.endpoints.retain(|_, seen| *seen as i64 > cutoff);
            record.endpoints.len() as u64
        };

        // the entry guard must be released before sweeping the whole map
        self.sweep_idle_records(now, window_secs);

        Ok(distinct)
    }
}
