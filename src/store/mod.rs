//! Shared counter store.
//!
//! All bucket and access-record state lives behind the [`CounterStore`]
//! trait. Each operation is a single atomic step against one key family, so
//! the limiter and detector built on top of it hold no state of their own and
//! concurrent requests never race on a check-then-act sequence.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::{BucketBudget, BucketDecision, ScopeKey};

/// Errors raised by a counter store.
///
/// These are infrastructure failures and are never a rate-limit verdict.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] ::redis::RedisError),
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// Store key of a client's access record.
/// Format: "access:{client}"
pub fn access_key(client_id: &str) -> String {
    format!("access:{}", client_id)
}

/// Atomic primitives the admission core needs from the shared store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Refill the bucket for `scope` up to `now` and try to consume one token.
    ///
    /// Missing or malformed state is treated as a fresh bucket. The read,
    /// refill, consume and write happen as one indivisible step per scope.
    async fn take_token(
        &self,
        scope: &ScopeKey,
        budget: &BucketBudget,
        now: f64,
    ) -> Result<BucketDecision, StoreError>;

    /// Record that `client_id` accessed `endpoint` at second `now`, drop
    /// endpoints not seen within `window_secs`, and return how many distinct
    /// endpoints remain.
    ///
    /// An endpoint seen again only has its last-seen second refreshed.
    async fn record_access(
        &self,
        client_id: &str,
        endpoint: &str,
        now: u64,
        window_secs: u64,
    ) -> Result<u64, StoreError>;
}
