//! Token bucket rate limiting.

mod bucket;
mod limiter;
mod scope;

pub use bucket::{BucketBudget, BucketDecision, BucketState};
pub use limiter::TokenBucketLimiter;
pub use scope::ScopeKey;
