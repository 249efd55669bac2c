//! Turnstile - API Admission Control
//!
//! This crate puts an admission gate in front of an HTTP API. Each request is
//! charged against a token bucket for its API key and one for its client
//! address, then checked for endpoint enumeration. Bucket and access state
//! live in a shared counter store (Redis in production) so every gateway
//! instance enforces the same budgets.

pub mod admission;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod http;
pub mod metrics;
pub mod ratelimit;
pub mod store;
