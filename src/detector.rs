//! Behavioral detection of endpoint enumeration.
//!
//! A client is suspicious when it touches more distinct endpoints than a
//! threshold within a trailing window. Each endpoint counts once per window
//! no matter how often it is hit; hammering a single route is the token
//! buckets' job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::store::{CounterStore, StoreError};

/// Window and threshold for the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorPolicy {
    /// Length of the trailing window in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Distinct endpoints allowed inside the window
    #[serde(default = "default_max_distinct")]
    pub max_distinct: u64,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_distinct: default_max_distinct(),
        }
    }
}

fn default_window_seconds() -> u64 {
    30
}

fn default_max_distinct() -> u64 {
    10
}

/// Tracks the endpoints each client touches.
pub struct BehavioralDetector<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: ?Sized> Clone for BehavioralDetector<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: CounterStore + ?Sized> BehavioralDetector<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record this access and report whether the client now looks like it is
    /// enumerating endpoints.
    ///
    /// This always writes: the access is recorded even when the verdict is
    /// suspicious.
    pub async fn record_and_check(
        &self,
        client_id: &str,
        endpoint: &str,
        policy: &DetectorPolicy,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now().max(0.0).floor() as u64;

        let distinct = self
            .store
            .record_access(client_id, endpoint, now, policy.window_seconds)
            .await?;

        trace!(
            client = %client_id,
            endpoint = %endpoint,
            distinct = distinct,
            "Recorded endpoint access"
        );

        let suspicious = distinct > policy.max_distinct;
        if suspicious {
            debug!(
                client = %client_id,
                distinct = distinct,
                max_distinct = policy.max_distinct,
                window_seconds = policy.window_seconds,
                "Distinct endpoint threshold exceeded"
            );
        }

        Ok(suspicious)
    }
}
