//! Per-request admission decisions.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::identity::RequestIdentity;
use crate::clock::Clock;
use crate::config::{FailurePolicy, TurnstileConfig};
use crate::detector::{BehavioralDetector, DetectorPolicy};
use crate::metrics::Metrics;
use crate::ratelimit::{BucketBudget, ScopeKey, TokenBucketLimiter};
use crate::store::{CounterStore, StoreError};

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    RateLimitedKey,
    RateLimitedIp,
    SuspiciousBehavior,
}

impl RejectReason {
    /// Machine-readable tag, used as a metric label.
    pub fn tag(&self) -> &'static str {
        match self {
            RejectReason::RateLimitedKey => "rate_limited_key",
            RejectReason::RateLimitedIp => "rate_limited_ip",
            RejectReason::SuspiciousBehavior => "suspicious_behavior",
        }
    }

    /// Human-readable text returned to the client.
    pub fn detail(&self) -> &'static str {
        match self {
            RejectReason::RateLimitedKey => "Rate limit exceeded (api key)",
            RejectReason::RateLimitedIp => "Rate limit exceeded (ip)",
            RejectReason::SuspiciousBehavior => "Suspicious behavior detected",
        }
    }
}

/// Result of the checks alone, before any handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected(RejectReason),
}

/// Result of running a request through the gate.
#[derive(Debug)]
pub enum Verdict<T> {
    /// The handler ran and produced `T`
    Admitted(T),
    /// The handler was not called
    Rejected(RejectReason),
}

/// Budgets, detector policy and failure handling for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionSettings {
    pub api_key: BucketBudget,
    pub ip: BucketBudget,
    pub detector: DetectorPolicy,
    pub failure_policy: FailurePolicy,
}

impl From<&TurnstileConfig> for AdmissionSettings {
    fn from(config: &TurnstileConfig) -> Self {
        Self {
            api_key: config.limits.api_key,
            ip: config.limits.ip,
            detector: config.detector,
            failure_policy: config.store.failure_policy,
        }
    }
}

/// Runs the API-key bucket, the IP bucket and the detector in that order,
/// stopping at the first rejection.
pub struct AdmissionPipeline<S: ?Sized> {
    limiter: TokenBucketLimiter<S>,
    detector: BehavioralDetector<S>,
    settings: AdmissionSettings,
    metrics: Arc<Metrics>,
}

impl<S: CounterStore + ?Sized> AdmissionPipeline<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        settings: AdmissionSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            limiter: TokenBucketLimiter::new(store.clone(), clock.clone()),
            detector: BehavioralDetector::new(store, clock),
            settings,
            metrics,
        }
    }

    /// Evaluate the checks for one request without running a handler.
    ///
    /// Later checks are not evaluated, and leave no state behind, once an
    /// earlier one rejects.
    pub async fn evaluate(
        &self,
        identity: &RequestIdentity,
        path: &str,
    ) -> Result<Admission, StoreError> {
        let key_scope = ScopeKey::api_key(identity.api_key.as_str());
        if !self.limiter.allow(&key_scope, &self.settings.api_key).await?.granted {
            return Ok(Admission::Rejected(RejectReason::RateLimitedKey));
        }

        let ip_scope = ScopeKey::ip(identity.client_ip.as_str());
        if !self.limiter.allow(&ip_scope, &self.settings.ip).await?.granted {
            return Ok(Admission::Rejected(RejectReason::RateLimitedIp));
        }

        let suspicious = self
            .detector
            .record_and_check(&identity.client_ip, path, &self.settings.detector)
            .await?;
        if suspicious {
            return Ok(Admission::Rejected(RejectReason::SuspiciousBehavior));
        }

        Ok(Admission::Allowed)
    }

    /// Run the checks and, if they all pass, the protected handler.
    ///
    /// A store failure is returned as `Err` under `FailClosed`. Under
    /// `FailOpen` it is logged and counted, and the handler runs.
    pub async fn admit<F, Fut, T>(
        &self,
        identity: &RequestIdentity,
        path: &str,
        handler: F,
    ) -> Result<Verdict<T>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        self.metrics.requests_total.inc();

        let admission = match self.evaluate(identity, path).await {
            Ok(admission) => admission,
            Err(error) => {
                self.metrics.record_store_error();
                match self.settings.failure_policy {
                    FailurePolicy::FailClosed => return Err(error),
                    FailurePolicy::FailOpen => {
                        warn!(
                            error = %error,
                            api_key = %identity.api_key,
                            client = %identity.client_ip,
                            "Counter store failed, admitting request unchecked"
                        );
                        let output = handler().await;
                        self.metrics.record_unchecked(started.elapsed());
                        return Ok(Verdict::Admitted(output));
                    }
                }
            }
        };

        match admission {
            Admission::Rejected(reason) => {
                debug!(
                    reason = reason.tag(),
                    api_key = %identity.api_key,
                    client = %identity.client_ip,
                    path = %path,
                    "Request rejected"
                );
                self.metrics.record_rejection(reason, started.elapsed());
                Ok(Verdict::Rejected(reason))
            }
            Admission::Allowed => {
                let output = handler().await;
                self.metrics.record_allowed(started.elapsed());
                Ok(Verdict::Admitted(output))
            }
        }
    }
}
