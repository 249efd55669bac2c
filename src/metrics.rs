//! Prometheus metrics for admission decisions.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::admission::RejectReason;
use crate::error::Result;

pub mod labels {
    pub const REASON: &str = "reason";
    pub const OUTCOME: &str = "outcome";
}

pub mod values {
    pub const OUTCOME_ALLOWED: &str = "allowed";
    pub const OUTCOME_REJECTED: &str = "rejected";
    pub const OUTCOME_UNCHECKED: &str = "unchecked";
}

/// Counters and histograms exported at `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounter,
    pub allowed_total: IntCounter,
    pub blocked_total: IntCounterVec,
    pub suspicious_total: IntCounter,
    pub store_errors_total: IntCounter,
    pub request_latency_seconds: HistogramVec,
}

impl Metrics {
    /// Create the metrics on a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total =
            IntCounter::new("turnstile_requests_total", "Requests seen by the admission gate")?;
        let allowed_total =
            IntCounter::new("turnstile_allowed_total", "Requests passed to the handler")?;
        let blocked_total = IntCounterVec::new(
            Opts::new("turnstile_blocked_total", "Requests rejected with 429"),
            &[labels::REASON],
        )?;
        let suspicious_total = IntCounter::new(
            "turnstile_suspicious_total",
            "Suspicious behavior events flagged",
        )?;
        let store_errors_total = IntCounter::new(
            "turnstile_store_errors_total",
            "Admission checks that failed because the counter store did",
        )?;
        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "turnstile_request_latency_seconds",
                "Admission decision latency, including the handler for allowed requests",
            ),
            &[labels::OUTCOME],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(allowed_total.clone()))?;
        registry.register(Box::new(blocked_total.clone()))?;
        registry.register(Box::new(suspicious_total.clone()))?;
        registry.register(Box::new(store_errors_total.clone()))?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            allowed_total,
            blocked_total,
            suspicious_total,
            store_errors_total,
            request_latency_seconds,
        })
    }

    pub fn record_allowed(&self, elapsed: Duration) {
        self.allowed_total.inc();
        self.request_latency_seconds
            .with_label_values(&[values::OUTCOME_ALLOWED])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_rejection(&self, reason: RejectReason, elapsed: Duration) {
        self.blocked_total.with_label_values(&[reason.tag()]).inc();
        if reason == RejectReason::SuspiciousBehavior {
            self.suspicious_total.inc();
        }
        self.request_latency_seconds
            .with_label_values(&[values::OUTCOME_REJECTED])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_store_error(&self) {
        self.store_errors_total.inc();
    }

    /// A request that reached the handler without being checked.
    ///
    /// Only timed; it is not counted in `turnstile_allowed_total`.
    pub fn record_unchecked(&self, elapsed: Duration) {
        self.request_latency_seconds
            .with_label_values(&[values::OUTCOME_UNCHECKED])
            .observe(elapsed.as_secs_f64());
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;

        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)).into())
    }

    /// Content type of [`Metrics::encode`] output.
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
