//! HTTP surface: the admission gate, demo routes and operational endpoints.

mod gate;
mod routes;
mod server;

pub use gate::admission_gate;
pub use routes::router;
pub use server::HttpServer;

use std::sync::Arc;

use crate::admission::AdmissionPipeline;
use crate::metrics::Metrics;
use crate::store::CounterStore;

/// Shared state handed to every handler and to the gate.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AdmissionPipeline<dyn CounterStore>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<AdmissionPipeline<dyn CounterStore>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { pipeline, metrics }
    }
}
