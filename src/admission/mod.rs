//! Admission control: who is asking, and whether they get through.

mod identity;
mod pipeline;

pub use identity::{
    RequestIdentity, ANONYMOUS_API_KEY, API_KEY_HEADER, FORWARDED_FOR_HEADER, UNKNOWN_CLIENT,
};
pub use pipeline::{Admission, AdmissionPipeline, AdmissionSettings, RejectReason, Verdict};
