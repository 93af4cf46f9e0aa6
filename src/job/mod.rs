//! Transcode job records and the worker-side job orchestration service.

pub mod record;
pub mod service;

pub use record::{JobRecord, JobRequest, JobStatus};
pub use service::{JobService, JobServiceBuilder};
