//! Transition job worker.
//!
//! This crate provides:
//! - The job lifecycle manager (submit, execute, fail, cancel)
//! - Capability traits over the generation service and the stitcher
//! - The background dispatcher with bounded concurrency
//! - Crash and deadline recovery sweeps
//! - Retry with backoff and structured job logging

pub mod capabilities;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod recovery;
pub mod retry;

pub use capabilities::{CapabilityError, GenerationCapability, OutputSpec, StitchingCapability};
pub use config::WorkerConfig;
pub use dispatcher::{Dispatcher, JobSource};
pub use error::{WorkerError, WorkerResult};
pub use lifecycle::{JobManager, CANCEL_REASON, LIVENESS_REASON};
pub use logging::JobLogger;
pub use recovery::{sweep, RecoveryReport};
