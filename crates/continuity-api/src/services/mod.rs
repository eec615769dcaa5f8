//! Background and request-side services.

pub mod stale_job_detector;
pub mod webhook;

pub use stale_job_detector::StaleJobDetector;
pub use webhook::{WebhookOutcome, WebhookReconciler};
