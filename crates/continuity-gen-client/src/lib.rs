//! Client for the video generation service.
//!
//! The service exposes transition generation as a long-running operation:
//! a submit call returns an operation name, and the operation is polled
//! until it reports `done` with either a video URI or an error.

pub mod client;
pub mod error;
pub mod types;

pub use client::{GenClient, GenClientConfig};
pub use error::{GenClientError, GenClientResult};
pub use types::{GenerateRequest, OperationResponse};
