//! Request handlers.

pub mod admin;
pub mod credits;
pub mod health;
pub mod jobs;
pub mod webhooks;

pub use admin::*;
pub use credits::*;
pub use health::*;
pub use jobs::*;
pub use webhooks::*;
