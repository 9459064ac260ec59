//! # Push Retry
//!
//! Re-enqueues undelivered push messages until a receipt arrives or the
//! leg's retry window closes, and discovers what needs re-enqueueing by
//! ranging over the time-ordered identifier space.

pub mod service;

pub use service::{RetryError, RetryService, SendError, SendPipeline};
