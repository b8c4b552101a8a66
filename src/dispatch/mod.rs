//! Dispatch Module
//!
//! Single-request execution: budget checks, retries, key failover and
//! error-driven limit discovery.

pub mod dispatcher;
pub mod options;
pub mod retry;

pub use dispatcher::Dispatcher;
pub use options::CallOptions;
pub use retry::{Failure, RetryPolicy};
