//! Configuration Module
//!
//! Provider, feature binding and policy configuration.

pub mod feature;
pub mod loader;
pub mod provider;

pub use feature::Feature;
pub use loader::ConfigLoader;
pub use provider::{BatchConfig, DispatchConfig, KeyPoolConfig, ProviderConfig, RetryConfig};
