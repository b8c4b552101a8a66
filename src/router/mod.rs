//! Router Module
//!
//! Feature routing, binding parsing and API key pool management.

pub mod feature;
pub mod key_pool;
pub mod strategy;

pub use feature::{FeatureConfig, FeatureRouter, RouterState};
pub use key_pool::{ApiKeyManager, KeyPoolStats};
pub use strategy::BindingRoute;
