//! Capability Module
//!
//! Model limits: static table, runtime discovery and its persistence.

pub mod discovery;
pub mod registry;
pub mod store;

pub use discovery::parse_limits_from_error;
pub use registry::{
    DiscoveredLimits, ModelCapabilityRegistry, ModelLimits, PartialLimits, DEFAULT_LIMITS,
};
pub use store::{DiscoveryStore, JsonFileDiscoveryStore, MemoryDiscoveryStore};
