//! Shared model and registry seams for beacon
//!
//! This library provides:
//! - Raw registry value coercion into typed values
//! - Service descriptors and health check variants
//! - Collaborator traits for the key-value store and the service registry
//! - An in-process registry implementing both traits

pub mod descriptor;
pub mod error;
pub mod memory;
pub mod node;
pub mod store;
pub mod telemetry;
pub mod value;

pub use descriptor::{CheckKind, CheckStatus, HealthCheck, ServiceDescriptor};
pub use error::{CoreError, Result};
pub use memory::MemoryRegistry;
pub use node::{HealthStatus, ServiceNode};
pub use store::{KeyValueStore, NodesCallback, ServiceListCallback, ServiceRegistry, ValueCallback};
pub use value::{coerce, ValueKind};
