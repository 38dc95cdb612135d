//! Self-registration of a service instance with the discovery registry
//!
//! This library provides:
//! - Validated service options
//! - Health check selection
//! - Registration with unbounded, cancellable retry and bounded deregistration
//! - A read-side catalog of discovered services

pub mod address;
pub mod catalog;
pub mod descriptor;
pub mod health_check;
pub mod lifecycle;
pub mod options;

pub use catalog::ServiceCatalog;
pub use descriptor::{derive_service_id, DescriptorFactory};
pub use health_check::build_check;
pub use lifecycle::{DeregistrationOutcome, LifecycleState, RegistrationOutcome, ServiceLifecycle};
pub use options::{HealthCheckOptions, ServiceFilter, ServiceOptions};
