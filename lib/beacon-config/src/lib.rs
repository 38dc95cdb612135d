//! Live binding of remote configuration values into application-held cells
//!
//! Bindings are declared once at wiring time, then activated at bootstrap:
//! each one is populated from the store (or its default) and kept current
//! by a watch subscription.

pub mod binding;
pub mod cell;
pub mod orchestrator;

pub use binding::{BindingKey, ConfigBinding};
pub use cell::BindingCell;
pub use orchestrator::{ActivationReport, ConfigOrchestrator};
