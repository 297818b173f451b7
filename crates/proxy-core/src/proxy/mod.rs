//! Dialogue correlation engine
//!
//! - [`correlation`]: entity id to dialogue mapping, one table per application
//! - [`command`]: command to REST request translation
//! - [`application`]: the per-application event dispatcher and command executor
//! - [`registry`]: the set of running applications

pub mod application;
pub mod command;
pub mod correlation;
pub mod registry;

pub use application::{ApplicationProxy, ProxyOptions, ProxyStats};
pub use correlation::{CorrelationKey, CorrelationTable, EntityKind};
pub use registry::{ApplicationRegistry, ApplicationSummary, DialogueSummary};
