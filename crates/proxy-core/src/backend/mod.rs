//! Backend session management
//!
//! [`SessionManager`] creates and destroys [`Dialogue`]s over a
//! [`QueueTransport`](crate::transport::QueueTransport) and runs the
//! [`HealthMonitor`].

pub mod dialogue;
pub mod health;
pub mod manager;

pub use dialogue::{CloseReason, Dialogue, DialogueId, NewDialogue, QueueNames};
pub use health::HealthMonitor;
pub use manager::SessionManager;
