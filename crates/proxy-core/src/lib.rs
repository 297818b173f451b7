//! # ariproxy-core
//!
//! Bridges the Asterisk REST Interface to a queue transport so that any
//! number of consumer processes can drive call control without holding an
//! ARI connection of their own.
//!
//! Every call-control conversation is a *dialogue* backed by three queues:
//! forwarded events and command results flow out, commands flow in. The
//! [`proxy`] module correlates incoming ARI events to dialogues and executes
//! their commands; the [`backend`] module creates, monitors and destroys the
//! dialogues' queues.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ariproxy_core::prelude::*;
//!
//! # async fn run(config: ProxyConfig) -> Result<()> {
//! let transport = Arc::new(MemoryQueueTransport::new());
//! let backend = Arc::new(SessionManager::new(transport, config.backend.clone(), &config.server_id));
//! backend.start();
//!
//! let rest = Arc::new(HttpAriClient::new(
//!     config.ari_base_url(),
//!     &config.ari_username,
//!     &config.ari_password,
//!     config.command_timeout(),
//! )?);
//! let events = Arc::new(WebSocketEventSource::new(
//!     config.ari_events_url(),
//!     &config.ari_username,
//!     &config.ari_password,
//! ));
//!
//! let registry = ApplicationRegistry::new(backend, rest, events, ProxyOptions::from(&config));
//! registry.create("my-app").await?;
//! # Ok(())
//! # }
//! ```

pub mod ari;
pub mod backend;
pub mod config;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod proxy;
pub mod transport;

pub use errors::{ProxyError, Result};

pub mod prelude {
    pub use crate::ari::{
        AriEvent, AriRestClient, EventSource, HttpAriClient, ManualEventSource, WebSocketEventSource,
    };
    pub use crate::backend::{CloseReason, Dialogue, DialogueId, SessionManager};
    pub use crate::config::{BackendConfig, ProxyConfig, QueueConfig};
    pub use crate::errors::{ProxyError, Result};
    pub use crate::messages::{Command, CommandResult, EventEnvelope, NewDialogueAnnouncement};
    pub use crate::proxy::{ApplicationProxy, ApplicationRegistry, ProxyOptions, ProxyStats};
    pub use crate::transport::{MemoryQueueTransport, QueueTransport};
}
