//! # ariproxy-server
//!
//! Runs [`ariproxy_core`] as a standalone process: the admin REST API in
//! [`api`] and the wiring of transport, ARI clients and applications in
//! [`server`].
//!
//! [`ProxyServer::new`] queues dialogues in an in-process
//! [`MemoryQueueTransport`](ariproxy_core::transport::MemoryQueueTransport).
//! No broker wire protocol is implemented, so consumers in other processes
//! cannot reach those queues. Embedders with their own
//! [`QueueTransport`](ariproxy_core::transport::QueueTransport) pass it to
//! [`ProxyServer::with_components`].

pub mod api;
pub mod server;

pub use api::{admin_router, AdminState, ApiError};
pub use server::ProxyServer;
