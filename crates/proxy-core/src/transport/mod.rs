//! Queue transport abstraction
//!
//! The session manager only depends on the [`QueueTransport`] contract:
//! named FIFO queues with declare/publish/consume/acknowledge and a passive
//! existence check. Reconnection, if the implementation has any, must stay
//! invisible to queue names and consumer handles already handed out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryQueueTransport;

/// Failures of the queue transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),

    #[error("consumer {0} not found")]
    ConsumerNotFound(u64),

    #[error("queue '{0}' already has an exclusive consumer")]
    Exclusive(String),

    #[error("transport is closed")]
    Closed,

    #[error("connection error: {0}")]
    Connection(String),
}

/// Declaration flags for a queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// Idle time after which an unconsumed queue is dropped by the broker
    pub ttl: Option<Duration>,
}

/// Identifies a running consumer so it can be cancelled
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerHandle {
    pub id: u64,
    pub queue: String,
}

impl fmt::Display for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}@{}", self.id, self.queue)
    }
}

/// Receives deliveries for one consumer
///
/// Deliveries are handed over one at a time in queue order. Returning `Ok`
/// acknowledges the message; the next one is not delivered until the
/// previous call has returned.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_message(&self, payload: Bytes) -> crate::errors::Result<()>;

    async fn on_error(&self, error: TransportError);
}

/// Named FIFO queues with publish and consume.
///
/// A message is acknowledged once its [`DeliveryHandler`] returns, and is
/// removed from the queue whether it was accepted or rejected.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Create the queue if it does not exist yet. Redeclaring is a no-op.
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<(), TransportError>;

    async fn publish(&self, queue: &str, payload: Bytes) -> Result<(), TransportError>;

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<ConsumerHandle, TransportError>;

    async fn cancel_consumer(&self, handle: &ConsumerHandle) -> Result<(), TransportError>;

    /// Release this side's use of the queue.
    async fn close_queue(&self, name: &str) -> Result<(), TransportError>;

    /// Passive existence check; never creates the queue.
    async fn queue_exists(&self, name: &str) -> Result<bool, TransportError>;
}
