//! Dialogue: the queue triad behind one call-control conversation
//!
//! A dialogue owns three transport queues named after its id:
//!
//! ```text
//! events_<id>     proxy -> consumer   forwarded ARI events
//! responses_<id>  proxy -> consumer   command results
//! commands_<id>   consumer -> proxy   REST commands
//! ```
//!
//! It only (de)serializes and moves messages. Which entities belong to it is
//! decided by the application proxy.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::errors::{ProxyError, Result};
use crate::messages::{Command, DialogueMessage, MessageKind};
use crate::transport::{ConsumerHandle, DeliveryHandler, QueueTransport, TransportError};

/// Unique identifier for a dialogue; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogueId(pub Uuid);

impl DialogueId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DialogueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DialogueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names of the three queues of a dialogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub events: String,
    pub responses: String,
    pub commands: String,
}

impl QueueNames {
    /// Queue names derived from a dialogue id
    pub fn for_dialogue(id: &DialogueId) -> Self {
        Self {
            events: format!("events_{}", id),
            responses: format!("responses_{}", id),
            commands: format!("commands_{}", id),
        }
    }

    /// Events, responses and commands queue, in that order
    pub fn all(&self) -> [&str; 3] {
        [&self.events, &self.responses, &self.commands]
    }
}

/// Why a dialogue was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The entity that created the dialogue left the application
    PrimaryEnded,
    /// The health monitor found one of its queues missing
    QueueMissing,
    /// Closed through the administrative surface
    Administrative,
    /// Released while still being created
    CreationFailed,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::PrimaryEnded => "primary entity ended",
            CloseReason::QueueMissing => "queue missing",
            CloseReason::Administrative => "administrative close",
            CloseReason::CreationFailed => "creation failed",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// A freshly created dialogue together with its notification channels.
///
/// `commands` yields every command delivered on the command queue in
/// arrival order; `destroyed` resolves exactly once, when the dialogue is
/// closed.
pub struct NewDialogue {
    pub dialogue: Arc<Dialogue>,
    pub commands: mpsc::Receiver<Command>,
    pub destroyed: oneshot::Receiver<CloseReason>,
}

/// One call-control conversation and the three queues carrying it.
///
/// Created and destroyed by the [`SessionManager`](super::SessionManager).
/// Once closed it stays closed.
pub struct Dialogue {
    id: DialogueId,
    application: String,
    created: DateTime<Utc>,
    queues: QueueNames,
    transport: Arc<dyn QueueTransport>,
    consumer: Mutex<Option<ConsumerHandle>>,
    primary_entity_id: OnceLock<String>,
    closing: AtomicBool,
    closed: AtomicBool,
    destroyed_tx: Mutex<Option<oneshot::Sender<CloseReason>>>,
}

impl fmt::Debug for Dialogue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialogue")
            .field("id", &self.id)
            .field("application", &self.application)
            .field("created", &self.created)
            .field("primary_entity_id", &self.primary_entity_id.get())
            .field("closing", &self.is_closing())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Dialogue {
    pub(crate) fn new(
        id: DialogueId,
        application: &str,
        transport: Arc<dyn QueueTransport>,
    ) -> (Self, oneshot::Receiver<CloseReason>) {
        let (destroyed_tx, destroyed_rx) = oneshot::channel();
        let dialogue = Self {
            id,
            application: application.to_string(),
            created: Utc::now(),
            queues: QueueNames::for_dialogue(&id),
            transport,
            consumer: Mutex::new(None),
            primary_entity_id: OnceLock::new(),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            destroyed_tx: Mutex::new(Some(destroyed_tx)),
        };
        (dialogue, destroyed_rx)
    }

    /// Unique id of this dialogue
    pub fn id(&self) -> DialogueId {
        self.id
    }

    /// Application the dialogue belongs to
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Creation time
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Names of the events, responses and commands queues
    pub fn queue_names(&self) -> &QueueNames {
        &self.queues
    }

    /// The entity id whose arrival created this dialogue
    pub fn primary_entity_id(&self) -> Option<&str> {
        self.primary_entity_id.get().map(String::as_str)
    }

    /// Returns false if a primary entity was already set.
    pub fn set_primary_entity_id(&self, entity_id: &str) -> bool {
        self.primary_entity_id.set(entity_id.to_string()).is_ok()
    }

    /// Flag the dialogue to be closed once the event in flight is forwarded
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    /// Whether a close is pending after the current event
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Whether the dialogue has been destroyed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Publish an outbound message on the queue matching its kind
    pub async fn push_message(&self, message: DialogueMessage) -> Result<()> {
        if self.is_closed() {
            return Err(ProxyError::DialogueClosed(self.id.to_string()));
        }

        let queue = match message.kind() {
            MessageKind::Event => &self.queues.events,
            MessageKind::Response => &self.queues.responses,
        };
        let payload = message.encode()?;
        self.transport.publish(queue, payload).await?;
        Ok(())
    }

    /// Passive check that all three queues still exist
    pub async fn check_alive(&self) -> Result<bool> {
        for queue in self.queues.all() {
            if !self.transport.queue_exists(queue).await? {
                debug!(dialogue_id = %self.id, %queue, "Dialogue queue is missing");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) async fn start_consumer(&self, commands: mpsc::Sender<Command>) -> Result<()> {
        let handler = Arc::new(CommandDelivery {
            dialogue_id: self.id,
            application: self.application.clone(),
            commands,
        });
        let handle = self.transport.consume(&self.queues.commands, handler).await?;
        *self.consumer.lock() = Some(handle);
        Ok(())
    }

    /// Stop consuming, release the queues and notify the owner.
    ///
    /// Returns false if the dialogue was already closed.
    pub(crate) async fn shutdown(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        // The consumer goes first so no command is delivered into a dialogue being torn down.
        let consumer = self.consumer.lock().take();
        if let Some(handle) = consumer {
            if let Err(e) = self.transport.cancel_consumer(&handle).await {
                warn!(dialogue_id = %self.id, error = %e, "Failed to cancel command consumer");
            }
        }

        for queue in self.queues.all() {
            if let Err(e) = self.transport.close_queue(queue).await {
                warn!(dialogue_id = %self.id, %queue, error = %e, "Failed to close dialogue queue");
            }
        }

        let destroyed = self.destroyed_tx.lock().take();
        if let Some(tx) = destroyed {
            let _ = tx.send(reason);
        }

        debug!(dialogue_id = %self.id, application = %self.application, %reason, "Dialogue closed");
        true
    }
}

/// Consumer of a dialogue's command queue
struct CommandDelivery {
    dialogue_id: DialogueId,
    application: String,
    commands: mpsc::Sender<Command>,
}

#[async_trait]
impl DeliveryHandler for CommandDelivery {
    async fn on_message(&self, payload: Bytes) -> Result<()> {
        let command = Command::decode(&payload).map_err(|e| {
            warn!(dialogue_id = %self.dialogue_id, error = %e, "Undecodable command");
            e
        })?;

        // Acknowledged only once the command is queued for execution.
        self.commands
            .send(command)
            .await
            .map_err(|_| ProxyError::DialogueClosed(self.dialogue_id.to_string()))
    }

    async fn on_error(&self, error: TransportError) {
        error!(
            dialogue_id = %self.dialogue_id,
            application = %self.application,
            error = %error,
            "Command consumer error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CommandResult;
    use crate::transport::{MemoryQueueTransport, QueueOptions};

    async fn open(transport: &Arc<MemoryQueueTransport>) -> (Dialogue, oneshot::Receiver<CloseReason>) {
        let id = DialogueId::new();
        let names = QueueNames::for_dialogue(&id);
        for queue in names.all() {
            transport.declare_queue(queue, &QueueOptions::default()).await.unwrap();
        }
        Dialogue::new(id, "app1", transport.clone())
    }

    #[test]
    fn test_queue_names() {
        let id = DialogueId::new();
        let names = QueueNames::for_dialogue(&id);
        assert_eq!(names.events, format!("events_{}", id));
        assert_eq!(names.responses, format!("responses_{}", id));
        assert_eq!(names.commands, format!("commands_{}", id));
    }

    #[tokio::test]
    async fn test_push_dispatches_by_kind() {
        let transport = Arc::new(MemoryQueueTransport::new());
        let (dialogue, _destroyed) = open(&transport).await;

        dialogue
            .push_message(DialogueMessage::Response(CommandResult::failed("r1")))
            .await
            .unwrap();

        assert_eq!(transport.len(&dialogue.queue_names().responses), Some(1));
        assert_eq!(transport.len(&dialogue.queue_names().events), Some(0));
    }

    #[tokio::test]
    async fn test_shutdown_notifies_once() {
        let transport = Arc::new(MemoryQueueTransport::new());
        let (dialogue, destroyed) = open(&transport).await;

        assert!(dialogue.shutdown(CloseReason::Administrative).await);
        assert!(!dialogue.shutdown(CloseReason::Shutdown).await);
        assert_eq!(destroyed.await.unwrap(), CloseReason::Administrative);
        assert!(dialogue
            .push_message(DialogueMessage::Response(CommandResult::failed("late")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_check_alive_detects_missing_queue() {
        let transport = Arc::new(MemoryQueueTransport::new());
        let (dialogue, _destroyed) = open(&transport).await;
        assert!(dialogue.check_alive().await.unwrap());

        transport.delete_queue(&dialogue.queue_names().responses);
        assert!(!dialogue.check_alive().await.unwrap());
    }

    #[test]
    fn test_primary_entity_set_once() {
        let transport: Arc<dyn QueueTransport> = Arc::new(MemoryQueueTransport::new());
        let (dialogue, _destroyed) = Dialogue::new(DialogueId::new(), "app1", transport);
        assert!(dialogue.set_primary_entity_id("C1"));
        assert!(!dialogue.set_primary_entity_id("C2"));
        assert_eq!(dialogue.primary_entity_id(), Some("C1"));
    }
}
