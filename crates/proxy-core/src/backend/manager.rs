//! Backend session manager
//!
//! Owns the queue transport on behalf of every application: one control
//! queue per registered application, the queue triads of all active
//! dialogues, and the health monitor reclaiming dialogues whose queues
//! disappeared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dialogue::{CloseReason, Dialogue, DialogueId, NewDialogue};
use super::health::HealthMonitor;
use crate::config::BackendConfig;
use crate::errors::{ProxyError, Result};
use crate::messages::{Command, NewDialogueAnnouncement};
use crate::transport::{QueueTransport, TransportError};

/// Owns every active dialogue of this proxy instance and the queues behind
/// them.
pub struct SessionManager {
    transport: Arc<dyn QueueTransport>,
    config: BackendConfig,
    server_id: String,
    /// Applications whose control queue has been declared
    applications: DashMap<String, ()>,
    active: DashMap<DialogueId, Arc<Dialogue>>,
    health: HealthMonitor,
    shut_down: AtomicBool,
}

impl SessionManager {
    /// Manager over `transport`. Call [`start`](Self::start) to enable the
    /// health monitor.
    pub fn new(transport: Arc<dyn QueueTransport>, config: BackendConfig, server_id: &str) -> Self {
        let health = HealthMonitor::new(config.health_check_interval());
        Self {
            transport,
            config,
            server_id: server_id.to_string(),
            applications: DashMap::new(),
            active: DashMap::new(),
            health,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Start background work. The health monitor only runs when closed
    /// dialogue checking is enabled.
    pub fn start(self: &Arc<Self>) {
        if self.config.check_for_closed_dialogues {
            self.health.start(Arc::downgrade(self));
            info!(
                interval_ms = self.config.health_check_interval_ms,
                "Dialogue health monitor started"
            );
        } else {
            debug!("Dialogue health monitor disabled");
        }
    }

    /// Id stamped on announcements and forwarded events
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Queue and health check settings in use
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The dialogue health monitor
    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health
    }

    /// Ensure the control queue of `application` exists. Idempotent.
    pub async fn register_application(&self, application: &str) -> Result<()> {
        self.ensure_running()?;
        if self.applications.contains_key(application) {
            return Ok(());
        }

        self.transport
            .declare_queue(application, &self.config.application_queue.to_options())
            .await?;
        self.applications.insert(application.to_string(), ());
        info!(%application, "Application control queue declared");
        Ok(())
    }

    /// Registered application names, unordered
    pub fn applications(&self) -> Vec<String> {
        self.applications.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Create a dialogue for `application` and announce it on the
    /// application's control queue.
    ///
    /// Any queue failure is reported as [`ProxyError::SessionCreation`];
    /// resources acquired by the failed attempt are released.
    pub async fn create_dialogue(&self, application: &str) -> Result<NewDialogue> {
        self.register_application(application)
            .await
            .map_err(|e| ProxyError::session_creation(application, e))?;

        let (dialogue, destroyed) =
            Dialogue::new(DialogueId::new(), application, self.transport.clone());
        let dialogue = Arc::new(dialogue);

        let commands = match self.open_dialogue(&dialogue).await {
            Ok(commands) => commands,
            Err(e) => {
                warn!(
                    %application,
                    dialogue_id = %dialogue.id(),
                    error = %e,
                    "Dialogue creation failed, releasing its queues"
                );
                dialogue.shutdown(CloseReason::CreationFailed).await;
                return Err(ProxyError::session_creation(application, e));
            }
        };

        self.active.insert(dialogue.id(), dialogue.clone());
        info!(%application, dialogue_id = %dialogue.id(), "Dialogue created");

        Ok(NewDialogue {
            dialogue,
            commands,
            destroyed,
        })
    }

    async fn open_dialogue(&self, dialogue: &Dialogue) -> Result<mpsc::Receiver<Command>> {
        let options = self.config.dialogue_queue.to_options();
        for queue in dialogue.queue_names().all() {
            self.transport.declare_queue(queue, &options).await?;
        }

        let (tx, rx) = mpsc::channel(self.config.command_buffer.max(1));
        dialogue.start_consumer(tx).await?;

        let announcement = NewDialogueAnnouncement {
            application: dialogue.application().to_string(),
            dialogue_id: dialogue.id().to_string(),
            server_id: self.server_id.clone(),
        };
        let payload = Bytes::from(serde_json::to_vec(&announcement)?);
        self.transport.publish(dialogue.application(), payload).await?;

        Ok(rx)
    }

    /// Tear down a dialogue's queues and notify its owner. Closing an
    /// already closed dialogue is a no-op returning false.
    pub async fn close_dialogue(&self, dialogue: &Dialogue, reason: CloseReason) -> bool {
        let closed = dialogue.shutdown(reason).await;
        self.active.remove(&dialogue.id());
        if closed {
            info!(
                application = %dialogue.application(),
                dialogue_id = %dialogue.id(),
                %reason,
                "Dialogue destroyed"
            );
        }
        closed
    }

    /// An active dialogue by id
    pub fn dialogue(&self, id: DialogueId) -> Option<Arc<Dialogue>> {
        self.active.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of the active dialogues
    pub fn active_dialogues(&self) -> Vec<Arc<Dialogue>> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of active dialogues
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// One health pass: close every dialogue missing any of its queues.
    /// Returns how many were closed.
    pub async fn check_dialogues(&self) -> usize {
        let mut closed = 0;
        for dialogue in self.active_dialogues() {
            match dialogue.check_alive().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        application = %dialogue.application(),
                        dialogue_id = %dialogue.id(),
                        "Dialogue queue disappeared, closing dialogue"
                    );
                    if self.close_dialogue(&dialogue, CloseReason::QueueMissing).await {
                        closed += 1;
                    }
                }
                Err(e) => {
                    warn!(dialogue_id = %dialogue.id(), error = %e, "Dialogue health check failed");
                }
            }
        }
        closed
    }

    /// Stop the health monitor, close every control queue and every still
    /// active dialogue.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.health.stop();

        let applications: Vec<String> = self.applications();
        for application in &applications {
            if let Err(e) = self.transport.close_queue(application).await {
                warn!(%application, error = %e, "Failed to close control queue");
            }
        }
        self.applications.clear();

        for dialogue in self.active_dialogues() {
            self.close_dialogue(&dialogue, CloseReason::Shutdown).await;
        }
        info!(applications = applications.len(), "Session manager shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }
}
