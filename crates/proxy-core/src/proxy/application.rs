//! Application proxy
//!
//! One [`ApplicationProxy`] serves one Stasis application. A single
//! dispatcher task consumes the application's event stream in order,
//! correlates each event to a dialogue (creating dialogues on
//! `StasisStart`) and forwards it. Every dialogue gets its own worker task
//! executing the commands it receives one at a time, so a slow REST call
//! only holds back the dialogue that issued it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command;
use super::correlation::{CorrelationKey, CorrelationTable, EntityKind};
use crate::ari::rest::{FAILURE_FLAG_VARIABLE, FAILURE_REASON_VARIABLE};
use crate::ari::{AriEvent, AriResponse, AriRestClient, EventPayload, StreamItem};
use crate::backend::{CloseReason, Dialogue, DialogueId, NewDialogue, SessionManager};
use crate::config::ProxyConfig;
use crate::errors::{ProxyError, Result};
use crate::messages::{Command, CommandResult, DialogueMessage, EventEnvelope};

/// Per-application behaviour switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    pub close_dialogue_on_primary_end: bool,
    /// Upper bound for a single REST call made on behalf of a command
    pub command_timeout: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            close_dialogue_on_primary_end: true,
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ProxyConfig> for ProxyOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            close_dialogue_on_primary_end: config.close_dialogue_on_primary_end,
            command_timeout: config.command_timeout(),
        }
    }
}

/// Snapshot of an application's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyStats {
    pub events_received: u64,
    pub events_forwarded: u64,
    /// Events without a dialogue to forward to
    pub events_dropped: u64,
    pub dialogues_created: u64,
    pub dialogue_creation_failures: u64,
    pub commands_executed: u64,
    /// Commands answered with a failed result
    pub command_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_received: AtomicU64,
    events_forwarded: AtomicU64,
    events_dropped: AtomicU64,
    dialogues_created: AtomicU64,
    dialogue_creation_failures: AtomicU64,
    commands_executed: AtomicU64,
    command_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Proxy of one Stasis application
pub struct ApplicationProxy {
    name: String,
    created: DateTime<Utc>,
    backend: Arc<SessionManager>,
    rest: Arc<dyn AriRestClient>,
    table: CorrelationTable,
    options: ProxyOptions,
    counters: Counters,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ApplicationProxy {
    /// Proxy for application `name`; idle until [`start`](Self::start).
    pub fn new(
        name: &str,
        backend: Arc<SessionManager>,
        rest: Arc<dyn AriRestClient>,
        options: ProxyOptions,
    ) -> Self {
        Self {
            name: name.to_string(),
            created: Utc::now(),
            backend,
            rest,
            table: CorrelationTable::new(name),
            options,
            counters: Counters::default(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Stasis application name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the proxy was created
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// The application's correlation table
    pub fn correlation(&self) -> &CorrelationTable {
        &self.table
    }

    /// Active dialogues of this application
    pub fn dialogues(&self) -> Vec<Arc<Dialogue>> {
        self.table.dialogues()
    }

    /// Current counter values
    pub fn stats(&self) -> ProxyStats {
        let c = &self.counters;
        ProxyStats {
            events_received: c.events_received.load(Ordering::Relaxed),
            events_forwarded: c.events_forwarded.load(Ordering::Relaxed),
            events_dropped: c.events_dropped.load(Ordering::Relaxed),
            dialogues_created: c.dialogues_created.load(Ordering::Relaxed),
            dialogue_creation_failures: c.dialogue_creation_failures.load(Ordering::Relaxed),
            commands_executed: c.commands_executed.load(Ordering::Relaxed),
            command_failures: c.command_failures.load(Ordering::Relaxed),
        }
    }

    /// Spawn the dispatcher consuming `events` until the stream ends or
    /// [`stop`](Self::stop) is called.
    pub fn start(self: &Arc<Self>, mut events: mpsc::Receiver<StreamItem>) {
        let proxy = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = events.recv().await {
                match item {
                    StreamItem::Event(event) => proxy.handle_event(event).await,
                    StreamItem::ConnectionState(state) => {
                        info!(application = %proxy.name, ?state, "ARI connection state changed");
                    }
                }
            }
            debug!(application = %proxy.name, "Event stream ended");
        });

        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }
        info!(application = %self.name, "Application proxy started");
    }

    /// Whether the dispatcher task is alive
    pub fn is_running(&self) -> bool {
        self.dispatcher
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop consuming events. Dialogues already created stay open and keep
    /// executing their commands.
    pub fn stop(&self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
            info!(application = %self.name, "Application proxy stopped");
        }
    }

    /// Correlate and forward one event.
    pub async fn handle_event(self: &Arc<Self>, event: AriEvent) {
        bump(&self.counters.events_received);

        match event.payload() {
            EventPayload::StasisStart { channel } => {
                let key = CorrelationKey::channel(&channel.id);
                if self.lookup(&key).is_none() {
                    if let Err(e) = self.open_dialogue(&channel.id, key).await {
                        bump(&self.counters.dialogue_creation_failures);
                        self.release_channel(&channel.id, &e).await;
                        return;
                    }
                }
            }
            EventPayload::Dial => {
                debug!(application = %self.name, event_type = %event.event_type(), "Dial events are not correlated");
                bump(&self.counters.events_dropped);
                return;
            }
            _ => {}
        }

        let keys = event.correlation_keys();
        if keys.is_empty() {
            debug!(application = %self.name, event_type = %event.event_type(), "Dropping event without correlatable entity");
            bump(&self.counters.events_dropped);
            return;
        }

        let Some(dialogue) = keys.iter().find_map(|key| self.lookup(key)) else {
            debug!(
                application = %self.name,
                event_type = %event.event_type(),
                entity_id = %keys[0].id,
                "No dialogue for event, dropping"
            );
            bump(&self.counters.events_dropped);
            return;
        };

        if let EventPayload::StasisEnd { channel } = event.payload() {
            if self.options.close_dialogue_on_primary_end
                && dialogue.primary_entity_id() == Some(channel.id.as_str())
            {
                dialogue.mark_closing();
            }
        }

        let envelope = EventEnvelope::new(self.backend.server_id(), event.event_type(), event.body().clone());
        match dialogue.push_message(DialogueMessage::Event(envelope)).await {
            Ok(()) => bump(&self.counters.events_forwarded),
            Err(e) => {
                warn!(
                    application = %self.name,
                    dialogue_id = %dialogue.id(),
                    event_type = %event.event_type(),
                    error = %e,
                    "Failed to forward event"
                );
                bump(&self.counters.events_dropped);
            }
        }

        if dialogue.is_closing() {
            self.close_dialogue(&dialogue, CloseReason::PrimaryEnded).await;
        }
    }

    /// Close a dialogue and forget its correlation keys
    pub async fn close_dialogue(&self, dialogue: &Dialogue, reason: CloseReason) -> bool {
        self.table.remove_dialogue(dialogue.id());
        self.backend.close_dialogue(dialogue, reason).await
    }

    /// Execute one command and push its result to the dialogue's response
    /// queue. A result is produced even when the REST call fails.
    pub async fn execute_command(&self, dialogue: &Dialogue, command: Command) {
        let result = match self.run_command(dialogue, &command).await {
            Ok(response) => {
                bump(&self.counters.commands_executed);
                CommandResult {
                    unique_id: command.unique_id.clone(),
                    status_code: response.status,
                    response_body: response.body,
                }
            }
            Err(e) => {
                bump(&self.counters.command_failures);
                warn!(
                    application = %self.name,
                    dialogue_id = %dialogue.id(),
                    unique_id = %command.unique_id,
                    method = %command.method,
                    url = %command.url,
                    error = %e,
                    "Command failed"
                );
                CommandResult::failed(command.unique_id.clone())
            }
        };

        if let Err(e) = dialogue.push_message(DialogueMessage::Response(result)).await {
            warn!(
                application = %self.name,
                dialogue_id = %dialogue.id(),
                unique_id = %command.unique_id,
                error = %e,
                "Failed to deliver command result"
            );
        }
    }

    async fn run_command(&self, dialogue: &Dialogue, command: &Command) -> Result<AriResponse> {
        // Events for a client-named entity can arrive before the REST call returns.
        if let Some(key) = command::creation_target(&command.method, &command.url) {
            self.table.attach(key, dialogue.id());
        }

        let prepared = command::prepare(command)?;
        if let Some(playback_id) = &prepared.playback_id {
            self.table
                .attach(CorrelationKey::new(EntityKind::Playback, playback_id), dialogue.id());
        }

        debug!(
            application = %self.name,
            dialogue_id = %dialogue.id(),
            unique_id = %command.unique_id,
            method = %prepared.request.method,
            path = %prepared.request.path,
            "Executing command"
        );

        let response = tokio::time::timeout(self.options.command_timeout, self.rest.execute(prepared.request))
            .await
            .map_err(|_| ProxyError::Rest(format!("timed out after {:?}", self.options.command_timeout)))??;

        if let Some(id) = command::response_entity_id(&response.body) {
            self.table
                .attach(CorrelationKey::new(EntityKind::CommandOrigin, &id), dialogue.id());
        }
        Ok(response)
    }

    /// The live dialogue owning `key`, dropping stale entries of dialogues
    /// closed behind the table's back.
    fn lookup(&self, key: &CorrelationKey) -> Option<Arc<Dialogue>> {
        let dialogue = self.table.resolve(key)?;
        if dialogue.is_closed() {
            self.table.remove_dialogue(dialogue.id());
            return None;
        }
        Some(dialogue)
    }

    async fn open_dialogue(self: &Arc<Self>, channel_id: &str, key: CorrelationKey) -> Result<()> {
        let NewDialogue {
            dialogue,
            commands,
            destroyed,
        } = self.backend.create_dialogue(&self.name).await?;

        dialogue.set_primary_entity_id(channel_id);
        if !self.table.insert_dialogue(dialogue.clone(), key) {
            self.backend
                .close_dialogue(&dialogue, CloseReason::CreationFailed)
                .await;
            return Err(ProxyError::session_creation(
                &self.name,
                format!("channel {} is already correlated", channel_id),
            ));
        }

        bump(&self.counters.dialogues_created);
        info!(
            application = %self.name,
            dialogue_id = %dialogue.id(),
            entity_id = %channel_id,
            "Dialogue opened"
        );

        self.spawn_worker(dialogue, commands, destroyed);
        Ok(())
    }

    fn spawn_worker(
        self: &Arc<Self>,
        dialogue: Arc<Dialogue>,
        mut commands: mpsc::Receiver<Command>,
        mut destroyed: oneshot::Receiver<CloseReason>,
    ) {
        let proxy = self.clone();
        tokio::spawn(async move {
            let id: DialogueId = dialogue.id();
            let reason = loop {
                tokio::select! {
                    biased;
                    reason = &mut destroyed => break reason.ok(),
                    command = commands.recv() => match command {
                        Some(command) => proxy.execute_command(&dialogue, command).await,
                        None => break (&mut destroyed).await.ok(),
                    },
                }
            };

            proxy.table.remove_dialogue(id);
            debug!(application = %proxy.name, dialogue_id = %id, ?reason, "Dialogue worker finished");
        });
    }

    /// Hand a channel back to the dialplan after its dialogue could not be
    /// created, flagging the failure on the channel first.
    async fn release_channel(&self, channel_id: &str, cause: &ProxyError) {
        error!(
            application = %self.name,
            entity_id = %channel_id,
            error = %cause,
            "Unable to create dialogue, releasing channel"
        );

        let reason = cause.to_string();
        for (variable, value) in [
            (FAILURE_FLAG_VARIABLE, "true"),
            (FAILURE_REASON_VARIABLE, reason.as_str()),
        ] {
            if let Err(e) = self.rest.set_channel_variable(channel_id, variable, value).await {
                warn!(entity_id = %channel_id, %variable, error = %e, "Failed to set channel variable");
            }
        }

        if let Err(e) = self.rest.continue_in_dialplan(channel_id).await {
            warn!(entity_id = %channel_id, error = %e, "Failed to continue channel in dialplan");
        }
    }
}
