//! Shared helpers for the proxy-core integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;

use ariproxy_core::ari::{AriEvent, AriRequest, AriResponse, AriRestClient};
use ariproxy_core::backend::{Dialogue, SessionManager};
use ariproxy_core::config::{BackendConfig, QueueConfig};
use ariproxy_core::errors::{ProxyError, Result};
use ariproxy_core::messages::{Command, CommandResult, EventEnvelope};
use ariproxy_core::proxy::{ApplicationProxy, CorrelationKey, ProxyOptions};
use ariproxy_core::transport::{
    ConsumerHandle, DeliveryHandler, MemoryQueueTransport, QueueOptions, QueueTransport, TransportError,
};

/// REST client recording every request it receives
#[derive(Default)]
pub struct MockRestClient {
    requests: Mutex<Vec<AriRequest>>,
    responses: Mutex<HashMap<String, AriResponse>>,
    failing: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockRestClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer requests for `path` with the given status and body
    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.responses.lock().insert(
            path.to_string(),
            AriResponse {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Fail every request at the transport level
    pub fn fail_requests(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Hold every request after it is recorded until [`release`](Self::release)
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn requests(&self) -> Vec<AriRequest> {
        self.requests.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.path.clone()).collect()
    }
}

#[async_trait]
impl AriRestClient for MockRestClient {
    async fn execute(&self, request: AriRequest) -> Result<AriResponse> {
        let path = request.path.clone();
        self.requests.lock().push(request);

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(ProxyError::Rest("connection refused".to_string()));
        }

        Ok(self.responses.lock().get(&path).cloned().unwrap_or(AriResponse {
            status: 204,
            body: String::new(),
        }))
    }
}

/// Transport whose declarations can be switched to fail
pub struct FlakyTransport {
    pub inner: MemoryQueueTransport,
    fail_declare: AtomicBool,
}

impl FlakyTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryQueueTransport::new(),
            fail_declare: AtomicBool::new(false),
        })
    }

    pub fn fail_declarations(&self) {
        self.fail_declare.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueTransport for FlakyTransport {
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> std::result::Result<(), TransportError> {
        if self.fail_declare.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("broker unreachable".to_string()));
        }
        self.inner.declare_queue(name, options).await
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> std::result::Result<(), TransportError> {
        self.inner.publish(queue, payload).await
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> std::result::Result<ConsumerHandle, TransportError> {
        self.inner.consume(queue, handler).await
    }

    async fn cancel_consumer(&self, handle: &ConsumerHandle) -> std::result::Result<(), TransportError> {
        self.inner.cancel_consumer(handle).await
    }

    async fn close_queue(&self, name: &str) -> std::result::Result<(), TransportError> {
        self.inner.close_queue(name).await
    }

    async fn queue_exists(&self, name: &str) -> std::result::Result<bool, TransportError> {
        self.inner.queue_exists(name).await
    }
}

/// Backend configuration keeping dialogue queues around after close so
/// their content can be inspected
pub fn backend_config() -> BackendConfig {
    BackendConfig {
        dialogue_queue: QueueConfig::default(),
        check_for_closed_dialogues: false,
        ..BackendConfig::default()
    }
}

pub struct Harness {
    pub transport: Arc<MemoryQueueTransport>,
    pub backend: Arc<SessionManager>,
    pub rest: Arc<MockRestClient>,
    pub proxy: Arc<ApplicationProxy>,
}

impl Harness {
    pub fn new(application: &str) -> Self {
        Self::with_config(application, backend_config(), ProxyOptions::default())
    }

    pub fn with_config(application: &str, config: BackendConfig, options: ProxyOptions) -> Self {
        let transport = Arc::new(MemoryQueueTransport::new());
        let backend = Arc::new(SessionManager::new(transport.clone(), config, "test-server"));
        backend.start();
        let rest = MockRestClient::new();
        let proxy = Arc::new(ApplicationProxy::new(application, backend.clone(), rest.clone(), options));
        Self {
            transport,
            backend,
            rest,
            proxy,
        }
    }

    pub fn dialogue_for(&self, channel_id: &str) -> Option<Arc<Dialogue>> {
        self.proxy.correlation().resolve(&CorrelationKey::channel(channel_id))
    }

    pub fn events(&self, dialogue: &Dialogue) -> Vec<EventEnvelope> {
        self.transport
            .drain(&dialogue.queue_names().events)
            .iter()
            .map(|payload| serde_json::from_slice(payload).expect("event envelope"))
            .collect()
    }

    pub fn results(&self, dialogue: &Dialogue) -> Vec<CommandResult> {
        self.transport
            .drain(&dialogue.queue_names().responses)
            .iter()
            .map(|payload| serde_json::from_slice(payload).expect("command result"))
            .collect()
    }

    pub async fn send_command(&self, dialogue: &Dialogue, command: Command) {
        let payload = serde_json::to_vec(&command).expect("command json");
        self.transport
            .publish(&dialogue.queue_names().commands, Bytes::from(payload))
            .await
            .expect("publish command");
    }

    /// Wait until the dialogue's response queue holds `count` results
    pub async fn wait_for_results(&self, dialogue: &Dialogue, count: usize) -> Vec<CommandResult> {
        let queue = dialogue.queue_names().responses.clone();
        wait_until(|| self.transport.len(&queue).unwrap_or(0) >= count).await;
        self.results(dialogue)
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn command(unique_id: &str, method: &str, url: &str, body: &str) -> Command {
    Command {
        unique_id: unique_id.to_string(),
        url: url.to_string(),
        method: method.to_string(),
        body: body.to_string(),
    }
}

pub fn stasis_start(application: &str, channel_id: &str) -> AriEvent {
    AriEvent::from_value(json!({
        "type": "StasisStart",
        "application": application,
        "args": [],
        "channel": {"id": channel_id, "name": format!("PJSIP/{}", channel_id), "state": "Ring"}
    }))
    .expect("StasisStart event")
}

pub fn stasis_end(application: &str, channel_id: &str) -> AriEvent {
    AriEvent::from_value(json!({
        "type": "StasisEnd",
        "application": application,
        "channel": {"id": channel_id, "state": "Up"}
    }))
    .expect("StasisEnd event")
}

pub fn channel_event(event_type: &str, channel_id: &str) -> AriEvent {
    AriEvent::from_value(json!({
        "type": event_type,
        "channel": {"id": channel_id, "state": "Up"}
    }))
    .expect("channel event")
}

pub fn bridge_event(event_type: &str, bridge_id: &str) -> AriEvent {
    AriEvent::from_value(json!({
        "type": event_type,
        "bridge": {"id": bridge_id, "bridge_type": "mixing"}
    }))
    .expect("bridge event")
}

pub fn playback_event(event_type: &str, playback_id: &str, target_uri: &str) -> AriEvent {
    AriEvent::from_value(json!({
        "type": event_type,
        "playback": {"id": playback_id, "target_uri": target_uri, "state": "playing"}
    }))
    .expect("playback event")
}
