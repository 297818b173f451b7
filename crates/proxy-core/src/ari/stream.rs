//! ARI event stream sources

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::events::AriEvent;
use crate::errors::{ProxyError, Result};

const STREAM_BUFFER: usize = 1024;

/// State of the event stream connection of one application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// What an [`EventSource`] delivers to an application proxy
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(AriEvent),
    ConnectionState(ConnectionState),
}

/// Delivers the event stream of one Stasis application
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Start receiving events for `application`. The receiver ends once the
    /// application is unsubscribed.
    async fn subscribe(&self, application: &str) -> Result<mpsc::Receiver<StreamItem>>;

    async fn unsubscribe(&self, application: &str);
}

/// Event source fed directly by the embedding process
#[derive(Debug, Default)]
pub struct ManualEventSource {
    senders: DashMap<String, mpsc::Sender<StreamItem>>,
}

impl ManualEventSource {
    /// Source with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to the subscriber of `application`.
    pub async fn send_event(&self, application: &str, event: AriEvent) -> Result<()> {
        self.send(application, StreamItem::Event(event)).await
    }

    /// Deliver any stream item; fails when nobody is subscribed.
    pub async fn send(&self, application: &str, item: StreamItem) -> Result<()> {
        let sender = self
            .senders
            .get(application)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProxyError::ApplicationNotFound(application.to_string()))?;
        sender
            .send(item)
            .await
            .map_err(|_| ProxyError::EventStream(format!("{} is no longer listening", application)))
    }

    /// Whether `application` currently has a live subscriber
    pub fn is_subscribed(&self, application: &str) -> bool {
        self.senders.contains_key(application)
    }
}

#[async_trait]
impl EventSource for ManualEventSource {
    async fn subscribe(&self, application: &str) -> Result<mpsc::Receiver<StreamItem>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.senders.insert(application.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, application: &str) {
        self.senders.remove(application);
    }
}

/// Event source reading the ARI `/events` WebSocket, reconnecting on loss
#[derive(Debug)]
pub struct WebSocketEventSource {
    events_url: String,
    username: String,
    password: String,
    reconnect_delay: Duration,
    connections: DashMap<String, JoinHandle<()>>,
}

impl WebSocketEventSource {
    /// Source connecting to `events_url` once per subscribed application
    pub fn new(
        events_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            events_url: events_url.into(),
            username: username.into(),
            password: password.into(),
            reconnect_delay: Duration::from_secs(5),
            connections: DashMap::new(),
        }
    }

    /// Pause between reconnection attempts (default 5s)
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn application_url(&self, application: &str) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.events_url)
            .map_err(|e| ProxyError::config(format!("invalid events url {}: {}", self.events_url, e)))?;
        url.query_pairs_mut()
            .append_pair("app", application)
            .append_pair("api_key", &format!("{}:{}", self.username, self.password));
        Ok(url.to_string())
    }

    async fn run_connection(
        application: String,
        url: String,
        reconnect_delay: Duration,
        tx: mpsc::Sender<StreamItem>,
    ) {
        loop {
            match connect_async(url.as_str()).await {
                Ok((mut socket, _)) => {
                    info!(%application, "ARI event stream connected");
                    if tx.send(StreamItem::ConnectionState(ConnectionState::Connected)).await.is_err() {
                        return;
                    }

                    while let Some(message) = socket.next().await {
                        match message {
                            Ok(Message::Text(text)) => match AriEvent::from_json(&text) {
                                Ok(event) => {
                                    if tx.send(StreamItem::Event(event)).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => warn!(%application, error = %e, "Discarding malformed ARI event"),
                            },
                            Ok(Message::Close(frame)) => {
                                debug!(%application, ?frame, "ARI closed the event stream");
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(%application, error = %e, "ARI event stream failed");
                                break;
                            }
                        }
                    }

                    if tx.send(StreamItem::ConnectionState(ConnectionState::Disconnected)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(%application, error = %e, "Unable to connect to ARI event stream"),
            }

            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(reconnect_delay).await;
        }
    }
}

#[async_trait]
impl EventSource for WebSocketEventSource {
    async fn subscribe(&self, application: &str) -> Result<mpsc::Receiver<StreamItem>> {
        let url = self.application_url(application)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let task = tokio::spawn(Self::run_connection(
            application.to_string(),
            url,
            self.reconnect_delay,
            tx,
        ));
        if let Some(previous) = self.connections.insert(application.to_string(), task) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, application: &str) {
        if let Some((_, task)) = self.connections.remove(application) {
            task.abort();
            info!(%application, "ARI event stream closed");
        }
    }
}
