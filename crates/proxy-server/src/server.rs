//! Process wiring: builds the proxy from a configuration and serves the
//! admin API until shutdown.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info};

use ariproxy_core::ari::{AriRestClient, EventSource, HttpAriClient, WebSocketEventSource};
use ariproxy_core::backend::SessionManager;
use ariproxy_core::config::ProxyConfig;
use ariproxy_core::proxy::{ApplicationRegistry, ProxyOptions};
use ariproxy_core::transport::{MemoryQueueTransport, QueueTransport};

use crate::api::{admin_router, AdminState};

/// A configured proxy: session manager, application registry and the
/// configuration the admin API edits.
pub struct ProxyServer {
    config: Arc<RwLock<ProxyConfig>>,
    config_path: Option<PathBuf>,
    backend: Arc<SessionManager>,
    registry: Arc<ApplicationRegistry>,
}

impl ProxyServer {
    /// Build the proxy against the ARI endpoint named in `config`.
    ///
    /// Dialogue queues are kept in process by a [`MemoryQueueTransport`];
    /// use [`with_components`](Self::with_components) to supply another
    /// transport.
    pub fn new(config: ProxyConfig, config_path: Option<PathBuf>) -> ariproxy_core::Result<Self> {
        let transport: Arc<dyn QueueTransport> = Arc::new(MemoryQueueTransport::new());
        let rest: Arc<dyn AriRestClient> = Arc::new(HttpAriClient::new(
            config.ari_base_url(),
            &config.ari_username,
            &config.ari_password,
            config.command_timeout(),
        )?);
        let events: Arc<dyn EventSource> = Arc::new(WebSocketEventSource::new(
            config.ari_events_url(),
            &config.ari_username,
            &config.ari_password,
        ));
        Ok(Self::with_components(config, config_path, transport, rest, events))
    }

    /// Build the proxy from ready-made transport, REST client and event source.
    pub fn with_components(
        config: ProxyConfig,
        config_path: Option<PathBuf>,
        transport: Arc<dyn QueueTransport>,
        rest: Arc<dyn AriRestClient>,
        events: Arc<dyn EventSource>,
    ) -> Self {
        let backend = Arc::new(SessionManager::new(
            transport,
            config.backend.clone(),
            &config.server_id,
        ));
        let registry = Arc::new(ApplicationRegistry::new(
            backend.clone(),
            rest,
            events,
            ProxyOptions::from(&config),
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            backend,
            registry,
        }
    }

    /// Running applications
    pub fn registry(&self) -> &Arc<ApplicationRegistry> {
        &self.registry
    }

    /// Session manager owning every dialogue
    pub fn backend(&self) -> &Arc<SessionManager> {
        &self.backend
    }

    /// Start the session manager and every configured application.
    ///
    /// An application failing to start is logged and skipped.
    pub async fn start(&self) {
        self.backend.start();

        let applications = self.config.read().await.applications.clone();
        for name in &applications {
            match self.registry.create(name).await {
                Ok(_) => info!(application = %name, "Application started"),
                Err(e) => error!(application = %name, error = %e, "Failed to start application"),
            }
        }
    }

    /// Admin API router over this server's state
    pub fn router(&self) -> Router {
        admin_router(AdminState {
            registry: self.registry.clone(),
            config: self.config.clone(),
            config_path: self.config_path.clone(),
        })
    }

    /// Serve the admin API until `shutdown` resolves, then stop the proxy.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let address = self.config.read().await.admin_bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind admin API to {}", address))?;
        info!(%address, "Admin API listening");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        self.shutdown().await;
        served.context("admin API server failed")
    }

    /// Stop every application, then release all dialogues and control queues.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.backend.shutdown().await;
        info!("Proxy stopped");
    }
}
