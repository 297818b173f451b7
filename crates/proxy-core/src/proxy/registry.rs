//! Application registry
//!
//! Keeps the running [`ApplicationProxy`] of every registered application
//! and backs the administrative surface.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use super::application::{ApplicationProxy, ProxyOptions, ProxyStats};
use crate::ari::{AriRestClient, EventSource};
use crate::backend::{CloseReason, SessionManager};
use crate::errors::{ProxyError, Result};

/// Admin view of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub name: String,
    pub created: DateTime<Utc>,
    pub dialogue_count: usize,
}

/// Admin view of a dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueSummary {
    pub id: String,
    pub application: String,
    pub created: DateTime<Utc>,
}

/// Running application proxies by name
pub struct ApplicationRegistry {
    applications: Arc<RwLock<HashMap<String, Arc<ApplicationProxy>>>>,
    backend: Arc<SessionManager>,
    rest: Arc<dyn AriRestClient>,
    events: Arc<dyn EventSource>,
    options: ProxyOptions,
}

impl ApplicationRegistry {
    /// Empty registry; applications are added with [`create`](Self::create).
    pub fn new(
        backend: Arc<SessionManager>,
        rest: Arc<dyn AriRestClient>,
        events: Arc<dyn EventSource>,
        options: ProxyOptions,
    ) -> Self {
        Self {
            applications: Arc::new(RwLock::new(HashMap::new())),
            backend,
            rest,
            events,
            options,
        }
    }

    /// Session manager shared by every application
    pub fn backend(&self) -> &Arc<SessionManager> {
        &self.backend
    }

    /// Register an application and start proxying its event stream
    pub async fn create(&self, name: &str) -> Result<Arc<ApplicationProxy>> {
        let mut applications = self.applications.write().await;
        if applications.contains_key(name) {
            return Err(ProxyError::ApplicationExists(name.to_string()));
        }

        self.backend.register_application(name).await?;
        let events = self.events.subscribe(name).await?;

        let proxy = Arc::new(ApplicationProxy::new(
            name,
            self.backend.clone(),
            self.rest.clone(),
            self.options.clone(),
        ));
        proxy.start(events);
        applications.insert(name.to_string(), proxy.clone());

        info!(application = %name, "Application registered");
        Ok(proxy)
    }

    /// Stop proxying an application. Its dialogues stay with the session
    /// manager until they end on their own.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let proxy = self
            .applications
            .write()
            .await
            .remove(name)
            .ok_or_else(|| ProxyError::ApplicationNotFound(name.to_string()))?;

        proxy.stop();
        self.events.unsubscribe(name).await;
        info!(application = %name, "Application unregistered");
        Ok(())
    }

    /// A running application by name
    pub async fn get(&self, name: &str) -> Option<Arc<ApplicationProxy>> {
        self.applications.read().await.get(name).cloned()
    }

    /// Whether `name` is registered
    pub async fn contains(&self, name: &str) -> bool {
        self.applications.read().await.contains_key(name)
    }

    /// Summaries of every application, ordered by name
    pub async fn list(&self) -> Vec<ApplicationSummary> {
        let applications = self.applications.read().await;
        let mut summaries: Vec<ApplicationSummary> = applications
            .values()
            .map(|proxy| ApplicationSummary {
                name: proxy.name().to_string(),
                created: proxy.created(),
                dialogue_count: proxy.correlation().len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Dialogues of one application, oldest first
    pub async fn dialogues(&self, name: &str) -> Result<Vec<DialogueSummary>> {
        let proxy = self
            .get(name)
            .await
            .ok_or_else(|| ProxyError::ApplicationNotFound(name.to_string()))?;

        let mut dialogues: Vec<DialogueSummary> = proxy
            .dialogues()
            .iter()
            .map(|dialogue| DialogueSummary {
                id: dialogue.id().to_string(),
                application: dialogue.application().to_string(),
                created: dialogue.created(),
            })
            .collect();
        dialogues.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(dialogues)
    }

    /// Counters of one application
    pub async fn stats(&self, name: &str) -> Result<ProxyStats> {
        self.get(name)
            .await
            .map(|proxy| proxy.stats())
            .ok_or_else(|| ProxyError::ApplicationNotFound(name.to_string()))
    }

    /// Close one dialogue of an application on request of an operator.
    ///
    /// The dialogue's correlation keys are dropped together with its queues.
    pub async fn close_dialogue(&self, name: &str, dialogue_id: &str) -> Result<()> {
        let proxy = self
            .get(name)
            .await
            .ok_or_else(|| ProxyError::ApplicationNotFound(name.to_string()))?;

        let dialogue = proxy
            .dialogues()
            .into_iter()
            .find(|dialogue| dialogue.id().to_string() == dialogue_id)
            .ok_or_else(|| ProxyError::DialogueNotFound(dialogue_id.to_string()))?;

        proxy.close_dialogue(&dialogue, CloseReason::Administrative).await;
        info!(application = %name, %dialogue_id, "Dialogue closed by administrator");
        Ok(())
    }

    /// Stop every application proxy
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<ApplicationProxy>)> =
            self.applications.write().await.drain().collect();
        for (name, proxy) in drained {
            proxy.stop();
            self.events.unsubscribe(&name).await;
        }
        info!("Application registry shut down");
    }
}
