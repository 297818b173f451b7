//! Administrative REST API
//!
//! # Endpoints
//!
//! - `GET /health` - liveness and a few gauges
//! - `GET /v1/applications` - list applications
//! - `POST /v1/applications/:name` - register and start an application
//! - `DELETE /v1/applications/:name` - stop an application
//! - `GET /v1/applications/:name/dialogues` - dialogues of an application
//! - `DELETE /v1/applications/:name/dialogues/:id` - close a dialogue
//! - `GET /v1/applications/:name/stats` - counters of an application
//! - `POST /v1/config/save` - write the running configuration to disk
//! - `POST /v1/config/reload` - reread the configuration file

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use ariproxy_core::config::ProxyConfig;
use ariproxy_core::proxy::{ApplicationRegistry, ApplicationSummary, DialogueSummary, ProxyStats};
use ariproxy_core::ProxyError;

/// Shared state of the admin handlers
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<ApplicationRegistry>,
    pub config: Arc<RwLock<ProxyConfig>>,
    /// File the configuration is saved to and reloaded from
    pub config_path: Option<PathBuf>,
}

/// Router serving every admin endpoint over `state`
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/applications", get(list_applications))
        .route(
            "/v1/applications/:name",
            post(create_application).delete(delete_application),
        )
        .route("/v1/applications/:name/dialogues", get(list_dialogues))
        .route("/v1/applications/:name/dialogues/:id", delete(close_dialogue))
        .route("/v1/applications/:name/stats", get(application_stats))
        .route("/v1/config/save", post(save_config))
        .route("/v1/config/reload", post(reload_config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub server_id: String,
    pub applications: usize,
    pub active_dialogues: usize,
}

async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    let server_id = state.config.read().await.server_id.clone();
    Json(HealthResponse {
        status: "ok",
        server_id,
        applications: state.registry.list().await.len(),
        active_dialogues: state.registry.backend().active_count(),
    })
}

async fn list_applications(State(state): State<AdminState>) -> Json<Vec<ApplicationSummary>> {
    Json(state.registry.list().await)
}

/// Registering an application adds it to the running configuration; it is
/// persisted only by an explicit save.
#[instrument(skip(state))]
async fn create_application(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let proxy = state.registry.create(&name).await?;

    let mut config = state.config.write().await;
    if !config.applications.contains(&name) {
        config.applications.push(name.clone());
    }

    let summary = ApplicationSummary {
        name: proxy.name().to_string(),
        created: proxy.created(),
        dialogue_count: 0,
    };
    Ok((StatusCode::CREATED, Json(summary)))
}

#[instrument(skip(state))]
async fn delete_application(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.remove(&name).await?;
    state.config.write().await.applications.retain(|app| app != &name);
    Ok(StatusCode::NO_CONTENT)
}

async fn list_dialogues(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<DialogueSummary>>, ApiError> {
    Ok(Json(state.registry.dialogues(&name).await?))
}

#[instrument(skip(state))]
async fn close_dialogue(
    State(state): State<AdminState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.registry.close_dialogue(&name, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn application_stats(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<ProxyStats>, ApiError> {
    Ok(Json(state.registry.stats(&name).await?))
}

#[instrument(skip(state))]
async fn save_config(State(state): State<AdminState>) -> Result<impl IntoResponse, ApiError> {
    let path = state
        .config_path
        .clone()
        .ok_or_else(|| ApiError::BadRequest("no configuration file in use".to_string()))?;

    state.config.read().await.save(&path)?;
    info!(path = %path.display(), "Configuration saved");
    Ok(Json(json!({ "saved": path.display().to_string() })))
}

/// Reread the configuration file and align the running applications with it.
#[instrument(skip(state))]
async fn reload_config(State(state): State<AdminState>) -> Result<impl IntoResponse, ApiError> {
    let path = state
        .config_path
        .clone()
        .ok_or_else(|| ApiError::BadRequest("no configuration file in use".to_string()))?;

    let reloaded = ProxyConfig::load(&path)?;
    let wanted: HashSet<String> = reloaded.applications.iter().cloned().collect();
    let running: HashSet<String> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|summary| summary.name)
        .collect();

    for name in running.difference(&wanted) {
        state.registry.remove(name).await?;
    }
    for name in wanted.difference(&running) {
        if let Err(e) = state.registry.create(name).await {
            warn!(application = %name, error = %e, "Failed to start application from reloaded configuration");
        }
    }

    let applications = reloaded.applications.clone();
    *state.config.write().await = reloaded;
    info!(path = %path.display(), "Configuration reloaded");
    Ok(Json(json!({ "applications": applications })))
}

/// Error returned by admin handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::ApplicationExists(_) | ProxyError::Config(_) => Self::BadRequest(err.to_string()),
            ProxyError::ApplicationNotFound(_) | ProxyError::DialogueNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
