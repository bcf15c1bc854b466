//! HTTP front end
//!
//! Serves the OpenAI-compatible routes:
//! - `POST /v1/chat/completions` (streaming by default)
//! - `GET /v1/models`
//! - `GET /health` and `GET /` without authentication

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::config::{AuthConfig, Config};
use crate::error::{BridgeError, Result};
use crate::models::ModelRegistry;
use crate::session::{ConversationStore, SessionId};
use crate::translate::BlockRenderer;
use crate::upstream::{CredentialRotator, RequestBuilder, UpstreamClient};

use super::auth::require_bearer;
use super::chunk::ChunkEmitter;
use super::error::ProxyError;
use super::relay::{Exchange, Relay, aggregate, sse_body};
use super::types::ChatCompletionRequest;

const OWNED_BY: &str = "thinkany";

/// Shared application state for all handlers
#[derive(Debug)]
pub struct AppState {
    pub registry: ModelRegistry,
    pub store: Arc<ConversationStore>,
    pub builder: RequestBuilder,
    pub credentials: CredentialRotator,
    pub relay: Relay,
    pub auth: AuthConfig,
    /// Unix timestamp reported as `created` for every model
    pub started_at: i64,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = ModelRegistry::new(&config.models, &config.default_model)?;
        let store = Arc::new(ConversationStore::new(
            config.session.max_entries,
            Duration::from_secs(config.session.ttl_secs),
        ));
        let credentials = CredentialRotator::new(config.upstream.cookies.iter().cloned())?;
        let client = UpstreamClient::new(&config.upstream)?;
        let renderer = Arc::new(BlockRenderer::new(config.labels.clone()));

        Ok(Self {
            registry,
            builder: RequestBuilder::new(Arc::clone(&store), config.upstream.locale.clone()),
            relay: Relay::new(client, Arc::clone(&store), renderer),
            store,
            credentials,
            auth: config.auth.clone(),
            started_at: chrono::Utc::now().timestamp(),
        })
    }
}

/// The main proxy server
pub struct ProxyServer {
    config: Config,
}

impl ProxyServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Start the server and run until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let state = Arc::new(AppState::from_config(&self.config)?);
        let addr = self.config.listen_addr()?;

        tracing::info!("Starting proxy server on {addr}");
        tracing::info!(
            "Backend: {} ({} credentials, {} models)",
            self.config.upstream.base_url,
            state.credentials.len(),
            state.registry.len()
        );
        if state.auth.is_bypassed() {
            tracing::warn!("Master key equals the bypass value, bearer auth is disabled");
        } else if state.auth.enforced_key().is_none() {
            tracing::info!("No master key configured, bearer auth is disabled");
        }

        let app = create_router(state);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Proxy(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| BridgeError::Proxy(format!("Server error: {e}")))?;

        tracing::info!("Proxy server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/models", get(models_handler))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), require_bearer));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn models_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let data: Vec<serde_json::Value> = state
        .registry
        .list()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "created": state.started_at,
                "owned_by": OWNED_BY,
            })
        })
        .collect();

    Json(serde_json::json!({"object": "list", "data": data}))
}

/// Validate, compose the backend request, then stream or aggregate the answer
///
/// Only validation failures produce an error status; anything after the
/// backend call starts ends up inside the 200 response.
async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> std::result::Result<Response, ProxyError> {
    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::BadRequest(format!("Invalid request body: {e}")))?;

    let model_name = request
        .model
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.registry.default_model());
    let model = state.registry.resolve(model_name)?.clone();

    let session_id = request
        .user
        .as_deref()
        .and_then(SessionId::from_user)
        .unwrap_or_else(SessionId::generate);

    let built = state
        .builder
        .build(&session_id, &request.messages, &model)
        .await?;

    tracing::info!(
        session = %session_id,
        mode = %model.mode,
        new = built.is_new,
        "Relaying chat completion"
    );

    let exchange = Exchange {
        session_id,
        mode: model.mode,
        built,
        credential: state.credentials.next(),
    };
    let emitter = ChunkEmitter::new(model.name.clone());
    let fragments = state.relay.fragments(exchange);

    if !request.wants_stream() {
        let content = aggregate(fragments).await;
        return Ok(Json(emitter.completion(content)).into_response());
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(sse_body(fragments, emitter)))
        .map_err(|e| ProxyError::Request(format!("Failed to build response: {e}")))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
