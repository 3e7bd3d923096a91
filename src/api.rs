use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::destination::Destination;
use crate::graph::{DeliveryResult, GraphClient, GraphError, PostedMessage, Rejection};
use crate::message::MessageRequest;

/// Shared state for the HTTP handlers
pub struct AppState {
    config: Arc<Config>,
    graph: GraphClient,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let graph = GraphClient::new(&config.teams).context("Failed to create Graph client")?;
        Ok(Self { config, graph })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Teams access token is not configured")]
    MissingToken,

    #[error(transparent)]
    Upstream(#[from] GraphError),
}

impl From<Rejection> for ApiError {
    /// Only a remote 404 keeps its status; every other rejection is a 400.
    fn from(rejection: Rejection) -> Self {
        if rejection.status == StatusCode::NOT_FOUND.as_u16() {
            ApiError::NotFound(rejection.message)
        } else {
            ApiError::BadRequest(rejection.message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingToken => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(e) => {
                error!("Graph request failed: {}", e);
                StatusCode::BAD_GATEWAY
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/teams/{team_id}/channels/{channel_id}/messages",
            post(send_channel_message),
        )
        .route("/chats/{chat_id}/messages", post(send_chat_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn send_channel_message(
    State(state): State<Arc<AppState>>,
    Path((team_id, channel_id)): Path<(String, String)>,
    Json(message): Json<MessageRequest>,
) -> Result<(StatusCode, Json<PostedMessage>), ApiError> {
    deliver(&state, Destination::channel(team_id, channel_id), &message).await
}

async fn send_chat_message(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    Json(message): Json<MessageRequest>,
) -> Result<(StatusCode, Json<PostedMessage>), ApiError> {
    deliver(&state, Destination::chat(chat_id), &message).await
}

async fn deliver(
    state: &AppState,
    destination: Destination,
    message: &MessageRequest,
) -> Result<(StatusCode, Json<PostedMessage>), ApiError> {
    // Read per request so the handler always sees the loaded config.
    let token = state
        .config
        .teams
        .access_token()
        .ok_or(ApiError::MissingToken)?;

    match state.graph.send(token, &destination, message).await? {
        DeliveryResult::Posted(posted) => Ok((StatusCode::CREATED, Json(posted))),
        DeliveryResult::Rejected(rejection) => Err(rejection.into()),
    }
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(config: Arc<Config>) -> Result<()> {
    if config.teams.access_token().is_none() {
        warn!("TEAMS_ACCESS_TOKEN is not set; requests will fail until it is configured");
    }

    let addr = config.server.bind_address.clone();
    let state = Arc::new(AppState::new(config)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP ingress listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("HTTP ingress shutting down");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
