//! HTTP API.
//!
//! Endpoints:
//! - `POST /api/v1/packets` submit a device command
//! - `GET /api/v1/messages` query stored messages
//! - `GET /api/v1/sse` live stream of processed payloads
//! - `GET /ping`, `GET /health` liveness and readiness
//! - `GET /rereadenv` reload configuration

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::broadcast::{Broadcaster, StreamEvent};
use crate::broker::{BrokerError, Publisher};
use crate::config::SharedConfig;
use crate::service::{
    MessageQuery, MessageView, Packet, QueryService, ServiceError, SubmissionService,
};
use crate::storage::MessageStore;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub submissions: Arc<SubmissionService>,
    pub queries: Arc<QueryService>,
    pub broadcaster: Broadcaster,
    pub store: Arc<dyn MessageStore>,
    pub publisher: Arc<dyn Publisher>,
    pub config: SharedConfig,
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Build the axum router (separated for testing).
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/packets", post(submit_packet))
        .route("/api/v1/messages", get(get_messages))
        .route("/api/v1/sse", get(stream_events))
        .route("/ping", get(ping))
        .route("/health", get(health))
        .route("/rereadenv", get(reread_env))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Error response with a JSON `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match &err {
            ServiceError::InvalidRequest(_) => Self::bad_request(err.to_string()),
            ServiceError::Broker(BrokerError::NotConnected) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ServiceError::Broker(_) => Self::new(StatusCode::BAD_GATEWAY, err.to_string()),
            ServiceError::Storage(e) => {
                error!(error = %e, "Storage failure while handling request");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn submit_packet(
    State(state): State<AppState>,
    packet: Result<Json<Packet>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(packet) = packet?;
    let submission = state.submissions.submit(&packet).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            message: "Packet submitted successfully",
            id: submission.id,
        }),
    ))
}

async fn get_messages(
    State(state): State<AppState>,
    query: Result<Query<MessageQuery>, QueryRejection>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let Query(query) = query?;
    let messages = state.queries.messages(&query).await?;
    Ok(Json(MessagesResponse {
        total_count: messages.len(),
        messages,
    }))
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.register();
    info!(session = %subscription.id(), "Live stream opened");

    let events = subscription
        .into_stream(state.broadcaster.keepalive())
        .map(|event| {
            Ok(match event {
                StreamEvent::Message(payload) => {
                    Event::default().event("message").data(payload.to_string())
                }
                StreamEvent::Ping => Event::default().event("ping").data(""),
            })
        });
    Sse::new(events)
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "OK",
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.store.health_check().await;
    let broker = state.publisher.is_connected();
    let status = if store && broker {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if status == StatusCode::OK { "ok" } else { "degraded" },
            store,
            broker,
            subscribers: state.broadcaster.subscriber_count(),
        }),
    )
}

async fn reread_env(State(state): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    let config = state.config.clone();
    let reloaded = tokio::task::spawn_blocking(move || config.reload())
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match reloaded {
        Ok(_) => {
            info!("Configuration reloaded");
            Ok(Json(MessageResponse {
                message: "Environment variables updated successfully",
            }))
        }
        Err(e) => {
            warn!(error = %e, "Configuration reload failed");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update environment variables: {}", e),
            ))
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
struct SubmitResponse {
    message: &'static str,
    id: i64,
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<MessageView>,
    total_count: usize,
}

#[derive(Serialize)]
struct PingResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    store: bool,
    broker: bool,
    subscribers: usize,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}
