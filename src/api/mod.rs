//! HTTP API: inbound chat events, wallet registration, per-user history,
//! health and ledger statistics

use crate::config::ApiConfig;
use crate::conversation::{ConversationMachine, ConversationSession, Reply, UserEvent};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ledger::{Ledger, LedgerStats, Transaction};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 200;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub machine: Arc<ConversationMachine>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> OrchestratorResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Config(format!("cannot bind API on {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/events", post(handle_event))
        .route(
            "/users/:user_id/wallet",
            get(get_wallet).post(connect_wallet).delete(disconnect_wallet),
        )
        .route("/users/:user_id/session", get(get_session))
        .route("/users/:user_id/transactions", get(get_transactions))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Maps internal failures to a JSON error body
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("API request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - ledger reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.ledger.health_check().await.is_ok();
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: database,
            database,
        }),
    )
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<LedgerStats>, ApiError> {
    Ok(Json(state.ledger.stats().await?))
}

/// Inbound chat event
async fn handle_event(
    State(state): State<AppState>,
    Json(request): Json<EventRequest>,
) -> Json<Reply> {
    Json(state.machine.handle(&request.user_id, request.event).await)
}

async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<WalletResponse>, ApiError> {
    let address = state.machine.wallets().connected_wallet(&user_id).await?;
    Ok(Json(WalletResponse { user_id, address }))
}

/// Called by the wallet-connect collaborator once the handshake completes
async fn connect_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<WalletRequest>,
) -> Result<Json<WalletResponse>, ApiError> {
    let address = request.address.trim().to_string();
    if address.is_empty() {
        return Err(ApiError(
            crate::error::ValidationError::InvalidAddress.into(),
        ));
    }

    state.machine.wallets().connect(&user_id, &address).await?;
    Ok(Json(WalletResponse {
        user_id,
        address: Some(address),
    }))
}

async fn disconnect_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.machine.wallets().disconnect(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Option<ConversationSession>>, ApiError> {
    Ok(Json(state.machine.session(&user_id).await?))
}

async fn get_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(
        state.ledger.transactions_for_user(&user_id, limit).await?,
    ))
}

// Request types

#[derive(Deserialize)]
struct EventRequest {
    user_id: String,
    event: UserEvent,
}

#[derive(Deserialize)]
struct WalletRequest {
    address: String,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
}

#[derive(Serialize)]
struct WalletResponse {
    user_id: String,
    address: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
