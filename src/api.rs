//! REST API Server for financial filings question answering
//!
//! Exposes the orchestrator via HTTP endpoints, keeps each session's
//! conversation log, and renders chart answers as Plotly figures.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::chart::render_figure;
use crate::memory::{ConversationStore, ConversationTurn};
use crate::models::Answer;

pub const DEFAULT_SESSION_KEY: &str = "default";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnswerRequest {
    pub query: String,
    pub session_key: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub conversations: Arc<ConversationStore>,
}

fn session_key_or_default(session_key: Option<String>) -> String {
    session_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_KEY.to_string())
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Answer Endpoint
/// =============================

async fn answer_handler(
    State(state): State<ApiState>,
    Json(req): Json<AnswerRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Please enter a query.".into())),
        );
    }

    let session_key = session_key_or_default(req.session_key);
    info!(session_key = %session_key, "Received answer request: {}", req.query);

    let context = state.conversations.context(&session_key).await;
    let result = state
        .orchestrator
        .answer(&req.query, &session_key, &context)
        .await;

    if result.is_error() {
        let message = result.answer.as_text().unwrap_or_default().to_string();
        let mut response = ApiResponse::error(message);
        response.data = serde_json::to_value(&result).ok();
        return (StatusCode::BAD_REQUEST, Json(response));
    }

    state
        .conversations
        .record(
            &session_key,
            ConversationTurn::new(req.query.clone(), result.answer.to_log_string(), result.category.clone()),
        )
        .await;

    let mut data = serde_json::to_value(&result).unwrap_or_default();
    data["session_key"] = serde_json::json!(session_key);

    if let Answer::Chart(spec) = &result.answer {
        match render_figure(spec) {
            Ok(figure) => data["figure"] = figure,
            Err(e) => {
                warn!(chart_type = %spec.chart_type, "Chart could not be rendered: {}", e);
                data["figure"] = serde_json::Value::Null;
                if let Some(warnings) = data["warnings"].as_array_mut() {
                    warnings.push(serde_json::json!(e.to_string()));
                }
            }
        }
    }

    (StatusCode::OK, Json(ApiResponse::success(data)))
}

/// =============================
/// Session Endpoints
/// =============================

async fn history_handler(
    State(state): State<ApiState>,
    Path(session_key): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let turns: Vec<ConversationTurn> = state
        .conversations
        .history(&session_key)
        .await
        .map(|history| history.turns().cloned().collect())
        .unwrap_or_default();

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "session_key": session_key,
            "turns": turns,
        }))),
    )
}

async fn clear_memory_handler(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.clear_memory().await {
        Ok(cleared) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "cleared": cleared }))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Failed to clear memory: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>, conversations: Arc<ConversationStore>) -> Router {
    let state = ApiState {
        orchestrator,
        conversations,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/answer", post(answer_handler))
        .route("/api/sessions/:session_key/history", get(history_handler))
        .route("/api/memory/clear", post(clear_memory_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, Arc::new(ConversationStore::new()));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
