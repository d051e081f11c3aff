//! HTTP request handlers

use super::types::{
    ActiveConversationsResponse, ConversationResponse, ErrorResponse, HealthResponse,
    MessageRequest, MessagesResponse, ResumeResponse, StartConversationRequest,
    StartConversationResponse, StatusResponse, SurveyListResponse,
};
use super::ws::ws_handler;
use super::AppState;
use crate::runtime::{DeferredTask, RuntimeError, StoreError};
use crate::state_machine::{Survey, SurveyResponse};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(get_version))
        // Surveys
        .route("/surveys", get(list_surveys))
        .route("/surveys/:id", get(get_survey))
        // Conversations
        .route("/conversations", post(start_conversation))
        .route("/conversations/:id", get(get_conversation))
        .route(
            "/conversations/:id/messages",
            get(get_messages).post(post_message),
        )
        .route("/conversations/:id/response", get(get_survey_response))
        .route("/conversations/:id/resume", post(resume_conversation))
        // Customers
        .route("/customers/:id/active-surveys", get(active_surveys))
        // Duplex channel
        .route("/ws/:id", get(ws_handler))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { healthy: true })
}

async fn get_version() -> &'static str {
    concat!("survey-chat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Surveys
// ============================================================

async fn list_surveys(State(state): State<AppState>) -> Result<Json<SurveyListResponse>, AppError> {
    let surveys = state.runtime.list_surveys().await?;
    Ok(Json(SurveyListResponse { surveys }))
}

async fn get_survey(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Survey>, AppError> {
    Ok(Json(state.runtime.get_survey(&id).await?))
}

// ============================================================
// Conversations
// ============================================================

async fn start_conversation(
    State(state): State<AppState>,
    Json(req): Json<StartConversationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let conversation_id = state
        .runtime
        .start_conversation(&req.customer_id, &req.survey_id)
        .await?;

    state.deferred.schedule(DeferredTask::SendOpening {
        conversation_id: conversation_id.clone(),
    });

    Ok((
        StatusCode::CREATED,
        Json(StartConversationResponse { conversation_id }),
    ))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    let conversation = state.runtime.get_conversation(&id).await?;
    Ok(Json(ConversationResponse { conversation }))
}

async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, AppError> {
    let messages = state.runtime.get_messages(&id).await?;
    Ok(Json(MessagesResponse { messages }))
}

/// Append the message now; the bot's reply is produced by a deferred task
async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.content.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Message content cannot be empty".to_string(),
        ));
    }

    state.runtime.record_user_message(&id, &req.content).await?;
    state.deferred.schedule(DeferredTask::ProcessTurn {
        conversation_id: id,
        content: req.content,
    });

    Ok((
        StatusCode::CREATED,
        Json(StatusResponse::new("message received")),
    ))
}

async fn get_survey_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SurveyResponse>, AppError> {
    Ok(Json(state.runtime.get_survey_response(&id).await?))
}

async fn resume_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResumeResponse>, AppError> {
    let conversation = state.runtime.resume(&id).await?;
    state.deferred.schedule(DeferredTask::ResendPrompt {
        conversation_id: conversation.id.clone(),
    });

    Ok(Json(ResumeResponse {
        status: "resumed".to_string(),
        conversation_id: conversation.id,
    }))
}

// ============================================================
// Customers
// ============================================================

async fn active_surveys(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<Json<ActiveConversationsResponse>, AppError> {
    let conversations = state
        .runtime
        .list_active_conversations(&customer_id)
        .await?;
    Ok(Json(ActiveConversationsResponse { conversations }))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable,
    Internal(String),
}

impl From<RuntimeError> for AppError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Store(ref store) if store.is_transient() => AppError::Unavailable,
            RuntimeError::Store(StoreError::NotFound(msg)) | RuntimeError::NotFound(msg) => {
                AppError::NotFound(msg)
            }
            RuntimeError::ConversationCompleted(_) => AppError::Conflict(e.to_string()),
            RuntimeError::Store(_) | RuntimeError::Turn(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Database service is currently unavailable. Please try again later.".to_string(),
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
