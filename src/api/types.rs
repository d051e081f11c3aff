//! API request and response types

use crate::state_machine::{Conversation, Message, Survey};
use serde::{Deserialize, Serialize};

/// Request to start a conversation
#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    pub customer_id: String,
    pub survey_id: String,
}

/// Response for a newly started conversation
#[derive(Debug, Serialize, Deserialize)]
pub struct StartConversationResponse {
    pub conversation_id: String,
}

/// Request to post a customer message
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResumeResponse {
    pub status: String,
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
}

#[derive(Debug, Serialize)]
pub struct SurveyListResponse {
    pub surveys: Vec<Survey>,
}

/// Response with a single conversation, transcript included
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

/// A customer's conversations that can still be continued
#[derive(Debug, Serialize)]
pub struct ActiveConversationsResponse {
    pub conversations: Vec<Conversation>,
}

/// Query parameters of the duplex endpoint
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub reconnect: bool,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
