//! Conversation state types

use super::survey::Survey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Participants
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl Customer {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Who authored a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sender {
    Bot,
    User,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::Bot => "BOT",
            Sender::User => "USER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BOT" => Some(Sender::Bot),
            "USER" => Some(Sender::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transcript entry. Append-only; ordering is insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Completed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConversationStatus::Active),
            "completed" => Some(ConversationStatus::Completed),
            _ => None,
        }
    }
}

/// Per-conversation record owned by the store.
///
/// The state machine receives a copy, returns an updated copy, and never
/// keeps a reference across turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub customer_id: String,
    pub survey_id: String,
    /// Never decreases, never exceeds the number of questions
    pub current_question_index: usize,
    /// question id (or `detailed_feedback`) -> raw user input
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub status: ConversationStatus,
    /// Set between the feedback-offer answer and the elaboration reply
    #[serde(default)]
    pub awaiting_detailed_feedback: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A fresh conversation positioned on the first question
    pub fn new(
        id: impl Into<String>,
        customer_id: impl Into<String>,
        survey_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            customer_id: customer_id.into(),
            survey_id: survey_id.into(),
            current_question_index: 0,
            answers: BTreeMap::new(),
            messages: Vec::new(),
            status: ConversationStatus::Active,
            awaiting_detailed_feedback: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ConversationStatus::Completed
    }

    pub fn phase(&self) -> TurnPhase {
        if self.is_completed() {
            TurnPhase::Completed
        } else if self.awaiting_detailed_feedback {
            TurnPhase::AwaitingElaboration
        } else {
            TurnPhase::AwaitingAnswer {
                index: self.current_question_index,
            }
        }
    }
}

/// The three logical states of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingAnswer { index: usize },
    AwaitingElaboration,
    Completed,
}

/// Finalized answers, written once when a conversation completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub conversation_id: String,
    pub customer_id: String,
    pub survey_id: String,
    pub answers: BTreeMap<String, String>,
    pub completed_at: DateTime<Utc>,
}

impl SurveyResponse {
    pub fn snapshot(conversation: &Conversation, completed_at: DateTime<Utc>) -> Self {
        Self {
            conversation_id: conversation.id.clone(),
            customer_id: conversation.customer_id.clone(),
            survey_id: conversation.survey_id.clone(),
            answers: conversation.answers.clone(),
            completed_at,
        }
    }
}

// ============================================================================
// Turn context
// ============================================================================

/// Immutable inputs for a single turn
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub survey: &'a Survey,
    pub customer: &'a Customer,
    /// Timestamp stamped onto state changes made by this turn
    pub now: DateTime<Utc>,
}

impl<'a> TurnContext<'a> {
    pub fn new(survey: &'a Survey, customer: &'a Customer, now: DateTime<Utc>) -> Self {
        Self {
            survey,
            customer,
            now,
        }
    }
}
