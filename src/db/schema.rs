//! Database schema, raw row types and seed data

use crate::state_machine::survey::ice_cream_survey;
use crate::state_machine::{Conversation, ConversationStatus, Customer, Message, Sender, Survey};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::{parse_datetime, DbError, DbResult};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS surveys (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    questions TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL,
    survey_id TEXT NOT NULL,
    current_question_index INTEGER NOT NULL DEFAULT 0,
    answers TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'active',
    awaiting_detailed_feedback BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (customer_id) REFERENCES customers(id),
    FOREIGN KEY (survey_id) REFERENCES surveys(id)
);

CREATE INDEX IF NOT EXISTS idx_conversations_customer ON conversations(customer_id, status);

CREATE TABLE IF NOT EXISTS messages (
    sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    sender TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, sequence_id);

CREATE TABLE IF NOT EXISTS survey_responses (
    conversation_id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL,
    survey_id TEXT NOT NULL,
    answers TEXT NOT NULL,
    completed_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
";

/// Customers present in every fresh database
pub fn seed_customers() -> Vec<Customer> {
    vec![
        Customer::new("1", "John Doe", "john.doe@example.com"),
        Customer::new("2", "Jane Smith", "jane.smith@example.com"),
    ]
}

/// Surveys present in every fresh database
pub fn seed_surveys() -> Vec<Survey> {
    vec![ice_cream_survey()]
}

/// A `conversations` row before its text columns are decoded
pub(super) struct ConversationRow {
    pub id: String,
    pub customer_id: String,
    pub survey_id: String,
    pub current_question_index: i64,
    pub answers: String,
    pub status: String,
    pub awaiting_detailed_feedback: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub(super) const CONVERSATION_COLUMNS: &str = "id, customer_id, survey_id, current_question_index, answers, status, awaiting_detailed_feedback, created_at, updated_at";

impl ConversationRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            survey_id: row.get(2)?,
            current_question_index: row.get(3)?,
            answers: row.get(4)?,
            status: row.get(5)?,
            awaiting_detailed_feedback: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub fn into_conversation(self, messages: Vec<Message>) -> DbResult<Conversation> {
        let current_question_index = usize::try_from(self.current_question_index).map_err(|_| {
            DbError::Corrupt(format!(
                "conversation {} has negative question index {}",
                self.id, self.current_question_index
            ))
        })?;
        let status = ConversationStatus::parse(&self.status).ok_or_else(|| {
            DbError::Corrupt(format!("conversation {} has status {:?}", self.id, self.status))
        })?;
        let answers: BTreeMap<String, String> = serde_json::from_str(&self.answers)?;

        Ok(Conversation {
            id: self.id,
            customer_id: self.customer_id,
            survey_id: self.survey_id,
            current_question_index,
            answers,
            messages,
            status,
            awaiting_detailed_feedback: self.awaiting_detailed_feedback,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

/// A `messages` row before the sender is decoded
pub(super) struct MessageRow {
    pub sender: String,
    pub content: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sender: row.get(0)?,
            content: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    pub fn into_message(self) -> DbResult<Message> {
        let sender = Sender::parse(&self.sender)
            .ok_or_else(|| DbError::Corrupt(format!("unknown sender {:?}", self.sender)))?;
        Ok(Message {
            sender,
            content: self.content,
            timestamp: parse_datetime(&self.created_at),
        })
    }
}

pub(super) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
