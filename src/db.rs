//! Database module for the survey service
//!
//! Provides persistence for customers, surveys, conversations, transcripts
//! and finalized survey responses.

mod schema;

pub use schema::{seed_customers, seed_surveys, SCHEMA};
use schema::{format_datetime, ConversationRow, MessageRow, CONVERSATION_COLUMNS};

use crate::state_machine::{Conversation, Customer, Message, Sender, Survey, SurveyResponse};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),
    #[error("Survey not found: {0}")]
    SurveyNotFound(String),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Database connection lock poisoned")]
    Poisoned,
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DbError::CustomerNotFound(_)
                | DbError::SurveyNotFound(_)
                | DbError::ConversationNotFound(_)
        )
    }

    /// Lock contention and I/O hiccups that a later attempt may not hit
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Create tables and insert the seed data. Existing rows are left alone,
    /// so reopening a file never duplicates or overwrites anything.
    fn initialize(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;

        for customer in seed_customers() {
            conn.execute(
                "INSERT OR IGNORE INTO customers (id, name, email) VALUES (?1, ?2, ?3)",
                params![customer.id, customer.name, customer.email],
            )?;
        }
        for survey in seed_surveys() {
            conn.execute(
                "INSERT OR IGNORE INTO surveys (id, name, questions) VALUES (?1, ?2, ?3)",
                params![survey.id, survey.name, serde_json::to_string(&survey.questions)?],
            )?;
        }
        Ok(())
    }

    // ==================== Customer Operations ====================

    pub fn get_customer(&self, id: &str) -> DbResult<Option<Customer>> {
        let conn = self.lock()?;
        let customer = conn
            .query_row(
                "SELECT id, name, email FROM customers WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Customer {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(customer)
    }

    pub fn upsert_customer(&self, customer: &Customer) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO customers (id, name, email) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email",
            params![customer.id, customer.name, customer.email],
        )?;
        Ok(())
    }

    // ==================== Survey Operations ====================

    pub fn get_survey(&self, id: &str) -> DbResult<Option<Survey>> {
        let conn = self.lock()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, name, questions FROM surveys WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(decode_survey).transpose()
    }

    pub fn list_surveys(&self) -> DbResult<Vec<Survey>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, questions FROM surveys ORDER BY id ASC")?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_survey).collect()
    }

    pub fn upsert_survey(&self, survey: &Survey) -> DbResult<()> {
        let questions = serde_json::to_string(&survey.questions)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO surveys (id, name, questions) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, questions = excluded.questions",
            params![survey.id, survey.name, questions],
        )?;
        Ok(())
    }

    // ==================== Conversation Operations ====================

    /// Create a conversation for a known customer and survey, positioned on
    /// the first question
    pub fn create_conversation(&self, customer_id: &str, survey_id: &str) -> DbResult<Conversation> {
        let conn = self.lock()?;

        let customer_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM customers WHERE id = ?1)",
            params![customer_id],
            |row| row.get(0),
        )?;
        if !customer_exists {
            return Err(DbError::CustomerNotFound(customer_id.to_string()));
        }
        let survey_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM surveys WHERE id = ?1)",
            params![survey_id],
            |row| row.get(0),
        )?;
        if !survey_exists {
            return Err(DbError::SurveyNotFound(survey_id.to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let conversation = Conversation::new(id, customer_id, survey_id, Utc::now());
        conn.execute(
            &format!("INSERT INTO conversations ({CONVERSATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                conversation.id,
                conversation.customer_id,
                conversation.survey_id,
                0i64,
                serde_json::to_string(&conversation.answers)?,
                conversation.status.as_str(),
                conversation.awaiting_detailed_feedback,
                format_datetime(&conversation.created_at),
                format_datetime(&conversation.updated_at),
            ],
        )?;

        Ok(conversation)
    }

    /// Get conversation by ID, with its transcript attached
    pub fn get_conversation(&self, id: &str) -> DbResult<Option<Conversation>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
                ConversationRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => {
                let messages = load_messages(&conn, id)?;
                row.into_conversation(messages).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Persist every field except the transcript
    pub fn save_conversation(&self, id: &str, conversation: &Conversation) -> DbResult<()> {
        let index = i64::try_from(conversation.current_question_index)
            .map_err(|_| DbError::Corrupt(format!("question index overflow on {id}")))?;
        let answers = serde_json::to_string(&conversation.answers)?;

        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE conversations
             SET current_question_index = ?1, answers = ?2, status = ?3,
                 awaiting_detailed_feedback = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                index,
                answers,
                conversation.status.as_str(),
                conversation.awaiting_detailed_feedback,
                format_datetime(&conversation.updated_at),
                id,
            ],
        )?;

        if updated == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Active conversations of a customer, oldest first
    pub fn list_active_conversations(&self, customer_id: &str) -> DbResult<Vec<Conversation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE customer_id = ?1 AND status = 'active'
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![customer_id], ConversationRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let messages = load_messages(&conn, &row.id)?;
                row.into_conversation(messages)
            })
            .collect()
    }

    /// The conversation if it exists and can still take answers
    pub fn resume_conversation(&self, id: &str) -> DbResult<Option<Conversation>> {
        Ok(self.get_conversation(id)?.filter(|c| !c.is_completed()))
    }

    // ==================== Message Operations ====================

    /// Append to a transcript. Returns false when the conversation is unknown.
    pub fn append_message(&self, conversation_id: &str, sender: Sender, content: &str) -> DbResult<bool> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![conversation_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO messages (conversation_id, sender, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, sender.as_str(), content, format_datetime(&Utc::now())],
        )?;
        Ok(true)
    }

    /// Transcript in insertion order; empty for unknown conversations
    pub fn get_messages(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.lock()?;
        load_messages(&conn, conversation_id)
    }

    // ==================== Survey Response Operations ====================

    /// Record the finalized answers. A second save for the same conversation
    /// keeps the first record.
    pub fn save_survey_response(&self, response: &SurveyResponse) -> DbResult<()> {
        let answers = serde_json::to_string(&response.answers)?;
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO survey_responses (conversation_id, customer_id, survey_id, answers, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                response.conversation_id,
                response.customer_id,
                response.survey_id,
                answers,
                format_datetime(&response.completed_at),
            ],
        )?;
        if inserted == 0 {
            tracing::debug!(conv_id = %response.conversation_id, "Survey response already recorded");
        }
        Ok(())
    }

    pub fn get_survey_response(&self, conversation_id: &str) -> DbResult<Option<SurveyResponse>> {
        let conn = self.lock()?;
        let row: Option<(String, String, String, String, String)> = conn
            .query_row(
                "SELECT conversation_id, customer_id, survey_id, answers, completed_at
                 FROM survey_responses WHERE conversation_id = ?1",
                params![conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        row.map(
            |(conversation_id, customer_id, survey_id, answers, completed_at)| -> DbResult<_> {
                Ok(SurveyResponse {
                    conversation_id,
                    customer_id,
                    survey_id,
                    answers: serde_json::from_str(&answers)?,
                    completed_at: parse_datetime(&completed_at),
                })
            },
        )
        .transpose()
    }
}

fn load_messages(conn: &Connection, conversation_id: &str) -> DbResult<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT sender, content, created_at FROM messages
         WHERE conversation_id = ?1 ORDER BY sequence_id ASC",
    )?;
    let rows = stmt
        .query_map(params![conversation_id], MessageRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(MessageRow::into_message).collect()
}

fn decode_survey((id, name, questions): (String, String, String)) -> DbResult<Survey> {
    Ok(Survey {
        id,
        name,
        questions: serde_json::from_str(&questions)?,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
