//! Trait abstractions for runtime I/O
//!
//! The runtime only talks to [`SurveyStore`]; tests swap in scripted
//! implementations and production wires in SQLite behind [`FlakyStore`].

use crate::db::{Database, DbError};
use crate::state_machine::{
    Conversation, Customer, Message, Sender, Survey, SurveyResponse,
};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Only unavailability is worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        if e.is_not_found() {
            StoreError::NotFound(e.to_string())
        } else if e.is_busy() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Internal(e.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence collaborator for surveys and conversations
#[async_trait]
pub trait SurveyStore: Send + Sync {
    /// Conversation with its transcript attached
    async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>>;

    /// Persist every conversation field except the transcript
    async fn save_conversation(&self, id: &str, conversation: &Conversation) -> StoreResult<()>;

    async fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>>;

    async fn upsert_customer(&self, customer: &Customer) -> StoreResult<()>;

    async fn get_survey(&self, id: &str) -> StoreResult<Option<Survey>>;

    async fn list_surveys(&self) -> StoreResult<Vec<Survey>>;

    async fn upsert_survey(&self, survey: &Survey) -> StoreResult<()>;

    /// Fails with `NotFound` when either id is unknown
    async fn create_conversation(&self, customer_id: &str, survey_id: &str) -> StoreResult<String>;

    /// Returns false when the conversation does not exist
    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        content: &str,
    ) -> StoreResult<bool>;

    async fn get_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>>;

    async fn save_survey_response(&self, response: &SurveyResponse) -> StoreResult<()>;

    async fn get_survey_response(&self, conversation_id: &str)
        -> StoreResult<Option<SurveyResponse>>;

    async fn list_active_conversations(&self, customer_id: &str) -> StoreResult<Vec<Conversation>>;

    /// `None` when unknown or already completed
    async fn resume_conversation(&self, id: &str) -> StoreResult<Option<Conversation>>;
}

// ============================================================================
// Arc implementation for trait objects
// ============================================================================

#[async_trait]
impl<T: SurveyStore + ?Sized> SurveyStore for Arc<T> {
    async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        (**self).get_conversation(id).await
    }

    async fn save_conversation(&self, id: &str, conversation: &Conversation) -> StoreResult<()> {
        (**self).save_conversation(id, conversation).await
    }

    async fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        (**self).get_customer(id).await
    }

    async fn upsert_customer(&self, customer: &Customer) -> StoreResult<()> {
        (**self).upsert_customer(customer).await
    }

    async fn get_survey(&self, id: &str) -> StoreResult<Option<Survey>> {
        (**self).get_survey(id).await
    }

    async fn list_surveys(&self) -> StoreResult<Vec<Survey>> {
        (**self).list_surveys().await
    }

    async fn upsert_survey(&self, survey: &Survey) -> StoreResult<()> {
        (**self).upsert_survey(survey).await
    }

    async fn create_conversation(&self, customer_id: &str, survey_id: &str) -> StoreResult<String> {
        (**self).create_conversation(customer_id, survey_id).await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        content: &str,
    ) -> StoreResult<bool> {
        (**self).append_message(conversation_id, sender, content).await
    }

    async fn get_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        (**self).get_messages(conversation_id).await
    }

    async fn save_survey_response(&self, response: &SurveyResponse) -> StoreResult<()> {
        (**self).save_survey_response(response).await
    }

    async fn get_survey_response(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Option<SurveyResponse>> {
        (**self).get_survey_response(conversation_id).await
    }

    async fn list_active_conversations(&self, customer_id: &str) -> StoreResult<Vec<Conversation>> {
        (**self).list_active_conversations(customer_id).await
    }

    async fn resume_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        (**self).resume_conversation(id).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a `SurveyStore`
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[allow(dead_code)] // Useful for tests
    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SurveyStore for DatabaseStore {
    async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        Ok(self.db.get_conversation(id)?)
    }

    async fn save_conversation(&self, id: &str, conversation: &Conversation) -> StoreResult<()> {
        Ok(self.db.save_conversation(id, conversation)?)
    }

    async fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        Ok(self.db.get_customer(id)?)
    }

    async fn upsert_customer(&self, customer: &Customer) -> StoreResult<()> {
        Ok(self.db.upsert_customer(customer)?)
    }

    async fn get_survey(&self, id: &str) -> StoreResult<Option<Survey>> {
        Ok(self.db.get_survey(id)?)
    }

    async fn list_surveys(&self) -> StoreResult<Vec<Survey>> {
        Ok(self.db.list_surveys()?)
    }

    async fn upsert_survey(&self, survey: &Survey) -> StoreResult<()> {
        Ok(self.db.upsert_survey(survey)?)
    }

    async fn create_conversation(&self, customer_id: &str, survey_id: &str) -> StoreResult<String> {
        let conversation = self.db.create_conversation(customer_id, survey_id)?;
        Ok(conversation.id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        content: &str,
    ) -> StoreResult<bool> {
        Ok(self.db.append_message(conversation_id, sender, content)?)
    }

    async fn get_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        Ok(self.db.get_messages(conversation_id)?)
    }

    async fn save_survey_response(&self, response: &SurveyResponse) -> StoreResult<()> {
        Ok(self.db.save_survey_response(response)?)
    }

    async fn get_survey_response(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Option<SurveyResponse>> {
        Ok(self.db.get_survey_response(conversation_id)?)
    }

    async fn list_active_conversations(&self, customer_id: &str) -> StoreResult<Vec<Conversation>> {
        Ok(self.db.list_active_conversations(customer_id)?)
    }

    async fn resume_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        Ok(self.db.resume_conversation(id)?)
    }
}

// ============================================================================
// Network simulation
// ============================================================================

/// Wraps a store with simulated remote-call latency and transient failures
pub struct FlakyStore<S> {
    inner: S,
    failure_rate: f64,
    min_latency: Duration,
    max_latency: Duration,
}

impl<S: SurveyStore> FlakyStore<S> {
    /// `failure_rate` is clamped to `[0, 1]`; a reversed latency range is
    /// swapped.
    pub fn new(inner: S, failure_rate: f64, min_latency: Duration, max_latency: Duration) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        let (min_latency, max_latency) = if min_latency <= max_latency {
            (min_latency, max_latency)
        } else {
            (max_latency, min_latency)
        };
        Self {
            inner,
            failure_rate,
            min_latency,
            max_latency,
        }
    }

    /// Sleep for the simulated round trip, then maybe fail before the call
    /// reaches the inner store
    async fn round_trip(&self, op: &'static str) -> StoreResult<()> {
        let (delay, fail) = {
            let mut rng = rand::thread_rng();
            let delay = if self.max_latency > self.min_latency {
                rng.gen_range(self.min_latency..=self.max_latency)
            } else {
                self.min_latency
            };
            (delay, rng.gen_bool(self.failure_rate))
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            tracing::debug!(op, "Simulated store failure");
            return Err(StoreError::Unavailable(format!("simulated failure in {op}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SurveyStore> SurveyStore for FlakyStore<S> {
    async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        self.round_trip("get_conversation").await?;
        self.inner.get_conversation(id).await
    }

    async fn save_conversation(&self, id: &str, conversation: &Conversation) -> StoreResult<()> {
        self.round_trip("save_conversation").await?;
        self.inner.save_conversation(id, conversation).await
    }

    async fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        self.round_trip("get_customer").await?;
        self.inner.get_customer(id).await
    }

    async fn upsert_customer(&self, customer: &Customer) -> StoreResult<()> {
        self.round_trip("upsert_customer").await?;
        self.inner.upsert_customer(customer).await
    }

    async fn get_survey(&self, id: &str) -> StoreResult<Option<Survey>> {
        self.round_trip("get_survey").await?;
        self.inner.get_survey(id).await
    }

    async fn list_surveys(&self) -> StoreResult<Vec<Survey>> {
        self.round_trip("list_surveys").await?;
        self.inner.list_surveys().await
    }

    async fn upsert_survey(&self, survey: &Survey) -> StoreResult<()> {
        self.round_trip("upsert_survey").await?;
        self.inner.upsert_survey(survey).await
    }

    async fn create_conversation(&self, customer_id: &str, survey_id: &str) -> StoreResult<String> {
        self.round_trip("create_conversation").await?;
        self.inner.create_conversation(customer_id, survey_id).await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        content: &str,
    ) -> StoreResult<bool> {
        self.round_trip("append_message").await?;
        self.inner.append_message(conversation_id, sender, content).await
    }

    async fn get_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        self.round_trip("get_messages").await?;
        self.inner.get_messages(conversation_id).await
    }

    async fn save_survey_response(&self, response: &SurveyResponse) -> StoreResult<()> {
        self.round_trip("save_survey_response").await?;
        self.inner.save_survey_response(response).await
    }

    async fn get_survey_response(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Option<SurveyResponse>> {
        self.round_trip("get_survey_response").await?;
        self.inner.get_survey_response(conversation_id).await
    }

    async fn list_active_conversations(&self, customer_id: &str) -> StoreResult<Vec<Conversation>> {
        self.round_trip("list_active_conversations").await?;
        self.inner.list_active_conversations(customer_id).await
    }

    async fn resume_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        self.round_trip("resume_conversation").await?;
        self.inner.resume_conversation(id).await
    }
}
