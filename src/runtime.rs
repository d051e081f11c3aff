//! Runtime for executing survey conversations
//!
//! Owns the injected store and the retry policy. Every store call goes
//! through [`with_retry`]; turns run through the pure transition function
//! and their effects are executed in order by the executor.

mod deferred;
mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use deferred::{DeferredQueue, DeferredTask};
pub use traits::*;

use crate::retry::{with_retry, RetryPolicy};
use crate::state_machine::{
    pending_prompt, transition, Conversation, Customer, Event, Message, Sender, Survey,
    SurveyResponse, TurnContext, TurnError, TurnOutcome,
};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error("{0}")]
    NotFound(String),
    #[error("Conversation {0} is already completed")]
    ConversationCompleted(String),
}

impl RuntimeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RuntimeError::Store(e) if e.is_transient())
    }

    fn conversation_not_found(id: &str) -> Self {
        RuntimeError::NotFound(format!("Conversation not found: {id}"))
    }
}

/// Everything a client needs to render a conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub conversation: Conversation,
    pub customer: Customer,
    pub survey: Survey,
}

impl Session {
    /// The prompt the customer should answer next, if the survey is still open
    pub fn pending_prompt(&self) -> Option<String> {
        let ctx = TurnContext::new(&self.survey, &self.customer, Utc::now());
        pending_prompt(&self.conversation, &ctx).ok()
    }
}

/// Turn executor shared by every delivery adapter
#[derive(Clone)]
pub struct SurveyRuntime {
    store: Arc<dyn SurveyStore>,
    retry: RetryPolicy,
    /// Serializes the empty-transcript check and the greeting append
    opening: Arc<Mutex<()>>,
}

impl SurveyRuntime {
    pub fn new(store: Arc<dyn SurveyStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            opening: Arc::new(Mutex::new(())),
        }
    }

    async fn call<T, F, Fut>(&self, op: &str, operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        with_retry(&self.retry, op, StoreError::is_transient, operation).await
    }

    // ==================== Conversation lifecycle ====================

    /// Validate the customer and survey and create a conversation at the
    /// first question. Returns the new conversation id.
    pub async fn start_conversation(
        &self,
        customer_id: &str,
        survey_id: &str,
    ) -> Result<String, RuntimeError> {
        let id = self
            .call("create_conversation", || {
                self.store.create_conversation(customer_id, survey_id)
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound(msg) => RuntimeError::NotFound(msg),
                other => RuntimeError::Store(other),
            })?;

        tracing::info!(conv_id = %id, customer_id, survey_id, "Conversation started");
        Ok(id)
    }

    /// Send the first question. Skipped when the transcript already has
    /// messages, so neither a repeated opening nor the HTTP and duplex
    /// adapters racing each other greet twice within one process.
    pub async fn send_opening(&self, conversation_id: &str) -> Result<Vec<String>, RuntimeError> {
        let _guard = self.opening.lock().await;
        let session = self.load_session(conversation_id).await?;
        if !session.conversation.messages.is_empty() {
            tracing::debug!(conv_id = %conversation_id, "Opening already sent");
            return Ok(vec![]);
        }
        self.run_turn(&session, Event::Resume)
            .await
            .map(|(_, utterances)| utterances)
    }

    /// Append the customer's message to the transcript. Rejects unknown and
    /// completed conversations.
    pub async fn record_user_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), RuntimeError> {
        let conversation = self.get_conversation(conversation_id).await?;
        if conversation.is_completed() {
            return Err(RuntimeError::ConversationCompleted(conversation_id.to_string()));
        }

        let appended = self
            .call("append_message", || {
                self.store.append_message(conversation_id, Sender::User, content)
            })
            .await?;
        if !appended {
            return Err(RuntimeError::conversation_not_found(conversation_id));
        }
        Ok(())
    }

    /// Run one user turn against freshly loaded state and persist the result
    pub async fn process_turn(
        &self,
        conversation_id: &str,
        user_input: &str,
    ) -> Result<TurnOutcome, RuntimeError> {
        let session = self.load_session(conversation_id).await?;
        let (outcome, _) = self
            .run_turn(&session, Event::user_response(user_input))
            .await?;
        Ok(outcome)
    }

    /// Re-send whatever prompt the customer is expected to answer
    pub async fn resend_prompt(&self, conversation_id: &str) -> Result<Vec<String>, RuntimeError> {
        let session = self.load_session(conversation_id).await?;
        self.run_turn(&session, Event::Resume)
            .await
            .map(|(_, utterances)| utterances)
    }

    /// The conversation if it can be continued
    pub async fn resume(&self, conversation_id: &str) -> Result<Conversation, RuntimeError> {
        self.call("resume_conversation", || {
            self.store.resume_conversation(conversation_id)
        })
        .await?
        .ok_or_else(|| {
            RuntimeError::NotFound(format!(
                "Conversation not found or already completed: {conversation_id}"
            ))
        })
    }

    /// Conversation with its customer and survey
    pub async fn load_session(&self, conversation_id: &str) -> Result<Session, RuntimeError> {
        let conversation = self.get_conversation(conversation_id).await?;
        let customer = self
            .call("get_customer", || self.store.get_customer(&conversation.customer_id))
            .await?
            .ok_or_else(|| {
                RuntimeError::NotFound(format!("Customer not found: {}", conversation.customer_id))
            })?;
        let survey = self.get_survey(&conversation.survey_id).await?;

        Ok(Session {
            conversation,
            customer,
            survey,
        })
    }

    async fn run_turn(
        &self,
        session: &Session,
        event: Event,
    ) -> Result<(TurnOutcome, Vec<String>), RuntimeError> {
        let ctx = TurnContext::new(&session.survey, &session.customer, Utc::now());
        let outcome = transition(&session.conversation, &ctx, event).map_err(|e| match e {
            TurnError::AlreadyCompleted(id) => RuntimeError::ConversationCompleted(id),
            other => {
                tracing::error!(
                    conv_id = %session.conversation.id,
                    invariant_violation = other.is_invariant_violation(),
                    error = %other,
                    "Turn rejected"
                );
                RuntimeError::Turn(other)
            }
        })?;

        let utterances = self
            .execute_effects(&outcome.conversation, &outcome.effects)
            .await?;
        Ok((outcome, utterances))
    }

    // ==================== Reads ====================

    pub async fn list_surveys(&self) -> Result<Vec<Survey>, RuntimeError> {
        Ok(self.call("list_surveys", || self.store.list_surveys()).await?)
    }

    pub async fn get_survey(&self, survey_id: &str) -> Result<Survey, RuntimeError> {
        self.call("get_survey", || self.store.get_survey(survey_id))
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("Survey not found: {survey_id}")))
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, RuntimeError> {
        self.call("get_conversation", || self.store.get_conversation(conversation_id))
            .await?
            .ok_or_else(|| RuntimeError::conversation_not_found(conversation_id))
    }

    /// Transcript in insertion order; empty for unknown conversations
    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, RuntimeError> {
        Ok(self
            .call("get_messages", || self.store.get_messages(conversation_id))
            .await?)
    }

    pub async fn list_active_conversations(
        &self,
        customer_id: &str,
    ) -> Result<Vec<Conversation>, RuntimeError> {
        let customer = self
            .call("get_customer", || self.store.get_customer(customer_id))
            .await?;
        if customer.is_none() {
            return Err(RuntimeError::NotFound(format!("Customer not found: {customer_id}")));
        }
        Ok(self
            .call("list_active_conversations", || {
                self.store.list_active_conversations(customer_id)
            })
            .await?)
    }

    pub async fn get_survey_response(
        &self,
        conversation_id: &str,
    ) -> Result<SurveyResponse, RuntimeError> {
        self.call("get_survey_response", || {
            self.store.get_survey_response(conversation_id)
        })
        .await?
        .ok_or_else(|| {
            RuntimeError::NotFound(format!("Survey response not found: {conversation_id}"))
        })
    }
}
