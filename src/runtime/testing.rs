//! Scripted store for testing
//!
//! Wraps an in-memory SQLite store and lets tests queue failures per
//! operation and count calls.

use super::traits::*;
use crate::db::Database;
use crate::state_machine::{Conversation, Customer, Message, Sender, Survey, SurveyResponse};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub struct ScriptedStore {
    inner: DatabaseStore,
    failures: Mutex<HashMap<&'static str, VecDeque<StoreError>>>,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: DatabaseStore::new(Database::open_in_memory().expect("in-memory database")),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an error for the next call of `op`
    pub fn fail_next(&self, op: &'static str, error: StoreError) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Queue `n` transient failures for `op`
    pub fn fail_transient(&self, op: &'static str, n: usize) {
        for _ in 0..n {
            self.fail_next(op, StoreError::Unavailable(format!("scripted {op} outage")));
        }
    }

    pub fn calls(&self, op: &str) -> u32 {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn db(&self) -> &Database {
        self.inner.inner()
    }

    fn check(&self, op: &'static str) -> StoreResult<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for ScriptedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SurveyStore for ScriptedStore {
    async fn get_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        self.check("get_conversation")?;
        self.inner.get_conversation(id).await
    }

    async fn save_conversation(&self, id: &str, conversation: &Conversation) -> StoreResult<()> {
        self.check("save_conversation")?;
        self.inner.save_conversation(id, conversation).await
    }

    async fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        self.check("get_customer")?;
        self.inner.get_customer(id).await
    }

    async fn upsert_customer(&self, customer: &Customer) -> StoreResult<()> {
        self.check("upsert_customer")?;
        self.inner.upsert_customer(customer).await
    }

    async fn get_survey(&self, id: &str) -> StoreResult<Option<Survey>> {
        self.check("get_survey")?;
        self.inner.get_survey(id).await
    }

    async fn list_surveys(&self) -> StoreResult<Vec<Survey>> {
        self.check("list_surveys")?;
        self.inner.list_surveys().await
    }

    async fn upsert_survey(&self, survey: &Survey) -> StoreResult<()> {
        self.check("upsert_survey")?;
        self.inner.upsert_survey(survey).await
    }

    async fn create_conversation(&self, customer_id: &str, survey_id: &str) -> StoreResult<String> {
        self.check("create_conversation")?;
        self.inner.create_conversation(customer_id, survey_id).await
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        content: &str,
    ) -> StoreResult<bool> {
        self.check("append_message")?;
        self.inner.append_message(conversation_id, sender, content).await
    }

    async fn get_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        self.check("get_messages")?;
        self.inner.get_messages(conversation_id).await
    }

    async fn save_survey_response(&self, response: &SurveyResponse) -> StoreResult<()> {
        self.check("save_survey_response")?;
        self.inner.save_survey_response(response).await
    }

    async fn get_survey_response(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Option<SurveyResponse>> {
        self.check("get_survey_response")?;
        self.inner.get_survey_response(conversation_id).await
    }

    async fn list_active_conversations(&self, customer_id: &str) -> StoreResult<Vec<Conversation>> {
        self.check("list_active_conversations")?;
        self.inner.list_active_conversations(customer_id).await
    }

    async fn resume_conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        self.check("resume_conversation")?;
        self.inner.resume_conversation(id).await
    }
}
