//! Effect execution
//!
//! Effects run strictly in the order the transition produced them. A
//! failure stops the sequence; earlier writes stay in place.

use super::{RuntimeError, SurveyRuntime};
use crate::state_machine::{Conversation, Effect, Sender};

impl SurveyRuntime {
    /// Execute the effects of one turn. Returns the bot utterances that were
    /// appended to the transcript.
    pub(super) async fn execute_effects(
        &self,
        conversation: &Conversation,
        effects: &[Effect],
    ) -> Result<Vec<String>, RuntimeError> {
        let conv_id = conversation.id.as_str();
        let mut utterances = Vec::new();

        for effect in effects {
            match effect {
                Effect::PersistConversation => {
                    self.call("save_conversation", || {
                        self.store.save_conversation(conv_id, conversation)
                    })
                    .await?;
                    tracing::debug!(
                        conv_id,
                        index = conversation.current_question_index,
                        status = conversation.status.as_str(),
                        "Conversation persisted"
                    );
                }

                Effect::SaveSurveyResponse(response) => {
                    self.call("save_survey_response", || {
                        self.store.save_survey_response(response)
                    })
                    .await?;
                    tracing::info!(
                        conv_id,
                        answers = response.answers.len(),
                        "Survey response recorded"
                    );
                }

                Effect::SendBotMessage { content } => {
                    let appended = self
                        .call("append_message", || {
                            self.store.append_message(conv_id, Sender::Bot, content)
                        })
                        .await?;
                    if !appended {
                        return Err(RuntimeError::conversation_not_found(conv_id));
                    }
                    utterances.push(content.clone());
                }

                Effect::NotifyCompleted => {
                    tracing::info!(conv_id, "Survey completed");
                }
            }
        }

        Ok(utterances)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::retry::RetryPolicy;
    use crate::runtime::testing::ScriptedStore;
    use crate::runtime::{DatabaseStore, FlakyStore, RuntimeError, StoreError, SurveyRuntime};
    use crate::state_machine::survey::DETAILED_FEEDBACK_KEY;
    use crate::state_machine::{ConversationStatus, Sender, TurnError};
    use std::sync::Arc;
    use std::time::Duration;

    fn runtime_with(store: Arc<ScriptedStore>) -> SurveyRuntime {
        SurveyRuntime::new(store, RetryPolicy::new(3, Duration::from_millis(1)))
    }

    async fn started(runtime: &SurveyRuntime) -> String {
        let id = runtime.start_conversation("1", "1").await.unwrap();
        runtime.send_opening(&id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_full_survey_with_elaboration() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store.clone());
        let id = started(&runtime).await;

        for (input, expected) in [
            ("2", "Chocolate"),
            ("yes please", "share your thoughts"),
            ("It is rich", "Thank you for your feedback"),
        ] {
            runtime.record_user_message(&id, input).await.unwrap();
            let outcome = runtime.process_turn(&id, input).await.unwrap();
            assert!(outcome.utterances()[0].contains(expected), "{input}");
        }

        let conv = runtime.get_conversation(&id).await.unwrap();
        assert_eq!(conv.status, ConversationStatus::Completed);
        assert_eq!(conv.answers[DETAILED_FEEDBACK_KEY], "It is rich");
        assert_eq!(conv.messages.len(), 7);
        assert_eq!(conv.messages[0].sender, Sender::Bot);
        assert!(conv.messages[0].content.starts_with("Hello John Doe!"));
        assert_eq!(conv.messages[1].sender, Sender::User);

        let response = runtime.get_survey_response(&id).await.unwrap();
        assert_eq!(response.answers.len(), 3);
        assert_eq!(store.calls("save_survey_response"), 1);
    }

    #[tokio::test]
    async fn test_opening_sent_once() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store);
        let id = started(&runtime).await;

        assert!(runtime.send_opening(&id).await.unwrap().is_empty());
        assert_eq!(runtime.get_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_openings_greet_once() {
        let store = FlakyStore::new(
            DatabaseStore::new(Database::open_in_memory().unwrap()),
            0.0,
            Duration::from_millis(1),
            Duration::from_millis(3),
        );
        let runtime = SurveyRuntime::new(Arc::new(store), RetryPolicy::no_retry());
        let id = runtime.start_conversation("1", "1").await.unwrap();

        let (first, second) = tokio::join!(runtime.send_opening(&id), runtime.send_opening(&id));
        let sent = first.unwrap().len() + second.unwrap().len();
        assert_eq!(sent, 1);
        assert_eq!(runtime.get_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store.clone());
        let id = started(&runtime).await;

        store.fail_transient("get_conversation", 2);
        store.fail_transient("save_conversation", 1);
        let outcome = runtime.process_turn(&id, "1").await.unwrap();

        assert!(outcome.utterances()[0].contains("Vanilla"));
        assert_eq!(
            runtime.get_conversation(&id).await.unwrap().current_question_index,
            1
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_transient_error() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store.clone());
        let id = started(&runtime).await;

        store.fail_transient("save_conversation", 3);
        let err = runtime.process_turn(&id, "1").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.calls("save_conversation"), 3);

        // Nothing after the failed save ran
        assert_eq!(runtime.get_messages(&id).await.unwrap().len(), 1);
        let conv = runtime.get_conversation(&id).await.unwrap();
        assert_eq!(conv.current_question_index, 0);
    }

    #[tokio::test]
    async fn test_failed_response_save_leaves_conversation_open() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store.clone());
        let id = started(&runtime).await;
        runtime.process_turn(&id, "2").await.unwrap();

        store.fail_transient("save_survey_response", 3);
        let err = runtime.process_turn(&id, "no thanks").await.unwrap_err();
        assert!(err.is_transient());
        let conv = runtime.get_conversation(&id).await.unwrap();
        assert_eq!(conv.status, ConversationStatus::Active);
        assert!(matches!(
            runtime.get_survey_response(&id).await,
            Err(RuntimeError::NotFound(_))
        ));

        // The customer can simply send the answer again
        let outcome = runtime.process_turn(&id, "no thanks").await.unwrap();
        assert!(outcome.is_completed());
        let response = runtime.get_survey_response(&id).await.unwrap();
        assert_eq!(response.answers["q2"], "no thanks");
        assert_eq!(
            runtime.get_conversation(&id).await.unwrap().status,
            ConversationStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_retried_completion_after_failed_save_keeps_one_response() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store.clone());
        let id = started(&runtime).await;
        runtime.process_turn(&id, "1").await.unwrap();

        store.fail_transient("save_conversation", 3);
        assert!(runtime.process_turn(&id, "nope").await.is_err());
        assert!(!runtime.get_conversation(&id).await.unwrap().is_completed());
        assert_eq!(store.calls("save_survey_response"), 1);

        runtime.process_turn(&id, "nope").await.unwrap();
        let conv = runtime.get_conversation(&id).await.unwrap();
        assert!(conv.is_completed());
        assert_eq!(store.calls("save_survey_response"), 2);
        let response = runtime.get_survey_response(&id).await.unwrap();
        assert_eq!(response.answers, conv.answers);
    }

    #[tokio::test]
    async fn test_internal_error_not_retried() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store.clone());
        let id = started(&runtime).await;

        store.fail_next("get_conversation", StoreError::Internal("disk gone".into()));
        let before = store.calls("get_conversation");
        let err = runtime.process_turn(&id, "1").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Store(StoreError::Internal(_))));
        assert_eq!(store.calls("get_conversation"), before + 1);
    }

    #[tokio::test]
    async fn test_completed_conversation_rejects_turns() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store.clone());
        let id = started(&runtime).await;

        runtime.process_turn(&id, "3").await.unwrap();
        let outcome = runtime.process_turn(&id, "no").await.unwrap();
        assert!(outcome.is_completed());

        let err = runtime.process_turn(&id, "again").await.unwrap_err();
        assert!(matches!(err, RuntimeError::ConversationCompleted(_)));
        let err = runtime.record_user_message(&id, "again").await.unwrap_err();
        assert!(matches!(err, RuntimeError::ConversationCompleted(_)));
        assert!(matches!(
            runtime.resume(&id).await,
            Err(RuntimeError::NotFound(_))
        ));
        assert_eq!(store.calls("save_survey_response"), 1);
    }

    #[tokio::test]
    async fn test_invariant_violation_writes_nothing() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store.clone());
        let id = started(&runtime).await;

        let mut conv = store.db().get_conversation(&id).unwrap().unwrap();
        conv.current_question_index = 2;
        store.db().save_conversation(&id, &conv).unwrap();
        let saves = store.calls("save_conversation");

        let err = runtime.process_turn(&id, "1").await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Turn(TurnError::QuestionOutOfRange { index: 2, len: 2 })
        ));
        assert_eq!(store.calls("save_conversation"), saves);
        assert_eq!(store.calls("append_message"), 1);
    }

    #[tokio::test]
    async fn test_resend_prompt_after_elaboration_offer() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store);
        let id = started(&runtime).await;

        runtime.process_turn(&id, "2").await.unwrap();
        runtime.process_turn(&id, "sure").await.unwrap();

        let resumed = runtime.resume(&id).await.unwrap();
        assert!(resumed.awaiting_detailed_feedback);
        let prompt = runtime.resend_prompt(&id).await.unwrap();
        assert_eq!(prompt.len(), 1);
        assert!(prompt[0].contains("share your thoughts"));
    }

    #[tokio::test]
    async fn test_start_and_lookup_not_found() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store);

        assert!(matches!(
            runtime.start_conversation("42", "1").await,
            Err(RuntimeError::NotFound(_))
        ));
        assert!(matches!(
            runtime.start_conversation("1", "42").await,
            Err(RuntimeError::NotFound(_))
        ));
        assert!(matches!(
            runtime.record_user_message("missing", "hi").await,
            Err(RuntimeError::NotFound(_))
        ));
        assert!(matches!(
            runtime.list_active_conversations("42").await,
            Err(RuntimeError::NotFound(_))
        ));
        assert!(runtime.get_messages("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_conversations_listing() {
        let store = Arc::new(ScriptedStore::new());
        let runtime = runtime_with(store);
        let first = started(&runtime).await;
        let second = started(&runtime).await;

        runtime.process_turn(&second, "1").await.unwrap();
        runtime.process_turn(&second, "nah").await.unwrap();

        let active = runtime.list_active_conversations("1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first);
        assert!(runtime.list_active_conversations("2").await.unwrap().is_empty());
    }
}
