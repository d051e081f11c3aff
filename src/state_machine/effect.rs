//! Effects produced by state transitions

use super::state::SurveyResponse;

/// Effects to be executed, in order, after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write the updated conversation back to the store
    PersistConversation,

    /// Record the finalized answers (emitted exactly once per conversation)
    SaveSurveyResponse(SurveyResponse),

    /// Append a bot utterance to the transcript and relay it to the client
    SendBotMessage { content: String },

    /// The conversation reached its terminal state
    NotifyCompleted,
}

impl Effect {
    pub fn bot_message(content: impl Into<String>) -> Self {
        Effect::SendBotMessage {
            content: content.into(),
        }
    }
}
