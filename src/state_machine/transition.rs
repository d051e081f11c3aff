//! Pure state transition function
//!
//! Given a conversation, the survey it runs against and one event, decide
//! the updated conversation and the effects to execute. No I/O happens
//! here; callers persist the returned state and dispatch the utterances.

use super::state::{Conversation, ConversationStatus, SurveyResponse, TurnContext, TurnPhase};
use super::survey::{Question, DETAILED_FEEDBACK_KEY};
use super::{Effect, Event};
use thiserror::Error;

/// Question whose affirmative answer opens the elaboration sub-flow
pub const FEEDBACK_OFFER_QUESTION_ID: &str = "q2";

/// Matched case-insensitively as substrings of the answer
pub const AFFIRMATIVE_TOKENS: [&str; 10] = [
    "yes",
    "yes please",
    "sure",
    "ok",
    "okay",
    "of course",
    "certainly",
    "definitely",
    "absolutely",
    "yeah",
];

pub const ELABORATION_PROMPT: &str =
    "Wonderful! Please share your thoughts. What made you choose this answer?";

/// Result of a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub conversation: Conversation,
    pub effects: Vec<Effect>,
}

impl TurnOutcome {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// Bot utterances in emission order
    pub fn utterances(&self) -> Vec<&str> {
        self.effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::SendBotMessage { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_completed(&self) -> bool {
        self.effects
            .iter()
            .any(|effect| matches!(effect, Effect::NotifyCompleted))
    }

    pub fn survey_response(&self) -> Option<&SurveyResponse> {
        self.effects.iter().find_map(|effect| match effect {
            Effect::SaveSurveyResponse(response) => Some(response),
            _ => None,
        })
    }
}

/// Errors that can occur during transition. All of them leave the stored
/// conversation untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("Conversation {0} is already completed")]
    AlreadyCompleted(String),
    #[error("Question index {index} is out of range for a survey with {len} questions")]
    QuestionOutOfRange { index: usize, len: usize },
    #[error("Malformed survey: {0}")]
    MalformedSurvey(String),
}

impl TurnError {
    /// True for errors caused by corrupted state rather than by the caller
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            TurnError::QuestionOutOfRange { .. } | TurnError::MalformedSurvey(_)
        )
    }
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs. A completed
/// conversation rejects every event.
pub fn transition(
    conversation: &Conversation,
    context: &TurnContext<'_>,
    event: Event,
) -> Result<TurnOutcome, TurnError> {
    if conversation.is_completed() {
        return Err(TurnError::AlreadyCompleted(conversation.id.clone()));
    }
    context.survey.validate().map_err(TurnError::MalformedSurvey)?;

    match (conversation.phase(), event) {
        (TurnPhase::Completed, _) => Err(TurnError::AlreadyCompleted(conversation.id.clone())),

        (_, Event::Resume) => {
            let prompt = pending_prompt(conversation, context)?;
            Ok(TurnOutcome::new(conversation.clone()).with_effect(Effect::bot_message(prompt)))
        }

        // Elaboration reply: record it and finish, bypassing the pointer
        (TurnPhase::AwaitingElaboration, Event::UserResponse { text }) => {
            let mut next = conversation.clone();
            next.answers.insert(DETAILED_FEEDBACK_KEY.to_string(), text);
            next.awaiting_detailed_feedback = false;
            Ok(complete(
                next,
                context,
                feedback_thanks_message(&context.customer.name),
            ))
        }

        (TurnPhase::AwaitingAnswer { index }, Event::UserResponse { text }) => {
            answer_question(conversation, context, index, text)
        }
    }
}

fn answer_question(
    conversation: &Conversation,
    context: &TurnContext<'_>,
    index: usize,
    text: String,
) -> Result<TurnOutcome, TurnError> {
    let survey = context.survey;
    let question = question_at(context, index)?;

    let mut next = conversation.clone();
    next.answers.insert(question.id.clone(), text.clone());
    next.updated_at = context.now;

    // Feedback offer accepted: wait for the free-text reply at the same index
    if question.id == FEEDBACK_OFFER_QUESTION_ID && is_affirmative(&text) {
        next.awaiting_detailed_feedback = true;
        return Ok(TurnOutcome::new(next)
            .with_effect(Effect::PersistConversation)
            .with_effect(Effect::bot_message(ELABORATION_PROMPT)));
    }

    let next_index = index + 1;
    if next_index >= survey.len() {
        return Ok(complete(
            next,
            context,
            completion_message(&context.customer.name),
        ));
    }

    next.current_question_index = next_index;
    let next_question = question_at(context, next_index)?;

    // A recognised option is acknowledged by name; the acknowledgment leads
    // into the next question instead of the formatted prompt.
    let utterance = match question.option_by_id(&text) {
        Some(option) => format!(
            "Great choice! {} is a classic favorite. {}",
            option.text, next_question.text
        ),
        None => format_question_prompt(&context.customer.name, next_question),
    };

    Ok(TurnOutcome::new(next)
        .with_effect(Effect::PersistConversation)
        .with_effect(Effect::bot_message(utterance)))
}

fn complete(mut next: Conversation, context: &TurnContext<'_>, farewell: String) -> TurnOutcome {
    next.status = ConversationStatus::Completed;
    next.updated_at = context.now;
    let response = SurveyResponse::snapshot(&next, context.now);

    // Response first: a conversation is never stored as completed without it
    TurnOutcome::new(next).with_effects([
        Effect::SaveSurveyResponse(response),
        Effect::PersistConversation,
        Effect::bot_message(farewell),
        Effect::NotifyCompleted,
    ])
}

fn question_at<'a>(context: &TurnContext<'a>, index: usize) -> Result<&'a Question, TurnError> {
    context
        .survey
        .question(index)
        .ok_or(TurnError::QuestionOutOfRange {
            index,
            len: context.survey.len(),
        })
}

/// The prompt the customer is currently expected to answer
pub fn pending_prompt(
    conversation: &Conversation,
    context: &TurnContext<'_>,
) -> Result<String, TurnError> {
    match conversation.phase() {
        TurnPhase::Completed => Err(TurnError::AlreadyCompleted(conversation.id.clone())),
        TurnPhase::AwaitingElaboration => Ok(ELABORATION_PROMPT.to_string()),
        TurnPhase::AwaitingAnswer { index } => {
            let question = question_at(context, index)?;
            Ok(format_question_prompt(&context.customer.name, question))
        }
    }
}

/// Case-insensitive substring match against [`AFFIRMATIVE_TOKENS`]
pub fn is_affirmative(text: &str) -> bool {
    let lowered = text.to_lowercase();
    AFFIRMATIVE_TOKENS
        .iter()
        .any(|token| lowered.contains(token))
}

pub fn format_question_prompt(customer_name: &str, question: &Question) -> String {
    if question.is_open_ended() {
        return format!(
            "{}\nPlease share your answer in your own words.",
            question.text
        );
    }

    let options = question
        .options
        .iter()
        .map(|option| format!("{} - {}", option.id, option.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Hello {customer_name}! {}\nHere are your options:\n{options}\n\nPlease reply with the number corresponding to your choice.",
        question.text
    )
}

fn completion_message(customer_name: &str) -> String {
    format!(
        "Thank you for your time, {customer_name}! Your response has been recorded. Have a wonderful day!"
    )
}

fn feedback_thanks_message(customer_name: &str) -> String {
    format!(
        "Thank you for your feedback, {customer_name}! Your response has been recorded. Have a wonderful day!"
    )
}
