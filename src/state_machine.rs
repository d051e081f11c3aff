//! Survey conversation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! one event in, an updated conversation plus effects out.

mod effect;
pub mod event;
pub mod state;
pub mod survey;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{
    Conversation, ConversationStatus, Customer, Message, Sender, SurveyResponse, TurnContext,
};
pub use survey::Survey;
pub use transition::{pending_prompt, transition, TurnError, TurnOutcome};
