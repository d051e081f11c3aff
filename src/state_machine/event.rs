//! Events that drive a conversation

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The customer replied to the pending prompt
    UserResponse { text: String },
    /// Re-emit the pending prompt without changing state (opening message,
    /// resumed conversations)
    Resume,
}

impl Event {
    pub fn user_response(text: impl Into<String>) -> Self {
        Event::UserResponse { text: text.into() }
    }
}
