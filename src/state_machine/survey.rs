//! Survey definitions
//!
//! A survey is an immutable, ordered list of questions. Questions with no
//! options are open-ended.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Answer key used for the free-text elaboration captured after the
/// feedback-offer question
pub const DETAILED_FEEDBACK_KEY: &str = "detailed_feedback";

/// A selectable option of a closed question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Token the customer submits to pick this option
    pub id: String,
    pub text: String,
}

impl QuestionOption {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Unique within the survey, used as the answer-map key
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub fn open(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            options: Vec::new(),
        }
    }

    pub fn closed(
        id: impl Into<String>,
        text: impl Into<String>,
        options: impl IntoIterator<Item = QuestionOption>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            options: options.into_iter().collect(),
        }
    }

    pub fn is_open_ended(&self) -> bool {
        self.options.is_empty()
    }

    /// Find the option whose id equals `token` exactly
    pub fn option_by_id(&self, token: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|option| option.id == token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Survey {
    pub id: String,
    pub name: String,
    pub questions: Vec<Question>,
}

impl Survey {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        questions: impl IntoIterator<Item = Question>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            questions: questions.into_iter().collect(),
        }
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Check the structural rules a survey must satisfy before a turn can
    /// run against it. Returns a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.questions.is_empty() {
            return Err(format!("survey {} has no questions", self.id));
        }

        let mut seen = HashSet::new();
        for question in &self.questions {
            if question.id == DETAILED_FEEDBACK_KEY {
                return Err(format!(
                    "question id {DETAILED_FEEDBACK_KEY} is reserved (survey {})",
                    self.id
                ));
            }
            if !seen.insert(question.id.as_str()) {
                return Err(format!(
                    "duplicate question id {} in survey {}",
                    question.id, self.id
                ));
            }
        }

        Ok(())
    }
}

/// The survey shipped with the demo data set
pub fn ice_cream_survey() -> Survey {
    Survey::new(
        "1",
        "Ice Cream Preference",
        [
            Question::closed(
                "q1",
                "Which flavor of ice cream do you prefer?",
                [
                    QuestionOption::new("1", "Vanilla"),
                    QuestionOption::new("2", "Chocolate"),
                    QuestionOption::new("3", "Strawberry"),
                ],
            ),
            Question::open(
                "q2",
                "Would you like to provide feedback on why you selected this flavor?",
            ),
        ],
    )
}
