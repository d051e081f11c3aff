//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across arbitrary answer sequences.

use super::state::*;
use super::survey::*;
use super::transition::*;
use super::*;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_customer() -> Customer {
    Customer::new("1", "John Doe", "john.doe@example.com")
}

fn fresh(survey: &Survey) -> Conversation {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Conversation::new("prop-conv", "1", survey.id.clone(), created)
}

/// Drive a conversation through `inputs`, stopping at completion.
/// Returns every intermediate outcome.
fn drive(survey: &Survey, inputs: &[String]) -> Vec<TurnOutcome> {
    let customer = test_customer();
    let ctx = TurnContext::new(survey, &customer, Utc::now());
    let mut conv = fresh(survey);
    let mut outcomes = Vec::new();

    for input in inputs {
        if conv.is_completed() {
            break;
        }
        let outcome = transition(&conv, &ctx, Event::user_response(input.clone()))
            .expect("active conversation must accept answers");
        conv = outcome.conversation.clone();
        outcomes.push(outcome);
    }
    outcomes
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_option() -> impl Strategy<Value = QuestionOption> {
    ("[1-5]", "[A-Z][a-z]{2,8}").prop_map(|(id, text)| QuestionOption::new(id, text))
}

fn arb_question(id: String) -> impl Strategy<Value = Question> {
    ("[A-Z][a-z ]{4,20}\\?", proptest::collection::vec(arb_option(), 0..4))
        .prop_map(move |(text, options)| Question::closed(id.clone(), text, options))
}

/// Surveys with 1..6 questions named q1..qN, so `q2` shows up whenever
/// there are at least two
fn arb_survey() -> impl Strategy<Value = Survey> {
    (1usize..6)
        .prop_flat_map(|n| {
            (1..=n)
                .map(|i| arb_question(format!("q{i}")))
                .collect::<Vec<_>>()
        })
        .prop_map(|questions| Survey::new("prop", "Property Survey", questions))
}

fn arb_input() -> impl Strategy<Value = String> {
    prop_oneof![
        "[1-5]",
        Just("yes".to_string()),
        Just("No thanks".to_string()),
        Just("SURE".to_string()),
        "[a-zA-Z ]{1,20}",
    ]
}

fn arb_inputs() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(arb_input(), 0..12)
}

fn case_variant() -> impl Strategy<Value = (String, String)> {
    (
        proptest::sample::select(AFFIRMATIVE_TOKENS.to_vec()),
        proptest::collection::vec(any::<bool>(), 16),
    )
        .prop_map(|(token, upper)| {
            let mixed = token
                .chars()
                .zip(upper.iter().cycle())
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            (token.to_string(), mixed)
        })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_index_monotonic_and_bounded(survey in arb_survey(), inputs in arb_inputs()) {
        let mut previous = 0;
        for outcome in drive(&survey, &inputs) {
            let index = outcome.conversation.current_question_index;
            prop_assert!(index >= previous, "index went backwards: {} -> {}", previous, index);
            prop_assert!(index < survey.len(), "index {} escaped survey of {}", index, survey.len());
            previous = index;
        }
    }

    #[test]
    fn prop_completion_emits_exactly_one_response(survey in arb_survey(), inputs in arb_inputs()) {
        let outcomes = drive(&survey, &inputs);
        let responses: usize = outcomes
            .iter()
            .map(|o| o.effects.iter().filter(|e| matches!(e, Effect::SaveSurveyResponse(_))).count())
            .sum();
        let completed = outcomes.last().is_some_and(|o| o.conversation.is_completed());

        prop_assert_eq!(responses, usize::from(completed));
        for outcome in &outcomes {
            prop_assert_eq!(outcome.is_completed(), outcome.survey_response().is_some());
        }
    }

    #[test]
    fn prop_completed_is_terminal(survey in arb_survey(), inputs in arb_inputs(), extra in arb_input()) {
        let outcomes = drive(&survey, &inputs);
        if let Some(last) = outcomes.last().filter(|o| o.conversation.is_completed()) {
            let customer = test_customer();
            let ctx = TurnContext::new(&survey, &customer, Utc::now());
            let result = transition(&last.conversation, &ctx, Event::user_response(extra));
            prop_assert!(matches!(result, Err(TurnError::AlreadyCompleted(_))));
        }
    }

    #[test]
    fn prop_answer_keys_are_known(survey in arb_survey(), inputs in arb_inputs()) {
        for outcome in drive(&survey, &inputs) {
            for key in outcome.conversation.answers.keys() {
                let known = key == DETAILED_FEEDBACK_KEY
                    || survey.questions.iter().any(|q| &q.id == key);
                prop_assert!(known, "unexpected answer key {}", key);
            }
        }
    }

    #[test]
    fn prop_every_turn_speaks_once(survey in arb_survey(), inputs in arb_inputs()) {
        for outcome in drive(&survey, &inputs) {
            prop_assert_eq!(outcome.utterances().len(), 1);
            let first = &outcome.effects[0];
            if outcome.is_completed() {
                prop_assert!(matches!(first, Effect::SaveSurveyResponse(_)));
                prop_assert_eq!(&outcome.effects[1], &Effect::PersistConversation);
            } else {
                prop_assert_eq!(first, &Effect::PersistConversation);
            }
        }
    }

    #[test]
    fn prop_affirmative_matching_ignores_case((token, mixed) in case_variant(), prefix in "[a-z ]{0,6}") {
        prop_assert!(is_affirmative(&token));
        let input = format!("{prefix}{mixed}!");
        prop_assert!(is_affirmative(&input));
    }

    #[test]
    fn prop_option_id_gets_acknowledged(choice in 0usize..3) {
        let survey = ice_cream_survey();
        let option = &survey.questions[0].options[choice];
        let outcomes = drive(&survey, &[option.id.clone()]);
        let text = outcomes[0].utterances()[0];
        prop_assert!(text.starts_with("Great choice!"));
        prop_assert!(text.contains(&option.text));
    }

    #[test]
    fn prop_non_option_gets_next_prompt(text in "[a-z]{2,10}") {
        let survey = ice_cream_survey();
        let outcomes = drive(&survey, &[text]);
        let utterance = outcomes[0].utterances()[0];
        prop_assert!(!utterance.starts_with("Great choice!"));
        prop_assert!(utterance.contains("Would you like to provide feedback"));
    }

    #[test]
    fn prop_resume_never_mutates(survey in arb_survey(), inputs in arb_inputs()) {
        let customer = test_customer();
        let ctx = TurnContext::new(&survey, &customer, Utc::now());
        let conv = drive(&survey, &inputs)
            .pop()
            .map(|o| o.conversation)
            .unwrap_or_else(|| fresh(&survey));
        if !conv.is_completed() {
            let outcome = transition(&conv, &ctx, Event::Resume).unwrap();
            prop_assert_eq!(outcome.conversation, conv);
            prop_assert!(!outcome.effects.contains(&Effect::PersistConversation));
        }
    }
}
