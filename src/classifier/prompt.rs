//! Prompt text for classifier calls

use super::schema::action_labels;
use crate::learning::{ExampleKind, LearnedExample};
use crate::types::{Action, ClassificationDecision, ConversationContext, Domain};

/// Appended to system prompts when the provider cannot enforce a schema
pub const JSON_ONLY_SUFFIX: &str =
    "Respond with a single JSON object and nothing else. Do not wrap it in markdown.";

fn action_guide(domain: Domain) -> String {
    domain
        .valid_actions()
        .iter()
        .map(|action| format!("- {}: {}", action.as_str(), describe(*action, domain)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe(action: Action, domain: Domain) -> String {
    let noun = domain.item_noun();
    match action {
        Action::List => format!("show {noun}s, optionally filtered by date or status"),
        Action::Count => format!("report how many {noun}s match (\"how many\" questions)"),
        Action::Search => format!("find specific {noun}s by person, subject or keyword"),
        Action::Read => format!("open and show one {noun} in full"),
        Action::Create => format!("create a new {noun}"),
        Action::Update => format!("change an existing {noun}"),
        Action::Delete => format!("delete or cancel a {noun}"),
        Action::Send => "compose and send a new email".to_string(),
        Action::Reply => "reply to an existing email".to_string(),
        Action::Forward => "forward an existing email to someone".to_string(),
        Action::Archive => "archive emails out of the inbox".to_string(),
        Action::MarkRead => "mark emails as read".to_string(),
        Action::Complete => "mark a task as done".to_string(),
        Action::FindFreeTime => "find open slots in the calendar".to_string(),
        Action::Unknown => "none of the above".to_string(),
    }
}

/// System prompt for single-shot classification
pub fn classification_system_prompt(domain: Domain) -> String {
    format!(
        "You classify requests to a {domain} assistant into exactly one action.\n\n\
         Valid actions:\n{guide}\n- unknown: the request fits none of these\n\n\
         Rules:\n\
         1. Questions and list phrasing (\"what\", \"which\", \"when\", \"show\", \"do I have\") \
         are queries. They never resolve to an action that creates, sends, changes or deletes anything.\n\
         2. \"How many\" questions are count, not list.\n\
         3. Only extract entities the user actually stated. Omit anything absent; never use null.\n\
         4. Confidence is a number between 0 and 1. Use below 0.5 when guessing.\n\
         5. Answer with action \"unknown\" rather than inventing an action.",
        domain = domain.as_str(),
        guide = action_guide(domain),
    )
}

fn format_examples(examples: &[LearnedExample]) -> String {
    examples
        .iter()
        .map(|example| match &example.kind {
            ExampleKind::Correction { wrong_action } => format!(
                "- \"{}\" -> {} (not {})",
                example.query, example.action, wrong_action
            ),
            ExampleKind::Success => format!("- \"{}\" -> {}", example.query, example.action),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// User prompt carrying the request, recent context and learned examples
pub fn classification_user_prompt(
    text: &str,
    examples: &[LearnedExample],
    context: Option<&ConversationContext>,
) -> String {
    let mut prompt = String::new();

    if !examples.is_empty() {
        prompt.push_str("Past requests from this user and their correct actions:\n");
        prompt.push_str(&format_examples(examples));
        prompt.push_str("\n\n");
    }

    if let Some(last_action) = context.and_then(|c| c.last_action) {
        prompt.push_str(&format!("The previous request in this conversation was {last_action}.\n\n"));
    }

    prompt.push_str(&format!("Request: \"{text}\"\n\n"));
    prompt.push_str("Return the action, entities, confidence and a one-sentence rationale.");
    prompt
}

pub fn critique_system_prompt(domain: Domain) -> String {
    format!(
        "You review action classifications for a {domain} assistant. Valid actions: {labels}. \
         A question or list request must never be classified as an action that creates, sends, \
         changes or deletes something. Say whether the proposed action is correct and, if not, \
         give the correct one.",
        domain = domain.as_str(),
        labels = action_labels(domain).join(", "),
    )
}

pub fn critique_user_prompt(text: &str, decision: &ClassificationDecision) -> String {
    let proposed = decision
        .resolved_action()
        .map(|a| a.as_str())
        .unwrap_or("needs_clarification");
    format!(
        "Request: \"{text}\"\nProposed action: {proposed} (confidence {:.2})\nRationale: {}",
        decision.confidence.value(),
        if decision.rationale.is_empty() {
            "none given"
        } else {
            decision.rationale.as_str()
        },
    )
}

pub fn decompose_system_prompt(domain: Domain, max_steps: usize) -> String {
    format!(
        "You split compound requests to a {domain} assistant into ordered steps, at most {max_steps}. \
         Each step has a short description, one action from: {labels}, the parameters it needs, \
         and the 1-based indexes of earlier steps whose results it uses. A parameter may refer to \
         an earlier result as {{{{stepN.field}}}}. Keep the user's order.",
        domain = domain.as_str(),
        labels = action_labels(domain).join(", "),
    )
}

pub fn decompose_user_prompt(text: &str) -> String {
    format!("Request: \"{text}\"")
}

pub fn sequence_system_prompt(domain: Domain) -> String {
    format!(
        "Decide whether a request to a {domain} assistant asks for two or more operations to be \
         carried out one after another. A single operation with several filters is not sequential. \
         Rephrasing or follow-up questions are not sequential.",
        domain = domain.as_str(),
    )
}

pub fn sequence_user_prompt(text: &str) -> String {
    format!("Request: \"{text}\"")
}
