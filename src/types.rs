//! Core domain model for intent classification
//!
//! This module contains the request-scoped types that flow through the
//! routing pipeline:
//! - Domains and the closed set of actions they support
//! - Clamped confidence values
//! - Candidates produced by each signal source
//! - The terminal classification decision

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Domains and Actions
// ============================================================================

/// The assistant domain a query is classified within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Email,
    Calendar,
    Task,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Email => "email",
            Domain::Calendar => "calendar",
            Domain::Task => "task",
        }
    }

    /// Noun used when phrasing questions back to the user
    pub fn item_noun(&self) -> &'static str {
        match self {
            Domain::Email => "email",
            Domain::Calendar => "event",
            Domain::Task => "task",
        }
    }

    /// Actions that are valid for this domain, in prompt order
    pub fn valid_actions(&self) -> &'static [Action] {
        match self {
            Domain::Email => &[
                Action::List,
                Action::Count,
                Action::Search,
                Action::Read,
                Action::Send,
                Action::Reply,
                Action::Forward,
                Action::Archive,
                Action::Delete,
                Action::MarkRead,
            ],
            Domain::Calendar => &[
                Action::List,
                Action::Count,
                Action::Search,
                Action::FindFreeTime,
                Action::Create,
                Action::Update,
                Action::Delete,
            ],
            Domain::Task => &[
                Action::List,
                Action::Count,
                Action::Search,
                Action::Create,
                Action::Update,
                Action::Complete,
                Action::Delete,
            ],
        }
    }

    pub fn supports(&self, action: Action) -> bool {
        self.valid_actions().contains(&action)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "email" | "mail" | "gmail" => Ok(Domain::Email),
            "calendar" | "events" => Ok(Domain::Calendar),
            "task" | "tasks" | "todo" => Ok(Domain::Task),
            other => Err(format!("unknown domain '{other}'")),
        }
    }
}

/// Domain actions the engine can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    List,
    Count,
    Search,
    Read,
    Create,
    Update,
    Delete,
    Send,
    Reply,
    Forward,
    Archive,
    MarkRead,
    Complete,
    FindFreeTime,
    Unknown,
}

/// Coarse grouping used by the misclassification guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCategory {
    /// Reads state without changing it
    Query,
    /// Produces a new item or outgoing message
    Creation,
    /// Changes an existing item in place
    Mutation,
    /// Removes or hides items
    Destructive,
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Count => "count",
            Action::Search => "search",
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Send => "send",
            Action::Reply => "reply",
            Action::Forward => "forward",
            Action::Archive => "archive",
            Action::MarkRead => "mark_read",
            Action::Complete => "complete",
            Action::FindFreeTime => "find_free_time",
            Action::Unknown => "unknown",
        }
    }

    pub fn category(&self) -> ActionCategory {
        match self {
            Action::List | Action::Count | Action::Search | Action::Read | Action::FindFreeTime => {
                ActionCategory::Query
            }
            Action::Create | Action::Send | Action::Reply | Action::Forward => {
                ActionCategory::Creation
            }
            Action::Update | Action::MarkRead | Action::Complete => ActionCategory::Mutation,
            Action::Delete | Action::Archive => ActionCategory::Destructive,
            Action::Unknown => ActionCategory::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Action::Unknown)
    }

    /// Leniently parse an action label produced by a model or a user
    ///
    /// Accepts exact labels, common synonyms, and domain-qualified forms such
    /// as `create_event`, `email.list` or `count-tasks`. Returns `None` when
    /// nothing recognisable is present.
    pub fn parse_lenient(label: &str) -> Option<Action> {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' || c == '.' || c == ':' { '_' } else { c })
            .collect();
        let normalized = normalized.trim_matches('_');

        if normalized.is_empty() {
            return None;
        }

        if let Some(action) = Self::from_token(normalized) {
            return Some(action);
        }

        for compound in ["mark_read", "mark_as_read", "find_free_time", "free_time", "how_many"] {
            if normalized.contains(compound) {
                return Self::from_token(compound);
            }
        }

        normalized.split('_').find_map(Self::from_token)
    }

    fn from_token(token: &str) -> Option<Action> {
        let action = match token {
            "list" | "show" | "get" | "fetch" | "view" | "query" => Action::List,
            "count" | "how_many" | "tally" => Action::Count,
            "search" | "find" | "lookup" | "locate" => Action::Search,
            "read" | "open" | "summarize" => Action::Read,
            "create" | "add" | "new" | "schedule" | "book" => Action::Create,
            "update" | "edit" | "modify" | "reschedule" | "move" | "rename" => Action::Update,
            "delete" | "remove" | "cancel" | "trash" => Action::Delete,
            "send" | "compose" | "write" | "draft" => Action::Send,
            "reply" | "respond" | "answer" => Action::Reply,
            "forward" => Action::Forward,
            "archive" => Action::Archive,
            "mark_read" | "mark_as_read" => Action::MarkRead,
            "complete" | "done" | "finish" | "check_off" => Action::Complete,
            "find_free_time" | "free_time" | "availability" => Action::FindFreeTime,
            "unknown" | "none" => Action::Unknown,
            _ => return None,
        };
        Some(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Confidence
// ============================================================================

/// Confidence score guaranteed to lie in `[0, 1]`
///
/// Construction clamps out-of-range input and maps NaN to zero, so every
/// value observed anywhere in the pipeline satisfies the bound.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Confidence(f32);

impl Confidence {
    pub const ZERO: Confidence = Confidence(0.0);
    pub const ONE: Confidence = Confidence(1.0);

    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            Confidence(0.0)
        } else {
            Confidence(value.clamp(0.0, 1.0))
        }
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// Add `delta` and clamp
    pub fn boosted(&self, delta: f32) -> Self {
        Self::new(self.0 + delta)
    }

    /// Multiply by `factor` and clamp
    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.0 * factor)
    }

    pub fn max(self, other: Confidence) -> Self {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }

    pub fn min(self, other: Confidence) -> Self {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }
}

impl From<f32> for Confidence {
    fn from(value: f32) -> Self {
        Confidence::new(value)
    }
}

impl From<Confidence> for f32 {
    fn from(value: Confidence) -> Self {
        value.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Extracted parameters keyed by name
pub type Entities = BTreeMap<String, Value>;

/// Drop null and empty-string values so absent fields are omitted
pub fn clean_entities(entities: Entities) -> Entities {
    entities
        .into_iter()
        .filter(|(key, value)| {
            !key.trim().is_empty()
                && !value.is_null()
                && !matches!(value, Value::String(s) if s.trim().is_empty())
        })
        .collect()
}

/// Merge `extra` into `base` without overwriting keys already present
pub fn merge_entities(base: &mut Entities, extra: &Entities) {
    for (key, value) in extra {
        base.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Conversation state the caller may attach to a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    /// Owner of the conversation; scopes learning retrieval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Action resolved on the previous turn, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<Action>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub last_entities: Entities,
}

/// A single free-text request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub domain: Domain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ConversationContext>,
}

impl Query {
    pub fn new(text: impl Into<String>, domain: Domain) -> Self {
        Self {
            text: text.into(),
            domain,
            context: None,
        }
    }

    pub fn with_context(mut self, context: ConversationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Lowercased, whitespace-collapsed text used by heuristics
    pub fn normalized(&self) -> String {
        normalize_text(&self.text)
    }
}

/// Lowercase and collapse whitespace
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Candidates and Decisions
// ============================================================================

/// Which signal produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Pattern,
    Semantic,
    Llm,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Pattern => "pattern",
            SignalSource::Semantic => "semantic",
            SignalSource::Llm => "llm",
        }
    }
}

/// A proposed action from one signal source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub action: Action,
    pub source: SignalSource,
    pub confidence: Confidence,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub rationale: String,
}

impl ActionCandidate {
    pub fn new(action: Action, source: SignalSource, confidence: impl Into<Confidence>) -> Self {
        Self {
            action,
            source,
            confidence: confidence.into(),
            entities: Entities::new(),
            rationale: String::new(),
        }
    }

    pub fn with_entities(mut self, entities: Entities) -> Self {
        self.entities = clean_entities(entities);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

/// Terminal value of a classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Action { action: Action },
    NeedsClarification { question: String },
}

/// What ultimately determined the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Pattern,
    Semantic,
    Llm,
    /// The misclassification guard overrode another signal
    Guard,
    /// Self-validation replaced the original decision
    SelfValidation,
    /// No signal was usable
    None,
}

impl From<SignalSource> for DecisionSource {
    fn from(source: SignalSource) -> Self {
        match source {
            SignalSource::Pattern => DecisionSource::Pattern,
            SignalSource::Semantic => DecisionSource::Semantic,
            SignalSource::Llm => DecisionSource::Llm,
        }
    }
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Pattern => "pattern",
            DecisionSource::Semantic => "semantic",
            DecisionSource::Llm => "llm",
            DecisionSource::Guard => "guard",
            DecisionSource::SelfValidation => "self_validation",
            DecisionSource::None => "none",
        }
    }
}

/// The single decision produced for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationDecision {
    pub outcome: DecisionOutcome,
    #[serde(default)]
    pub entities: Entities,
    pub confidence: Confidence,
    pub chosen_source: DecisionSource,
    pub validated: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rationale: String,
}

impl ClassificationDecision {
    pub fn action(
        action: Action,
        entities: Entities,
        confidence: impl Into<Confidence>,
        chosen_source: DecisionSource,
    ) -> Self {
        Self {
            outcome: DecisionOutcome::Action { action },
            entities: clean_entities(entities),
            confidence: confidence.into(),
            chosen_source,
            validated: false,
            rationale: String::new(),
        }
    }

    pub fn needs_clarification(question: impl Into<String>) -> Self {
        Self {
            outcome: DecisionOutcome::NeedsClarification {
                question: question.into(),
            },
            entities: Entities::new(),
            confidence: Confidence::ZERO,
            chosen_source: DecisionSource::None,
            validated: false,
            rationale: String::new(),
        }
    }

    /// Decision returned by the classifier when the model could not be used
    pub fn unknown(rationale: impl Into<String>) -> Self {
        Self {
            outcome: DecisionOutcome::Action {
                action: Action::Unknown,
            },
            entities: Entities::new(),
            confidence: Confidence::ZERO,
            chosen_source: DecisionSource::Llm,
            validated: false,
            rationale: rationale.into(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// The resolved action, if this is not a clarification request
    pub fn resolved_action(&self) -> Option<Action> {
        match &self.outcome {
            DecisionOutcome::Action { action } => Some(*action),
            DecisionOutcome::NeedsClarification { .. } => None,
        }
    }

    /// Whether the decision names a concrete, known action
    pub fn is_actionable(&self) -> bool {
        matches!(self.resolved_action(), Some(action) if !action.is_unknown())
    }

    pub fn needs_clarification_question(&self) -> Option<&str> {
        match &self.outcome {
            DecisionOutcome::NeedsClarification { question } => Some(question),
            DecisionOutcome::Action { .. } => None,
        }
    }

    /// View an LLM decision as a candidate for fusion
    pub fn as_candidate(&self) -> Option<ActionCandidate> {
        let action = self.resolved_action().filter(|a| !a.is_unknown())?;
        Some(ActionCandidate {
            action,
            source: SignalSource::Llm,
            confidence: self.confidence,
            entities: self.entities.clone(),
            rationale: self.rationale.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confidence_clamps_and_rejects_nan() {
        assert_eq!(Confidence::new(1.7).value(), 1.0);
        assert_eq!(Confidence::new(-0.2).value(), 0.0);
        assert_eq!(Confidence::new(f32::NAN).value(), 0.0);
        assert_eq!(Confidence::new(0.42).value(), 0.42);
        assert_eq!(Confidence::new(0.9).boosted(0.5), Confidence::ONE);
    }

    #[test]
    fn test_confidence_deserialization_clamps() {
        let confidence: Confidence = serde_json::from_str("3.5").unwrap();
        assert_eq!(confidence, Confidence::ONE);
    }

    #[test]
    fn test_action_parse_lenient() {
        assert_eq!(Action::parse_lenient("list"), Some(Action::List));
        assert_eq!(Action::parse_lenient("  COUNT "), Some(Action::Count));
        assert_eq!(Action::parse_lenient("create_event"), Some(Action::Create));
        assert_eq!(Action::parse_lenient("email.list"), Some(Action::List));
        assert_eq!(Action::parse_lenient("mark-as-read"), Some(Action::MarkRead));
        assert_eq!(Action::parse_lenient("find free time"), Some(Action::FindFreeTime));
        assert_eq!(Action::parse_lenient("complete_task"), Some(Action::Complete));
        assert_eq!(Action::parse_lenient("banana"), None);
        assert_eq!(Action::parse_lenient(""), None);
    }

    #[test]
    fn test_action_serde_names() {
        assert_eq!(serde_json::to_string(&Action::MarkRead).unwrap(), "\"mark_read\"");
        let parsed: Action = serde_json::from_str("\"find_free_time\"").unwrap();
        assert_eq!(parsed, Action::FindFreeTime);
    }

    #[test]
    fn test_action_categories() {
        assert_eq!(Action::List.category(), ActionCategory::Query);
        assert_eq!(Action::Reply.category(), ActionCategory::Creation);
        assert_eq!(Action::Archive.category(), ActionCategory::Destructive);
        assert_eq!(Action::Complete.category(), ActionCategory::Mutation);
    }

    #[test]
    fn test_domain_action_sets() {
        assert!(Domain::Email.supports(Action::Reply));
        assert!(!Domain::Email.supports(Action::Complete));
        assert!(Domain::Calendar.supports(Action::FindFreeTime));
        assert!(Domain::Task.supports(Action::Complete));
        assert!(!Domain::Task.supports(Action::Unknown));
    }

    #[test]
    fn test_clean_entities_drops_null_and_blank() {
        let mut entities = Entities::new();
        entities.insert("sender".to_string(), json!("Sarah"));
        entities.insert("date".to_string(), Value::Null);
        entities.insert("subject".to_string(), json!("  "));

        let cleaned = clean_entities(entities);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned["sender"], json!("Sarah"));
    }

    #[test]
    fn test_decision_helpers() {
        let decision = ClassificationDecision::action(
            Action::Count,
            Entities::new(),
            0.8,
            DecisionSource::Pattern,
        );
        assert_eq!(decision.resolved_action(), Some(Action::Count));
        assert!(decision.is_actionable());

        let clarify = ClassificationDecision::needs_clarification("Which email?");
        assert_eq!(clarify.resolved_action(), None);
        assert_eq!(clarify.needs_clarification_question(), Some("Which email?"));

        let unknown = ClassificationDecision::unknown("timeout");
        assert!(!unknown.is_actionable());
        assert!(unknown.as_candidate().is_none());
    }

    #[test]
    fn test_query_normalized() {
        let query = Query::new("  How   MANY unread\temails? ", Domain::Email);
        assert_eq!(query.normalized(), "how many unread emails?");
    }
}
