//! Deterministic rule-based action detection
//!
//! Each domain has a priority-ordered rule list. The first rule whose regex
//! matches wins, so count phrasing ("how many ...") sits above the generic
//! list phrasing that would otherwise also match. Detection is pure and never
//! fails, which makes it the fallback of last resort when the network-backed
//! signals are down.

use crate::types::{Action, ActionCandidate, Domain, Entities, SignalSource};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

/// A compiled rule linked to an action
pub struct PatternRule {
    pub name: &'static str,
    pub regex: Regex,
    pub action: Action,
    pub base_confidence: f32,
}

fn compile(rules: &[(&'static str, &str, Action, f32)]) -> Vec<PatternRule> {
    rules
        .iter()
        .map(|(name, pattern, action, confidence)| PatternRule {
            name: *name,
            regex: Regex::new(pattern).expect("Invalid pattern rule regex"),
            action: *action,
            base_confidence: *confidence,
        })
        .collect()
}

// Leading politeness is common enough to allow everywhere an imperative verb
// is anchored to the start of the request.
macro_rules! imperative {
    ($verbs:literal) => {
        concat!(r"(?i)^\s*(?:(?:please|can you|could you|would you)\s+)?(?:", $verbs, r")\b")
    };
}

static EMAIL_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    compile(&[
        ("count_how_many", r"(?i)\bhow\s+many\b", Action::Count, 0.92),
        ("count_number_of", r"(?i)\b(?:count|number\s+of)\b.*\b(?:emails?|messages?|mails?)\b", Action::Count, 0.88),
        ("mark_read", r"(?i)\bmark\b.*\b(?:as\s+)?read\b", Action::MarkRead, 0.88),
        ("reply_imperative", imperative!(r"reply|respond"), Action::Reply, 0.88),
        ("forward_imperative", imperative!(r"forward"), Action::Forward, 0.88),
        ("archive_imperative", imperative!(r"archive"), Action::Archive, 0.88),
        ("delete_imperative", imperative!(r"delete|trash|remove"), Action::Delete, 0.88),
        ("send_imperative", imperative!(r"send|compose|write|draft"), Action::Send, 0.86),
        ("email_someone", r"(?i)^\s*email\s+\w+(?:\s+\w+)?\s+(?:about|that|saying|re)\b", Action::Send, 0.80),
        ("search_imperative", imperative!(r"search|find|look\s+for|look\s+up|locate"), Action::Search, 0.85),
        ("read_imperative", imperative!(r"read|open"), Action::Read, 0.82),
        ("read_what_does_it_say", r"(?i)\bwhat\s+(?:does|did)\b.*\bsay\b", Action::Read, 0.75),
        ("list_imperative", imperative!(r"show|list|display|get|check"), Action::List, 0.82),
        ("list_what_emails", r"(?i)\b(?:what|which|any)\b.*\b(?:emails?|messages?|mails?)\b", Action::List, 0.78),
        ("list_do_i_have", r"(?i)\b(?:do|did)\s+i\s+(?:have|get|receive)\b", Action::List, 0.75),
        ("list_inbox", r"(?i)\binbox\b", Action::List, 0.62),
    ])
});

static CALENDAR_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    compile(&[
        ("count_how_many", r"(?i)\bhow\s+many\b", Action::Count, 0.92),
        ("count_number_of", r"(?i)\b(?:count|number\s+of)\b.*\b(?:meetings?|events?|appointments?)\b", Action::Count, 0.88),
        ("free_time", r"(?i)\b(?:free\s+time|free\s+slots?|when\s+am\s+i\s+free|am\s+i\s+(?:free|available)|availability|open\s+slots?)\b", Action::FindFreeTime, 0.88),
        ("update_imperative", imperative!(r"reschedule|move|change|update|push|rename|shift"), Action::Update, 0.86),
        ("delete_imperative", imperative!(r"cancel|delete|remove|clear"), Action::Delete, 0.86),
        ("create_imperative", imperative!(r"schedule|book|create|add|set\s+up|put|arrange|plan"), Action::Create, 0.86),
        ("search_imperative", imperative!(r"search|find|look\s+for|look\s+up"), Action::Search, 0.82),
        ("search_when_is", r"(?i)^\s*when\s+(?:is|was)\b", Action::Search, 0.75),
        ("list_imperative", imperative!(r"show|list|display|get|check"), Action::List, 0.82),
        ("list_what_events", r"(?i)\b(?:what|which|any)\b.*\b(?:meetings?|events?|appointments?|calendar|schedule|agenda|on)\b", Action::List, 0.78),
        ("list_do_i_have", r"(?i)\bdo\s+i\s+have\b", Action::List, 0.75),
        ("list_agenda", r"(?i)\bagenda\b", Action::List, 0.65),
    ])
});

static TASK_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    compile(&[
        ("count_how_many", r"(?i)\bhow\s+many\b", Action::Count, 0.92),
        ("count_number_of", r"(?i)\b(?:count|number\s+of)\b.*\b(?:tasks?|to-?dos?|items?)\b", Action::Count, 0.88),
        ("complete_imperative", imperative!(r"complete|finish|check\s+off|tick\s+off"), Action::Complete, 0.88),
        ("complete_mark_done", r"(?i)\bmark\b.*\b(?:done|complete|completed|finished)\b", Action::Complete, 0.88),
        ("complete_i_did", r"(?i)^\s*i\s+(?:finished|completed|did)\b", Action::Complete, 0.70),
        ("delete_imperative", imperative!(r"delete|remove|drop"), Action::Delete, 0.86),
        ("update_imperative", imperative!(r"update|change|rename|edit|move|reschedule|postpone"), Action::Update, 0.85),
        ("create_imperative", imperative!(r"add|create|new|remind\s+me"), Action::Create, 0.86),
        ("create_remind_me_to", r"(?i)\bremind\s+me\s+to\b", Action::Create, 0.84),
        ("search_imperative", imperative!(r"search|find|look\s+for|look\s+up"), Action::Search, 0.82),
        ("list_imperative", imperative!(r"show|list|display|get|check"), Action::List, 0.82),
        ("list_what_tasks", r"(?i)\b(?:what|which|any)\b.*\b(?:tasks?|to-?dos?|to\s+do|left|pending|due)\b", Action::List, 0.78),
        ("list_do_i_have", r"(?i)\bdo\s+i\s+have\b", Action::List, 0.75),
    ])
});

static SENDER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bfrom\s+([A-Z][a-zA-Z'-]+(?:\s+[A-Z][a-zA-Z'-]+)?)").expect("sender regex")
});
static SENDER_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfrom\s+([\w.+-]+@[\w-]+(?:\.[\w-]+)+)").expect("sender address regex")
});
static RECIPIENT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bto\s+([A-Z][a-zA-Z'-]+(?:\s+[A-Z][a-zA-Z'-]+)?)").expect("recipient regex")
});
static RECIPIENT_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bto\s+([\w.+-]+@[\w-]+(?:\.[\w-]+)+)").expect("recipient address regex")
});
static ATTENDEE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bwith\s+([A-Z][a-zA-Z'-]+(?:\s+[A-Z][a-zA-Z'-]+)?)").expect("attendee regex")
});
static RELATIVE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(today|tonight|tomorrow|yesterday|this\s+(?:week|weekend|month|morning|afternoon|evening)|next\s+(?:week|month|monday|tuesday|wednesday|thursday|friday|saturday|sunday)|last\s+(?:week|month)|(?:on\s+)?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday))\b",
    )
    .expect("relative date regex")
});
static TIME_OF_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bat\s+(\d{1,2}(?::\d{2})?\s*(?:am|pm)|\d{1,2}:\d{2}|noon|midnight)")
        .expect("time regex")
});
static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)"|“([^”]+)”"#).expect("quoted regex"));
static LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:last|latest|first|top|recent)\s+(\d{1,3})\b").expect("limit regex")
});
static UNREAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bunread\b").expect("unread regex"));

/// Rule-based detector for one domain
#[derive(Clone, Copy)]
pub struct PatternDetector {
    domain: Domain,
    rules: &'static [PatternRule],
}

impl PatternDetector {
    pub fn for_domain(domain: Domain) -> Self {
        let rules: &'static Lazy<Vec<PatternRule>> = match domain {
            Domain::Email => &EMAIL_RULES,
            Domain::Calendar => &CALENDAR_RULES,
            Domain::Task => &TASK_RULES,
        };
        Self {
            domain,
            rules: rules.as_slice(),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn rules(&self) -> &'static [PatternRule] {
        self.rules
    }

    /// Return a candidate from the first matching rule, if any
    pub fn detect(&self, text: &str) -> Option<ActionCandidate> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let rule = self.rules.iter().find(|rule| rule.regex.is_match(trimmed))?;
        Some(
            ActionCandidate::new(rule.action, SignalSource::Pattern, rule.base_confidence)
                .with_entities(extract_entities(trimmed, self.domain))
                .with_rationale(format!("matched rule '{}'", rule.name)),
        )
    }
}

impl std::fmt::Debug for PatternDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternDetector")
            .field("domain", &self.domain)
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Extract lightweight entities that rules can recognise reliably
pub fn extract_entities(text: &str, domain: Domain) -> Entities {
    let mut entities = Entities::new();

    match domain {
        Domain::Email => {
            if let Some(sender) = capture(&SENDER_ADDRESS, text).or_else(|| capture(&SENDER_NAME, text)) {
                entities.insert("sender".to_string(), Value::String(sender));
            }
            if let Some(recipient) =
                capture(&RECIPIENT_ADDRESS, text).or_else(|| capture(&RECIPIENT_NAME, text))
            {
                entities.insert("recipient".to_string(), Value::String(recipient));
            }
            if UNREAD.is_match(text) {
                entities.insert("unread".to_string(), json!(true));
            }
            if let Some(subject) = capture(&QUOTED, text) {
                entities.insert("subject".to_string(), Value::String(subject));
            }
        }
        Domain::Calendar => {
            if let Some(attendee) = capture(&ATTENDEE_NAME, text) {
                entities.insert("attendee".to_string(), Value::String(attendee));
            }
            if let Some(title) = capture(&QUOTED, text) {
                entities.insert("title".to_string(), Value::String(title));
            }
            if let Some(time) = capture(&TIME_OF_DAY, text) {
                entities.insert("time".to_string(), Value::String(time.to_lowercase()));
            }
        }
        Domain::Task => {
            if let Some(title) = capture(&QUOTED, text) {
                entities.insert("title".to_string(), Value::String(title));
            }
        }
    }

    if let Some(date) = capture(&RELATIVE_DATE, text) {
        let date = date.to_lowercase();
        let date = date.strip_prefix("on ").unwrap_or(&date).to_string();
        entities.insert("date".to_string(), Value::String(date));
    }

    if let Some(limit) = capture(&LIMIT, text).and_then(|n| n.parse::<u64>().ok()) {
        entities.insert("limit".to_string(), json!(limit));
    }

    entities
}

/// First non-empty capture group of the leftmost match
fn capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|caps| caps.iter().skip(1).flatten().next().map(|m| m.as_str().trim().to_string()))
}
