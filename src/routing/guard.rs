//! Veto for state-changing actions on question-shaped requests
//!
//! A model occasionally reads "what meetings do I have tomorrow" as a request
//! to create a meeting. Interrogative and list phrasing is detected from the
//! text alone, and any action that would create, change or delete data is
//! replaced with a read-only one.

use crate::types::{Action, ActionCandidate, ActionCategory, Domain};
use once_cell::sync::Lazy;
use regex::Regex;

/// How a request is phrased, as far as the guard cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrasing {
    /// "how many ..." and similar
    Count,
    /// Questions and list/show requests
    Query,
    /// Anything else, including polite imperatives ("can you delete ...")
    Imperative,
}

static COUNT_PHRASING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:so\s+|and\s+|ok(?:ay)?,?\s+)?(?:how many|count(?:\s+of)?|what(?:'s| is) the (?:number|count) of|number of)\b")
        .expect("Invalid regex")
});

static QUERY_PHRASING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:so\s+|and\s+|ok(?:ay)?,?\s+)?(?:what|what's|whats|which|when|where|who|whose|show|list|display|view|any|are there|is there|do i have|did i get|did i receive|have i got)\b",
    )
    .expect("Invalid regex")
});

static QUERY_ANYWHERE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:do i have|did i get|have i got)\b").expect("Invalid regex"));

/// Classify the phrasing of already-normalized text
pub fn phrasing(normalized: &str) -> Phrasing {
    let text = normalized.trim_start_matches(|c: char| !c.is_alphanumeric());
    if COUNT_PHRASING.is_match(text) {
        Phrasing::Count
    } else if QUERY_PHRASING.is_match(text) || QUERY_ANYWHERE.is_match(text) {
        Phrasing::Query
    } else {
        Phrasing::Imperative
    }
}

/// Actions the guard refuses for query-shaped requests
fn changes_state(action: Action) -> bool {
    matches!(
        action.category(),
        ActionCategory::Creation | ActionCategory::Mutation | ActionCategory::Destructive
    )
}

/// Misclassification guard for one domain
#[derive(Debug, Clone, Copy)]
pub struct MisclassificationGuard {
    domain: Domain,
    enabled: bool,
}

impl MisclassificationGuard {
    pub fn new(domain: Domain, enabled: bool) -> Self {
        Self { domain, enabled }
    }

    /// Return the replacement action when `proposed` must be vetoed
    ///
    /// The pattern candidate is preferred as the replacement when it names a
    /// read-only action the domain supports.
    pub fn review(
        &self,
        normalized: &str,
        proposed: Action,
        pattern: Option<&ActionCandidate>,
    ) -> Option<Action> {
        if !self.enabled || !changes_state(proposed) {
            return None;
        }

        let phrasing = phrasing(normalized);
        if phrasing == Phrasing::Imperative {
            return None;
        }

        let from_pattern = pattern
            .map(|p| p.action)
            .filter(|a| a.category() == ActionCategory::Query && self.domain.supports(*a));

        Some(from_pattern.unwrap_or(match phrasing {
            Phrasing::Count => Action::Count,
            _ => Action::List,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalSource;

    #[test]
    fn test_phrasing_detection() {
        assert_eq!(phrasing("how many unread emails do i have"), Phrasing::Count);
        assert_eq!(phrasing("what meetings do i have tomorrow"), Phrasing::Query);
        assert_eq!(phrasing("show me my tasks"), Phrasing::Query);
        assert_eq!(phrasing("so which events are on friday?"), Phrasing::Query);
        assert_eq!(phrasing("tomorrow, do i have anything"), Phrasing::Query);
        assert_eq!(phrasing("schedule a meeting with alex"), Phrasing::Imperative);
        assert_eq!(phrasing("can you delete the spam"), Phrasing::Imperative);
        assert_eq!(phrasing("whatever, delete it"), Phrasing::Imperative);
    }

    #[test]
    fn test_create_on_question_is_vetoed_to_list() {
        let guard = MisclassificationGuard::new(Domain::Calendar, true);
        assert_eq!(
            guard.review("what meetings do i have tomorrow", Action::Create, None),
            Some(Action::List)
        );
    }

    #[test]
    fn test_count_phrasing_substitutes_count() {
        let guard = MisclassificationGuard::new(Domain::Email, true);
        assert_eq!(
            guard.review("how many emails did sarah send", Action::Send, None),
            Some(Action::Count)
        );
    }

    #[test]
    fn test_pattern_query_action_is_preferred() {
        let guard = MisclassificationGuard::new(Domain::Calendar, true);
        let pattern = ActionCandidate::new(Action::FindFreeTime, SignalSource::Pattern, 0.8);
        assert_eq!(
            guard.review("when am i free tomorrow", Action::Create, Some(&pattern)),
            Some(Action::FindFreeTime)
        );
    }

    #[test]
    fn test_read_only_actions_and_imperatives_pass() {
        let guard = MisclassificationGuard::new(Domain::Email, true);
        assert_eq!(guard.review("what did sarah say", Action::Search, None), None);
        assert_eq!(guard.review("delete the spam emails", Action::Delete, None), None);
    }

    #[test]
    fn test_disabled_guard_never_vetoes() {
        let guard = MisclassificationGuard::new(Domain::Task, false);
        assert_eq!(guard.review("what tasks do i have", Action::Delete, None), None);
    }
}
