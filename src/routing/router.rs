//! Confidence-tiered fusion of pattern, semantic and model signals
//!
//! `ConfidenceRouter::route` is pure: identical inputs always produce the
//! identical decision, and the result is always either a known action or a
//! clarification question.

use super::guard::MisclassificationGuard;
use super::RoutingConfig;
use crate::classifier::Critique;
use crate::types::{
    merge_entities, normalize_text, Action, ActionCandidate, ClassificationDecision, Confidence,
    DecisionSource, Domain, Entities, SignalSource,
};
use tracing::debug;

/// Confidence tier of the model's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    High,
    Medium,
    Low,
}

/// Correction suggested by self-validation; logged, never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedCorrection {
    pub wrong_action: Action,
    pub correct_action: Action,
    pub reason: String,
}

/// Routes one domain's signals to a single decision
#[derive(Debug, Clone)]
pub struct ConfidenceRouter {
    domain: Domain,
    config: RoutingConfig,
    guard: MisclassificationGuard,
}

impl ConfidenceRouter {
    pub fn new(domain: Domain, config: RoutingConfig) -> Self {
        let guard = MisclassificationGuard::new(domain, config.guard_enabled);
        Self {
            domain,
            config,
            guard,
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn band(&self, confidence: Confidence) -> Band {
        let value = confidence.value();
        if value >= self.config.high_threshold {
            Band::High
        } else if value >= self.config.medium_threshold {
            Band::Medium
        } else {
            Band::Low
        }
    }

    /// Fuse the available signals into one decision
    pub fn route(
        &self,
        text: &str,
        pattern: Option<&ActionCandidate>,
        semantic: Option<&ActionCandidate>,
        llm: &ClassificationDecision,
    ) -> ClassificationDecision {
        let pattern = pattern.filter(|c| self.usable(c.action));
        let semantic = semantic.filter(|c| self.usable(c.action));
        let llm = llm.as_candidate().filter(|c| self.usable(c.action));

        let decision = match &llm {
            Some(model) => match self.band(model.confidence) {
                Band::High => self.route_high(model, pattern, semantic),
                Band::Medium => self.route_medium(model, pattern, semantic),
                Band::Low => self.route_low(pattern, semantic, Some(model)),
            },
            None => self.route_low(pattern, semantic, None),
        };

        let normalized = normalize_text(text);
        let decision = self.apply_guard(&normalized, decision, pattern);

        debug!(
            action = ?decision.resolved_action(),
            source = decision.chosen_source.as_str(),
            confidence = decision.confidence.value(),
            "Routed decision"
        );
        decision
    }

    fn usable(&self, action: Action) -> bool {
        !action.is_unknown() && self.domain.supports(action)
    }

    fn route_high(
        &self,
        model: &ActionCandidate,
        pattern: Option<&ActionCandidate>,
        semantic: Option<&ActionCandidate>,
    ) -> ClassificationDecision {
        let agrees = [pattern, semantic]
            .into_iter()
            .flatten()
            .any(|c| c.action == model.action);
        let confidence = if agrees {
            model.confidence.boosted(self.config.agreement_boost)
        } else {
            model.confidence
        };
        self.decide(model, confidence, DecisionSource::Llm, &[pattern])
            .with_rationale(model.rationale.clone())
    }

    fn route_medium(
        &self,
        model: &ActionCandidate,
        pattern: Option<&ActionCandidate>,
        semantic: Option<&ActionCandidate>,
    ) -> ClassificationDecision {
        match pattern {
            Some(p) if p.action == model.action => {
                let confidence = model.confidence.max(p.confidence).boosted(self.config.agreement_boost);
                self.decide(model, confidence, DecisionSource::Llm, &[pattern])
                    .with_rationale(format!("model and {} agree", p.rationale))
            }
            Some(p) => self
                .decide(p, p.confidence, DecisionSource::Pattern, &[Some(model)])
                .with_rationale(format!(
                    "{} over model's {} ({:.2})",
                    p.rationale,
                    model.action,
                    model.confidence.value()
                )),
            None => {
                let agrees = semantic.is_some_and(|s| s.action == model.action);
                let confidence = if agrees {
                    model.confidence.boosted(self.config.agreement_boost)
                } else {
                    model.confidence
                };
                self.decide(model, confidence, DecisionSource::Llm, &[])
                    .with_rationale(model.rationale.clone())
            }
        }
    }

    /// Low model confidence or no model answer: rules and embeddings carry more weight
    fn route_low(
        &self,
        pattern: Option<&ActionCandidate>,
        semantic: Option<&ActionCandidate>,
        model: Option<&ActionCandidate>,
    ) -> ClassificationDecision {
        let model = model.filter(|m| m.confidence.value() >= self.config.clarification_floor);
        let signals: Vec<&ActionCandidate> = [pattern, semantic, model].into_iter().flatten().collect();

        match signals.as_slice() {
            [] => self.clarify(&[]),
            [only] => self
                .decide(only, only.confidence, only.source.into(), &[])
                .with_rationale(format!("only signal: {}", describe(only))),
            _ => {
                // Signals are in priority order, so ties favour pattern, then semantic
                for candidate in &signals {
                    let backers: Vec<&&ActionCandidate> = signals
                        .iter()
                        .filter(|c| c.action == candidate.action)
                        .collect();
                    if backers.len() >= 2 {
                        let best = backers
                            .iter()
                            .map(|c| c.confidence)
                            .fold(Confidence::ZERO, Confidence::max);
                        let others: Vec<Option<&ActionCandidate>> =
                            backers.iter().map(|c| Some(**c)).collect();
                        return self
                            .decide(
                                candidate,
                                best.boosted(self.config.agreement_boost),
                                candidate.source.into(),
                                &others,
                            )
                            .with_rationale(format!(
                                "{} signals agree on {}",
                                backers.len(),
                                candidate.action
                            ));
                    }
                }
                let actions: Vec<Action> = signals.iter().map(|c| c.action).collect();
                self.clarify(&actions)
            }
        }
    }

    fn decide(
        &self,
        winner: &ActionCandidate,
        confidence: Confidence,
        source: DecisionSource,
        others: &[Option<&ActionCandidate>],
    ) -> ClassificationDecision {
        let mut entities: Entities = winner.entities.clone();
        for other in others.iter().flatten() {
            merge_entities(&mut entities, &other.entities);
        }
        ClassificationDecision::action(winner.action, entities, confidence, source)
    }

    fn clarify(&self, actions: &[Action]) -> ClassificationDecision {
        let mut distinct: Vec<Action> = Vec::new();
        for action in actions {
            if !distinct.contains(action) {
                distinct.push(*action);
            }
        }
        ClassificationDecision::needs_clarification(clarification_question(self.domain, &distinct))
            .with_rationale(if distinct.is_empty() {
                "no usable signal".to_string()
            } else {
                "signals disagree".to_string()
            })
    }

    fn apply_guard(
        &self,
        normalized: &str,
        decision: ClassificationDecision,
        pattern: Option<&ActionCandidate>,
    ) -> ClassificationDecision {
        let Some(proposed) = decision.resolved_action() else {
            return decision;
        };
        match self.guard.review(normalized, proposed, pattern) {
            Some(replacement) => {
                debug!(%proposed, %replacement, "Misclassification guard override");
                let mut entities = pattern
                    .filter(|p| p.action == replacement)
                    .map(|p| p.entities.clone())
                    .unwrap_or_default();
                merge_entities(&mut entities, &decision.entities);
                ClassificationDecision::action(
                    replacement,
                    entities,
                    decision.confidence,
                    DecisionSource::Guard,
                )
                .with_rationale(format!(
                    "query phrasing cannot {proposed}; routed to {replacement}"
                ))
            }
            None => decision,
        }
    }

    /// Whether self-validation should run for this decision
    pub fn should_validate(&self, decision: &ClassificationDecision) -> bool {
        decision.is_actionable()
            && !decision.validated
            && !matches!(
                decision.chosen_source,
                DecisionSource::Guard | DecisionSource::SelfValidation
            )
            && self.config.validation.covers(decision.confidence)
    }

    /// Fold a critique into the decision
    ///
    /// The returned decision is always marked validated. A correction is
    /// returned only when the critique replaced the action, and replacements
    /// the guard would veto are ignored.
    pub fn apply_critique(
        &self,
        text: &str,
        mut decision: ClassificationDecision,
        critique: &Critique,
    ) -> (ClassificationDecision, Option<SuggestedCorrection>) {
        let current = decision.resolved_action();
        let replacement = critique
            .corrected_action
            .filter(|_| !critique.is_correct)
            .filter(|a| self.usable(*a) && Some(*a) != current)
            .filter(|a| self.guard.review(&normalize_text(text), *a, None).is_none());

        match (current, replacement) {
            (Some(wrong), Some(correct)) => {
                let corrected = ClassificationDecision {
                    validated: true,
                    ..ClassificationDecision::action(
                        correct,
                        decision.entities.clone(),
                        critique.confidence,
                        DecisionSource::SelfValidation,
                    )
                    .with_rationale(critique.reason.clone())
                };
                (
                    corrected,
                    Some(SuggestedCorrection {
                        wrong_action: wrong,
                        correct_action: correct,
                        reason: critique.reason.clone(),
                    }),
                )
            }
            _ => {
                decision.validated = true;
                (decision, None)
            }
        }
    }
}

fn describe(candidate: &ActionCandidate) -> String {
    match candidate.source {
        SignalSource::Pattern | SignalSource::Semantic if !candidate.rationale.is_empty() => {
            candidate.rationale.clone()
        }
        source => format!("{} said {}", source.as_str(), candidate.action),
    }
}

fn article(noun: &str) -> &'static str {
    if noun.starts_with(['a', 'e', 'i', 'o', 'u']) {
        "an"
    } else {
        "a"
    }
}

fn action_phrase(action: Action, domain: Domain) -> String {
    let noun = domain.item_noun();
    let a = article(noun);
    match action {
        Action::List => format!("see your {noun}s"),
        Action::Count => format!("count your {noun}s"),
        Action::Search => format!("search your {noun}s"),
        Action::Read => format!("read {a} {noun}"),
        Action::Create => format!("create a new {noun}"),
        Action::Update => format!("change {a} {noun}"),
        Action::Delete => format!("delete {a} {noun}"),
        Action::Send => "send a new email".to_string(),
        Action::Reply => "reply to an email".to_string(),
        Action::Forward => "forward an email".to_string(),
        Action::Archive => "archive emails".to_string(),
        Action::MarkRead => "mark emails as read".to_string(),
        Action::Complete => "mark a task as done".to_string(),
        Action::FindFreeTime => "find free time".to_string(),
        Action::Unknown => format!("do something with your {noun}s"),
    }
}

/// Question asked when no decision can be made
pub fn clarification_question(domain: Domain, actions: &[Action]) -> String {
    let phrases: Vec<String> = actions.iter().map(|a| action_phrase(*a, domain)).collect();
    match phrases.as_slice() {
        [] | [_] => format!(
            "I'm not sure what you'd like to do with your {}s. Could you rephrase?",
            domain.item_noun()
        ),
        [first, second] => format!("Did you want to {first} or {second}?"),
        [init @ .., last] => format!("Did you want to {}, or {last}?", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecisionOutcome;
    use serde_json::json;

    fn router(domain: Domain) -> ConfidenceRouter {
        ConfidenceRouter::new(domain, RoutingConfig::default())
    }

    fn pattern(action: Action, confidence: f32) -> ActionCandidate {
        ActionCandidate::new(action, SignalSource::Pattern, confidence).with_rationale("matched rule")
    }

    fn semantic(action: Action, confidence: f32) -> ActionCandidate {
        ActionCandidate::new(action, SignalSource::Semantic, confidence)
    }

    fn llm(action: Action, confidence: f32) -> ClassificationDecision {
        ClassificationDecision::action(action, Entities::new(), confidence, DecisionSource::Llm)
    }

    fn unavailable() -> ClassificationDecision {
        ClassificationDecision::unknown("classifier unavailable")
    }

    #[test]
    fn test_pattern_alone_wins() {
        let decision = router(Domain::Email).route(
            "archive these",
            Some(&pattern(Action::Archive, 0.8)),
            None,
            &unavailable(),
        );
        assert_eq!(decision.resolved_action(), Some(Action::Archive));
        assert_eq!(decision.chosen_source, DecisionSource::Pattern);
    }

    #[test]
    fn test_high_confidence_model_is_trusted_and_boosted_on_agreement() {
        let r = router(Domain::Task);
        let alone = r.route("mark report done", None, None, &llm(Action::Complete, 0.88));
        let agreed = r.route(
            "mark report done",
            Some(&pattern(Action::Complete, 0.8)),
            None,
            &llm(Action::Complete, 0.88),
        );
        assert_eq!(alone.resolved_action(), Some(Action::Complete));
        assert!(agreed.confidence > alone.confidence);
    }

    #[test]
    fn test_high_confidence_model_beats_disagreeing_pattern() {
        let decision = router(Domain::Email).route(
            "send sarah the notes",
            Some(&pattern(Action::Search, 0.7)),
            None,
            &llm(Action::Send, 0.95),
        );
        assert_eq!(decision.resolved_action(), Some(Action::Send));
        assert_eq!(decision.chosen_source, DecisionSource::Llm);
    }

    #[test]
    fn test_medium_band_pattern_breaks_tie() {
        let decision = router(Domain::Email).route(
            "the email from bob",
            Some(&pattern(Action::Search, 0.75)),
            None,
            &llm(Action::Read, 0.7),
        );
        assert_eq!(decision.resolved_action(), Some(Action::Search));
        assert_eq!(decision.chosen_source, DecisionSource::Pattern);
    }

    #[test]
    fn test_low_band_disagreement_asks_for_clarification() {
        let decision = router(Domain::Calendar).route(
            "the standup",
            Some(&pattern(Action::Update, 0.6)),
            Some(&semantic(Action::Delete, 0.8)),
            &llm(Action::Search, 0.45),
        );
        let question = decision.needs_clarification_question().unwrap();
        assert!(question.starts_with("Did you want to change an event, delete an event"));
    }

    #[test]
    fn test_low_band_majority_wins() {
        let decision = router(Domain::Calendar).route(
            "free slots friday",
            Some(&pattern(Action::FindFreeTime, 0.6)),
            Some(&semantic(Action::List, 0.8)),
            &llm(Action::FindFreeTime, 0.5),
        );
        assert_eq!(decision.resolved_action(), Some(Action::FindFreeTime));
        assert_eq!(decision.chosen_source, DecisionSource::Pattern);
    }

    #[test]
    fn test_weak_model_alone_needs_clarification() {
        let decision = router(Domain::Task).route("hmm", None, None, &llm(Action::Delete, 0.2));
        assert!(matches!(
            decision.outcome,
            DecisionOutcome::NeedsClarification { .. }
        ));
        assert!(decision
            .needs_clarification_question()
            .unwrap()
            .contains("your tasks"));
    }

    #[test]
    fn test_out_of_domain_candidates_are_ignored() {
        let decision = router(Domain::Task).route(
            "forward it",
            Some(&pattern(Action::Forward, 0.9)),
            None,
            &unavailable(),
        );
        assert!(decision.needs_clarification_question().is_some());
    }

    #[test]
    fn test_guard_overrides_create_on_question() {
        let decision = router(Domain::Calendar).route(
            "What meetings do I have tomorrow?",
            None,
            None,
            &llm(Action::Create, 0.95),
        );
        assert_eq!(decision.resolved_action(), Some(Action::List));
        assert_eq!(decision.chosen_source, DecisionSource::Guard);
    }

    #[test]
    fn test_entities_merge_from_agreeing_signals() {
        let p = pattern(Action::Search, 0.8).with_entities(Entities::from([(
            "sender".to_string(),
            json!("sarah"),
        )]));
        let mut model = llm(Action::Search, 0.9);
        model.entities.insert("subject".to_string(), json!("budget"));

        let decision = router(Domain::Email).route("find sarah's budget email", Some(&p), None, &model);
        assert_eq!(decision.entities["sender"], "sarah");
        assert_eq!(decision.entities["subject"], "budget");
    }

    #[test]
    fn test_validation_band() {
        let r = router(Domain::Email);
        assert!(r.should_validate(&llm(Action::Send, 0.7)));
        assert!(!r.should_validate(&llm(Action::Send, 0.9)));
        assert!(!r.should_validate(&llm(Action::Send, 0.3)));

        let mut done = llm(Action::Send, 0.7);
        done.validated = true;
        assert!(!r.should_validate(&done));
    }

    #[test]
    fn test_critique_replaces_action() {
        let r = router(Domain::Email);
        let critique = Critique {
            is_correct: false,
            corrected_action: Some(Action::Reply),
            confidence: Confidence::new(0.8),
            reason: "refers to an existing thread".to_string(),
        };

        let (decision, correction) = r.apply_critique("answer bob", llm(Action::Send, 0.7), &critique);
        assert_eq!(decision.resolved_action(), Some(Action::Reply));
        assert_eq!(decision.chosen_source, DecisionSource::SelfValidation);
        assert!(decision.validated);
        assert_eq!(correction.unwrap().wrong_action, Action::Send);
    }

    #[test]
    fn test_critique_agreement_only_marks_validated() {
        let r = router(Domain::Email);
        let critique = Critique {
            is_correct: true,
            corrected_action: None,
            confidence: Confidence::new(0.9),
            reason: String::new(),
        };
        let (decision, correction) = r.apply_critique("send a note", llm(Action::Send, 0.7), &critique);
        assert_eq!(decision.resolved_action(), Some(Action::Send));
        assert!(decision.validated);
        assert!(correction.is_none());
    }

    #[test]
    fn test_clarification_question_forms() {
        assert_eq!(
            clarification_question(Domain::Email, &[Action::Archive, Action::Delete]),
            "Did you want to archive emails or delete an email?"
        );
        assert_eq!(
            clarification_question(Domain::Calendar, &[]),
            "I'm not sure what you'd like to do with your events. Could you rephrase?"
        );
    }
}
