//! Embedding-similarity action matching
//!
//! Canonical phrases for each action are embedded once at startup. A query is
//! embedded at request time and matched against those exemplars plus the
//! user's learned examples. The best cosine similarity above the threshold
//! becomes the candidate confidence.

use crate::embedding::{cosine_similarity, EmbeddingProvider, EmbeddingSelector, SelectedEmbedder};
use crate::error::RouterError;
use crate::learning::LearnedExample;
use crate::observability::metrics;
use crate::types::{Action, ActionCandidate, Domain, SignalSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Corrections outrank exemplars with the same raw similarity
const CORRECTION_BONUS: f32 = 0.03;

/// Semantic matcher tunables
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticConfig {
    /// Threshold for model-backed embeddings
    pub min_similarity: f32,
    /// Threshold for the local hashing embedder
    pub local_min_similarity: f32,
    /// Per-request embedding timeout
    pub timeout: Duration,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.75,
            local_min_similarity: 0.55,
            timeout: Duration::from_secs(3),
        }
    }
}

struct Exemplar {
    action: Action,
    phrase: &'static str,
    vector: Vec<f32>,
}

/// Exemplar vectors and the provider that produced them; immutable once built
pub struct ExemplarIndex {
    provider: Arc<dyn EmbeddingProvider>,
    exemplars: Vec<Exemplar>,
    min_similarity: f32,
}

impl ExemplarIndex {
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }
}

/// Canonical phrases per action for a domain
pub fn exemplar_phrases(domain: Domain) -> &'static [(Action, &'static str)] {
    match domain {
        Domain::Email => &[
            (Action::List, "show my emails"),
            (Action::List, "what emails did I get today"),
            (Action::List, "check my inbox"),
            (Action::List, "any new messages"),
            (Action::Count, "how many emails do I have"),
            (Action::Count, "count my unread messages"),
            (Action::Search, "find the email from john"),
            (Action::Search, "search my mail for the invoice"),
            (Action::Read, "read the latest email"),
            (Action::Read, "open the message from my boss"),
            (Action::Send, "send an email to sarah"),
            (Action::Send, "write a message to the team"),
            (Action::Reply, "reply to that email"),
            (Action::Reply, "respond saying thanks"),
            (Action::Forward, "forward this email to bob"),
            (Action::Archive, "archive these emails"),
            (Action::Delete, "delete the spam emails"),
            (Action::MarkRead, "mark all as read"),
        ],
        Domain::Calendar => &[
            (Action::List, "what meetings do I have today"),
            (Action::List, "show my calendar for tomorrow"),
            (Action::List, "what's on my schedule this week"),
            (Action::Count, "how many meetings do I have"),
            (Action::Count, "count my events this week"),
            (Action::Search, "find my meeting with the design team"),
            (Action::Search, "when is my dentist appointment"),
            (Action::FindFreeTime, "when am I free tomorrow"),
            (Action::FindFreeTime, "find a free slot for an hour"),
            (Action::Create, "schedule a meeting with alex"),
            (Action::Create, "book a call at 3pm"),
            (Action::Update, "move my 2pm to 4pm"),
            (Action::Update, "reschedule the standup"),
            (Action::Delete, "cancel my meeting tomorrow"),
            (Action::Delete, "delete the lunch event"),
        ],
        Domain::Task => &[
            (Action::List, "show my tasks"),
            (Action::List, "what's on my todo list"),
            (Action::List, "what do I need to do today"),
            (Action::Count, "how many tasks are left"),
            (Action::Count, "count my open todos"),
            (Action::Search, "find the task about taxes"),
            (Action::Create, "add a task to buy milk"),
            (Action::Create, "remind me to call mom"),
            (Action::Update, "change the due date of the report task"),
            (Action::Update, "rename the groceries task"),
            (Action::Complete, "mark the report as done"),
            (Action::Complete, "I finished the laundry"),
            (Action::Delete, "delete the gym task"),
            (Action::Delete, "remove that todo"),
        ],
    }
}

/// Nearest-exemplar matcher for one domain
pub struct SemanticMatcher {
    domain: Domain,
    index: Option<Arc<ExemplarIndex>>,
    /// Local-embedder index tried once when the selected provider fails a query
    standby: Option<Arc<ExemplarIndex>>,
    timeout: Duration,
}

fn build_index(domain: Domain, selected: SelectedEmbedder, config: &SemanticConfig) -> Arc<ExemplarIndex> {
    let min_similarity = if selected.provider.is_local() {
        config.local_min_similarity
    } else {
        config.min_similarity
    };
    let exemplars = exemplar_phrases(domain)
        .iter()
        .zip(selected.vectors)
        .map(|((action, phrase), vector)| Exemplar {
            action: *action,
            phrase: *phrase,
            vector,
        })
        .collect();
    Arc::new(ExemplarIndex {
        provider: selected.provider,
        exemplars,
        min_similarity,
    })
}

impl SemanticMatcher {
    /// Embed the domain's exemplars with whichever provider the selector picks
    pub async fn initialize(domain: Domain, selector: &EmbeddingSelector, config: &SemanticConfig) -> Self {
        let texts: Vec<String> = exemplar_phrases(domain)
            .iter()
            .map(|(_, p)| p.to_string())
            .collect();

        let (index, standby) = match selector.select(&texts).await {
            Some(selected) => {
                let standby = selector
                    .standby(&selected, &texts)
                    .await
                    .map(|standby| build_index(domain, standby, config));
                (Some(build_index(domain, selected, config)), standby)
            }
            None => {
                metrics().signal_failed(SignalSource::Semantic);
                (None, None)
            }
        };

        Self {
            domain,
            index,
            standby,
            timeout: config.timeout,
        }
    }

    /// Matcher that never produces a candidate
    pub fn disabled(domain: Domain) -> Self {
        Self {
            domain,
            index: None,
            standby: None,
            timeout: Duration::from_secs(0),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn is_available(&self) -> bool {
        self.index.is_some()
    }

    pub fn index(&self) -> Option<&Arc<ExemplarIndex>> {
        self.index.as_ref()
    }

    /// Whether a local standby index backs the selected provider
    pub fn has_standby(&self) -> bool {
        self.standby.is_some()
    }

    /// Best exemplar or learned-example match above the threshold
    ///
    /// If the selected provider fails this query, the standby index answers it
    /// instead. Both failing leaves the signal absent.
    pub async fn match_query(&self, text: &str, learned: &[LearnedExample]) -> Option<ActionCandidate> {
        let index = self.index.as_ref()?;
        if text.trim().is_empty() {
            return None;
        }

        let learned: Vec<&LearnedExample> = learned
            .iter()
            .filter(|e| self.domain.supports(e.action))
            .collect();

        let err = match self.score(index, text, &learned).await {
            Ok(candidate) => return candidate,
            Err(err) => err,
        };
        metrics().signal_failed(SignalSource::Semantic);

        let Some(standby) = &self.standby else {
            warn!(error = %err, "Semantic signal degraded");
            return None;
        };
        warn!(
            error = %err,
            standby = standby.provider_name(),
            "Semantic signal degraded, retrying with standby embedder"
        );
        match self.score(standby, text, &learned).await {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(error = %err, "Standby embedder failed too");
                None
            }
        }
    }

    async fn score(
        &self,
        index: &ExemplarIndex,
        text: &str,
        learned: &[&LearnedExample],
    ) -> Result<Option<ActionCandidate>, RouterError> {
        let mut inputs = Vec::with_capacity(learned.len() + 1);
        inputs.push(text.to_string());
        inputs.extend(learned.iter().map(|e| e.query.clone()));

        let vectors = match tokio::time::timeout(self.timeout, index.provider.embed_batch(&inputs)).await {
            Ok(Ok(vectors)) if vectors.len() == inputs.len() => vectors,
            Ok(Ok(vectors)) => {
                return Err(RouterError::signal_unavailable(
                    "semantic",
                    format!(
                        "{} returned {} vectors for {} inputs",
                        index.provider_name(),
                        vectors.len(),
                        inputs.len()
                    ),
                ))
            }
            Ok(Err(e)) => {
                return Err(RouterError::signal_unavailable(
                    "semantic",
                    format!("{}: {e}", index.provider_name()),
                ))
            }
            Err(_) => {
                return Err(RouterError::signal_unavailable(
                    "semantic",
                    format!(
                        "{} timed out after {}ms",
                        index.provider_name(),
                        self.timeout.as_millis()
                    ),
                ))
            }
        };

        let query_vector = &vectors[0];
        let mut best: Option<(Action, f32, String)> = None;
        let mut consider = |action: Action, score: f32, rationale: String| {
            let better = match &best {
                Some((_, best_score, _)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((action, score, rationale));
            }
        };

        for exemplar in &index.exemplars {
            let similarity = cosine_similarity(query_vector, &exemplar.vector);
            consider(
                exemplar.action,
                similarity,
                format!("similar to exemplar '{}' ({similarity:.2})", exemplar.phrase),
            );
        }

        for (example, vector) in learned.iter().zip(&vectors[1..]) {
            let similarity = cosine_similarity(query_vector, vector);
            let (score, label) = if example.is_correction() {
                ((similarity + CORRECTION_BONUS).min(1.0), "past correction")
            } else {
                (similarity, "past request")
            };
            consider(
                example.action,
                score,
                format!("similar to {label} '{}' ({similarity:.2})", example.query),
            );
        }

        let Some((action, score, rationale)) = best else {
            return Ok(None);
        };
        if score < index.min_similarity {
            debug!(best = score, threshold = index.min_similarity, "No semantic match above threshold");
            return Ok(None);
        }

        Ok(Some(
            ActionCandidate::new(action, SignalSource::Semantic, score).with_rationale(rationale),
        ))
    }
}

impl std::fmt::Debug for SemanticMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMatcher")
            .field("domain", &self.domain)
            .field("provider", &self.index.as_ref().map(|i| i.provider_name().to_string()))
            .field("standby", &self.standby.as_ref().map(|i| i.provider_name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::learning::ExampleKind;
    use crate::testing::mocks::MockEmbeddingProvider;
    use crate::types::Entities;
    use chrono::Utc;

    async fn local_matcher(domain: Domain) -> SemanticMatcher {
        let selector = EmbeddingSelector::new(None, Some(Arc::new(HashingEmbedder::default())));
        SemanticMatcher::initialize(domain, &selector, &SemanticConfig::default()).await
    }

    #[test]
    fn test_exemplars_only_use_domain_actions() {
        for domain in [Domain::Email, Domain::Calendar, Domain::Task] {
            for (action, phrase) in exemplar_phrases(domain) {
                assert!(domain.supports(*action), "{phrase} in {domain}");
            }
        }
    }

    #[tokio::test]
    async fn test_exact_exemplar_matches_its_action() {
        let matcher = local_matcher(Domain::Calendar).await;
        assert!(matcher.is_available());

        let candidate = matcher
            .match_query("when am I free tomorrow", &[])
            .await
            .unwrap();
        assert_eq!(candidate.action, Action::FindFreeTime);
        assert_eq!(candidate.source, SignalSource::Semantic);
        assert!(candidate.confidence.value() > 0.99);
    }

    #[tokio::test]
    async fn test_unrelated_text_is_below_threshold() {
        let matcher = local_matcher(Domain::Task).await;
        assert!(matcher
            .match_query("quantum chromodynamics lecture notes", &[])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_learned_correction_can_win() {
        let matcher = local_matcher(Domain::Email).await;
        let learned = vec![LearnedExample {
            query: "clean up the newsletters".to_string(),
            action: Action::Archive,
            entities: Entities::new(),
            kind: ExampleKind::Correction {
                wrong_action: Action::Delete,
            },
            similarity: 1.0,
            timestamp: Utc::now(),
        }];

        let candidate = matcher
            .match_query("clean up the newsletters", &learned)
            .await
            .unwrap();
        assert_eq!(candidate.action, Action::Archive);
        assert!(candidate.rationale.contains("past correction"));
    }

    #[tokio::test]
    async fn test_disabled_matcher_returns_none() {
        let matcher = SemanticMatcher::disabled(Domain::Email);
        assert!(!matcher.is_available());
        assert!(matcher.match_query("show my emails", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_query_failure_degrades_to_none() {
        let provider = Arc::new(MockEmbeddingProvider::new(16).failing_after(1));
        let selector = EmbeddingSelector::new(Some(provider), None);
        let matcher =
            SemanticMatcher::initialize(Domain::Email, &selector, &SemanticConfig::default()).await;

        assert!(matcher.is_available());
        assert!(!matcher.has_standby());
        assert!(matcher.match_query("show my emails", &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_query_failure_falls_back_to_standby_embedder() {
        let provider = Arc::new(MockEmbeddingProvider::new(16).failing_after(1));
        let selector = EmbeddingSelector::new(
            Some(provider.clone()),
            Some(Arc::new(HashingEmbedder::default())),
        );
        let matcher =
            SemanticMatcher::initialize(Domain::Email, &selector, &SemanticConfig::default()).await;

        assert_eq!(matcher.index().unwrap().provider_name(), "mock-embedding");
        assert!(matcher.has_standby());

        let candidate = matcher
            .match_query("delete the spam emails", &[])
            .await
            .unwrap();
        assert_eq!(candidate.action, Action::Delete);
        assert_eq!(provider.call_count(), 2);
    }
}
