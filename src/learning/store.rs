//! Bounded per-user learning store

use super::backend::{JsonlFileBackend, PersistenceBackend, PersistenceError};
use super::records::{CorrectionRecord, LearnedExample, LearningRecord, SuccessRecord};
use crate::config::ConfigError;
use crate::learning_span;
use crate::observability::metrics;
use crate::types::{normalize_text, Action, Entities};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn, Instrument};

/// Learning store tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningConfig {
    /// Corrections retained per user (FIFO)
    pub max_corrections: usize,
    /// Successes retained per user (FIFO)
    pub max_successes: usize,
    /// Directory for per-user JSONL files; in-memory only when unset
    pub storage_dir: Option<PathBuf>,
    /// Few-shot examples retrieved per request
    pub few_shot_k: usize,
    /// Minimum text similarity for `get_similar`
    pub min_similarity: f32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_corrections: 100,
            max_successes: 50,
            storage_dir: None,
            few_shot_k: 5,
            min_similarity: 0.3,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_corrections == 0 || self.max_successes == 0 {
            return Err(ConfigError::InvalidConfig(
                "learning bounds must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(ConfigError::InvalidConfig(format!(
                "learning.min_similarity {} must be within 0.0..=1.0",
                self.min_similarity
            )));
        }
        Ok(())
    }
}

/// Rolling window of one user's corrections and successes
///
/// Records only enter through [`record_correction`](Self::record_correction)
/// and [`record_success`](Self::record_success), and only leave through FIFO
/// eviction. Storage failures are logged and never reach the caller.
pub struct LearningStore {
    user_id: String,
    config: LearningConfig,
    corrections: RwLock<VecDeque<CorrectionRecord>>,
    successes: RwLock<VecDeque<SuccessRecord>>,
    backend: Option<Arc<dyn PersistenceBackend>>,
    /// Orders window updates with their storage writes
    io_lock: Mutex<()>,
    appends_since_compact: AtomicUsize,
}

impl LearningStore {
    pub fn new(
        user_id: impl Into<String>,
        config: LearningConfig,
        backend: Option<Arc<dyn PersistenceBackend>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            config,
            corrections: RwLock::new(VecDeque::new()),
            successes: RwLock::new(VecDeque::new()),
            backend,
            io_lock: Mutex::new(()),
            appends_since_compact: AtomicUsize::new(0),
        }
    }

    /// Store without durable storage
    pub fn in_memory(user_id: impl Into<String>, config: LearningConfig) -> Self {
        Self::new(user_id, config, None)
    }

    /// Store backed by a JSONL file when `storage_dir` is configured
    pub fn from_config(user_id: impl Into<String>, config: LearningConfig) -> Self {
        let user_id = user_id.into();
        let backend = config.storage_dir.as_ref().map(|dir| {
            Arc::new(JsonlFileBackend::new(dir, &user_id)) as Arc<dyn PersistenceBackend>
        });
        Self::new(user_id, config, backend)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    fn scan_limit(&self) -> usize {
        (self.config.max_corrections + self.config.max_successes) * 4
    }

    /// Load recent history from storage, returning the number of records kept
    pub async fn open(&self) -> usize {
        match self.try_open().await {
            Ok(loaded) => loaded,
            Err(e) => {
                metrics().persistence_failed();
                warn!(user_id = %self.user_id, error = %e, "Learning history unavailable, starting empty");
                0
            }
        }
    }

    /// Load recent history, surfacing storage errors
    pub async fn try_open(&self) -> Result<usize, PersistenceError> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };

        let span = learning_span!(user_id = %self.user_id, op = "open");
        let records = backend.read_recent(self.scan_limit()).instrument(span).await?;

        let mut corrections = self.corrections.write().await;
        let mut successes = self.successes.write().await;
        corrections.clear();
        successes.clear();

        let mut foreign = 0usize;
        for record in records {
            if record.user_id() != self.user_id {
                foreign += 1;
                continue;
            }
            match record {
                LearningRecord::Correction(r) => {
                    push_bounded(&mut corrections, r, self.config.max_corrections)
                }
                LearningRecord::Success(r) => {
                    push_bounded(&mut successes, r, self.config.max_successes)
                }
            }
        }

        if foreign > 0 {
            warn!(user_id = %self.user_id, foreign, "Ignored learning records owned by other users");
        }

        let loaded = corrections.len() + successes.len();
        info!(
            user_id = %self.user_id,
            backend = backend.name(),
            corrections = corrections.len(),
            successes = successes.len(),
            "Learning store opened"
        );
        Ok(loaded)
    }

    /// Rewrite storage to exactly the retained records, logging failures
    pub async fn flush(&self) {
        if let Err(e) = self.try_flush().await {
            metrics().persistence_failed();
            warn!(user_id = %self.user_id, error = %e, "Failed to flush learning store");
        }
    }

    /// Rewrite storage to exactly the retained records
    pub async fn try_flush(&self) -> Result<(), PersistenceError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        // Held across snapshot and rewrite so no append lands in between
        let _io = self.io_lock.lock().await;
        let snapshot = self.snapshot_records().await;
        backend.compact(&snapshot).await?;
        self.appends_since_compact.store(0, Ordering::Relaxed);
        debug!(user_id = %self.user_id, records = snapshot.len(), "Learning store flushed");
        Ok(())
    }

    /// Retained records in timestamp order
    async fn snapshot_records(&self) -> Vec<LearningRecord> {
        let corrections = self.corrections.read().await;
        let successes = self.successes.read().await;
        let mut records: Vec<LearningRecord> = corrections
            .iter()
            .cloned()
            .map(LearningRecord::Correction)
            .chain(successes.iter().cloned().map(LearningRecord::Success))
            .collect();
        records.sort_by_key(|r| r.timestamp());
        records
    }

    /// Record an explicit user correction
    ///
    /// Returns `None` for an empty query or when `wrong` equals `correct`.
    pub async fn record_correction(
        &self,
        query: &str,
        wrong_action: Action,
        correct_action: Action,
    ) -> Option<CorrectionRecord> {
        let query = query.trim();
        if query.is_empty() || wrong_action == correct_action || correct_action.is_unknown() {
            debug!(wrong = %wrong_action, correct = %correct_action, "Ignoring non-correction feedback");
            return None;
        }

        let record = CorrectionRecord::new(&self.user_id, query, wrong_action, correct_action);
        let compact_due = {
            let _io = self.io_lock.lock().await;
            {
                let mut corrections = self.corrections.write().await;
                push_bounded(&mut corrections, record.clone(), self.config.max_corrections);
            }
            self.persist(LearningRecord::Correction(record.clone())).await
        };
        metrics().correction_recorded();
        info!(
            user_id = %self.user_id,
            wrong = %wrong_action,
            correct = %correct_action,
            "Correction recorded"
        );

        if compact_due {
            self.flush().await;
        }
        Some(record)
    }

    /// Record an explicitly confirmed successful resolution
    pub async fn record_success(
        &self,
        query: &str,
        action: Action,
        entities: Entities,
    ) -> Option<SuccessRecord> {
        let query = query.trim();
        if query.is_empty() || action.is_unknown() {
            return None;
        }

        let record = SuccessRecord::new(&self.user_id, query, action, entities);
        let compact_due = {
            let _io = self.io_lock.lock().await;
            {
                let mut successes = self.successes.write().await;
                push_bounded(&mut successes, record.clone(), self.config.max_successes);
            }
            self.persist(LearningRecord::Success(record.clone())).await
        };
        metrics().success_recorded();
        debug!(user_id = %self.user_id, action = %action, "Success recorded");

        if compact_due {
            self.flush().await;
        }
        Some(record)
    }

    /// Append one record, returning whether the file is due for compaction
    ///
    /// Callers hold `io_lock`.
    async fn persist(&self, record: LearningRecord) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };

        let span = learning_span!(user_id = %self.user_id, op = "append");
        if let Err(e) = backend.append(&record).instrument(span).await {
            metrics().persistence_failed();
            warn!(user_id = %self.user_id, error = %e, "Failed to persist learning record");
            return false;
        }

        let appended = self.appends_since_compact.fetch_add(1, Ordering::Relaxed) + 1;
        appended >= self.config.max_corrections + self.config.max_successes
    }

    /// Up to `k` past examples most similar to `query`
    ///
    /// Ranked by similarity, corrections before successes on ties, then newest
    /// first. Each distinct query appears once.
    pub async fn get_similar(&self, query: &str, k: usize) -> Vec<LearnedExample> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<LearnedExample> = {
            let corrections = self.corrections.read().await;
            let successes = self.successes.read().await;
            corrections
                .iter()
                .map(LearnedExample::from)
                .chain(successes.iter().map(LearnedExample::from))
                .filter_map(|mut example| {
                    example.similarity = text_similarity(query, &example.query);
                    (example.similarity >= self.config.min_similarity).then_some(example)
                })
                .collect()
        };

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.is_correction().cmp(&a.is_correction()))
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter(|example| seen.insert(normalize_text(&example.query)))
            .take(k)
            .collect()
    }

    pub async fn correction_count(&self) -> usize {
        self.corrections.read().await.len()
    }

    pub async fn success_count(&self) -> usize {
        self.successes.read().await.len()
    }

    /// Retained corrections, oldest first
    pub async fn corrections(&self) -> Vec<CorrectionRecord> {
        self.corrections.read().await.iter().cloned().collect()
    }

    /// Retained successes, oldest first
    pub async fn successes(&self) -> Vec<SuccessRecord> {
        self.successes.read().await.iter().cloned().collect()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, bound: usize) {
    queue.push_back(item);
    while queue.len() > bound {
        queue.pop_front();
    }
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn trigrams(text: &str) -> HashSet<String> {
    let cleaned: Vec<char> = normalize_text(text)
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();
    cleaned.windows(3).map(|w| w.iter().collect()).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

/// Blend of word and character-trigram Jaccard similarity in `[0, 1]`
pub fn text_similarity(a: &str, b: &str) -> f32 {
    if normalize_text(a) == normalize_text(b) && !a.trim().is_empty() {
        return 1.0;
    }
    0.6 * jaccard(&words(a), &words(b)) + 0.4 * jaccard(&trigrams(a), &trigrams(b))
}
