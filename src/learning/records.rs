//! Learning records and the examples derived from them

use crate::types::{Action, Entities};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user correcting a misrouted query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub query: String,
    pub wrong_action: Action,
    pub correct_action: Action,
    pub timestamp: DateTime<Utc>,
}

impl CorrectionRecord {
    pub fn new(
        user_id: impl Into<String>,
        query: impl Into<String>,
        wrong_action: Action,
        correct_action: Action,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            query: query.into(),
            wrong_action,
            correct_action,
            timestamp: Utc::now(),
        }
    }
}

/// A query that was resolved and executed successfully
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRecord {
    pub id: Uuid,
    pub user_id: String,
    pub query: String,
    pub action: Action,
    #[serde(default)]
    pub entities: Entities,
    pub timestamp: DateTime<Utc>,
}

impl SuccessRecord {
    pub fn new(
        user_id: impl Into<String>,
        query: impl Into<String>,
        action: Action,
        entities: Entities,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            query: query.into(),
            action,
            entities,
            timestamp: Utc::now(),
        }
    }
}

/// One line of persisted learning history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningRecord {
    Correction(CorrectionRecord),
    Success(SuccessRecord),
}

impl LearningRecord {
    pub fn user_id(&self) -> &str {
        match self {
            LearningRecord::Correction(r) => &r.user_id,
            LearningRecord::Success(r) => &r.user_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LearningRecord::Correction(r) => r.timestamp,
            LearningRecord::Success(r) => r.timestamp,
        }
    }
}

/// Where a learned example came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExampleKind {
    Correction { wrong_action: Action },
    Success,
}

/// A past query and its right action, ranked against a new query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedExample {
    pub query: String,
    pub action: Action,
    #[serde(default)]
    pub entities: Entities,
    pub kind: ExampleKind,
    pub similarity: f32,
    pub timestamp: DateTime<Utc>,
}

impl LearnedExample {
    pub fn is_correction(&self) -> bool {
        matches!(self.kind, ExampleKind::Correction { .. })
    }
}

impl From<&CorrectionRecord> for LearnedExample {
    fn from(record: &CorrectionRecord) -> Self {
        Self {
            query: record.query.clone(),
            action: record.correct_action,
            entities: Entities::new(),
            kind: ExampleKind::Correction {
                wrong_action: record.wrong_action,
            },
            similarity: 0.0,
            timestamp: record.timestamp,
        }
    }
}

impl From<&SuccessRecord> for LearnedExample {
    fn from(record: &SuccessRecord) -> Self {
        Self {
            query: record.query.clone(),
            action: record.action,
            entities: record.entities.clone(),
            kind: ExampleKind::Success,
            similarity: 0.0,
            timestamp: record.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization_is_tagged() {
        let record = LearningRecord::Correction(CorrectionRecord::new(
            "u1",
            "show my meetings",
            Action::Create,
            Action::List,
        ));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "correction");
        assert_eq!(json["wrong_action"], "create");
        assert_eq!(json["correct_action"], "list");

        let back: LearningRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.user_id(), "u1");
    }

    #[test]
    fn test_example_from_correction_uses_correct_action() {
        let record = CorrectionRecord::new("u1", "q", Action::Create, Action::List);
        let example = LearnedExample::from(&record);
        assert_eq!(example.action, Action::List);
        assert!(example.is_correction());
        assert_eq!(
            example.kind,
            ExampleKind::Correction {
                wrong_action: Action::Create
            }
        );
    }

    #[test]
    fn test_records_get_unique_ids() {
        let a = SuccessRecord::new("u1", "q", Action::List, Entities::new());
        let b = SuccessRecord::new("u1", "q", Action::List, Entities::new());
        assert_ne!(a.id, b.id);
    }
}
