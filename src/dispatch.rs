//! Action execution boundary
//!
//! The engine never performs domain work itself. A routed action and its
//! entities are handed to an [`ActionExecutor`]; its errors come back to the
//! caller unchanged. [`HandlerExecutor`] maps each `Action` variant onto one
//! method of an [`ActionHandlers`] implementation with an exhaustive match.

use crate::error::ExecutionError;
use crate::types::{Action, Domain, Entities};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Executes one routed action
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: Action, entities: &Entities) -> Result<Value, ExecutionError>;
}

fn unsupported(action: Action) -> ExecutionError {
    ExecutionError::Unsupported(action.to_string())
}

/// Per-action handlers for one domain
///
/// Every method defaults to `Unsupported`; a domain overrides the actions it
/// implements.
#[async_trait]
pub trait ActionHandlers: Send + Sync {
    async fn list(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::List))
    }

    async fn count(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Count))
    }

    async fn search(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Search))
    }

    async fn read(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Read))
    }

    async fn create(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Create))
    }

    async fn update(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Update))
    }

    async fn delete(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Delete))
    }

    async fn send(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Send))
    }

    async fn reply(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Reply))
    }

    async fn forward(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Forward))
    }

    async fn archive(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Archive))
    }

    async fn mark_read(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::MarkRead))
    }

    async fn complete(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::Complete))
    }

    async fn find_free_time(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
        Err(unsupported(Action::FindFreeTime))
    }
}

/// Adapts `ActionHandlers` to `ActionExecutor` for one domain
pub struct HandlerExecutor<H> {
    domain: Domain,
    handlers: H,
}

impl<H: ActionHandlers> HandlerExecutor<H> {
    pub fn new(domain: Domain, handlers: H) -> Self {
        Self { domain, handlers }
    }

    pub fn handlers(&self) -> &H {
        &self.handlers
    }
}

#[async_trait]
impl<H: ActionHandlers> ActionExecutor for HandlerExecutor<H> {
    async fn execute(&self, action: Action, entities: &Entities) -> Result<Value, ExecutionError> {
        if !self.domain.supports(action) {
            return Err(ExecutionError::Unsupported(format!(
                "{action} in {} domain",
                self.domain
            )));
        }

        debug!(domain = %self.domain, %action, "Dispatching action");
        let h = &self.handlers;
        match action {
            Action::List => h.list(entities).await,
            Action::Count => h.count(entities).await,
            Action::Search => h.search(entities).await,
            Action::Read => h.read(entities).await,
            Action::Create => h.create(entities).await,
            Action::Update => h.update(entities).await,
            Action::Delete => h.delete(entities).await,
            Action::Send => h.send(entities).await,
            Action::Reply => h.reply(entities).await,
            Action::Forward => h.forward(entities).await,
            Action::Archive => h.archive(entities).await,
            Action::MarkRead => h.mark_read(entities).await,
            Action::Complete => h.complete(entities).await,
            Action::FindFreeTime => h.find_free_time(entities).await,
            Action::Unknown => Err(unsupported(action)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TaskHandlers;

    #[async_trait]
    impl ActionHandlers for TaskHandlers {
        async fn list(&self, _entities: &Entities) -> Result<Value, ExecutionError> {
            Ok(json!([{ "id": "t1", "title": "report" }]))
        }

        async fn complete(&self, entities: &Entities) -> Result<Value, ExecutionError> {
            match entities.get("id") {
                Some(id) => Ok(json!({ "id": id, "done": true })),
                None => Err(ExecutionError::InvalidParameters("missing id".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_dispatches_to_handler() {
        let executor = HandlerExecutor::new(Domain::Task, TaskHandlers);
        let output = executor.execute(Action::List, &Entities::new()).await.unwrap();
        assert_eq!(output[0]["id"], "t1");
    }

    #[tokio::test]
    async fn test_handler_errors_pass_through_unchanged() {
        let executor = HandlerExecutor::new(Domain::Task, TaskHandlers);
        let err = executor
            .execute(Action::Complete, &Entities::new())
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::InvalidParameters("missing id".to_string()));
    }

    #[tokio::test]
    async fn test_unimplemented_and_foreign_actions_are_unsupported() {
        let executor = HandlerExecutor::new(Domain::Task, TaskHandlers);
        assert!(matches!(
            executor.execute(Action::Update, &Entities::new()).await,
            Err(ExecutionError::Unsupported(_))
        ));
        assert!(matches!(
            executor.execute(Action::Reply, &Entities::new()).await,
            Err(ExecutionError::Unsupported(_))
        ));
        assert!(matches!(
            executor.execute(Action::Unknown, &Entities::new()).await,
            Err(ExecutionError::Unsupported(_))
        ));
    }
}
