//! Repository abstraction for workflow action records.
//!
//! This module defines the `ActionRepository` trait that abstracts
//! storage of action records. Implementations provide different backends
//! (in-memory, SQLite).

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;

use countersign_core::DocumentRef;

use super::record::{ActionStatus, PlanOutcome, ReconcileKey, ReconciliationPlan, WorkflowActionRecord};
use super::visibility::ActionVisibility;

/// Errors from the action record store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
    #[error("corrupt {what} in action store")]
    Corruption { what: String },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

#[async_trait]
pub trait ActionRepository: Send + Sync {
    /// Whether any open action exists for the key, regardless of user.
    async fn has_open_for_state(&self, key: &ReconcileKey) -> Result<bool, RepositoryError>;

    /// Apply one reconciliation pass atomically:
    ///
    /// 1. If an open action exists for `plan.key`, change nothing and return
    ///    `AlreadyReconciled`.
    /// 2. Delete open actions on the document assigned to anyone other than
    ///    `plan.triggered_by`, in any state.
    /// 3. Complete open actions on the document assigned to
    ///    `plan.triggered_by`, attributed to them.
    /// 4. Create one open action per assignee for `plan.key.state`.
    ///
    /// Concurrent calls for the same key are serialised, so at most one of
    /// them gets past step 1. Either every step takes effect or none does.
    async fn reconcile(&self, plan: &ReconciliationPlan) -> Result<PlanOutcome, RepositoryError>;

    /// All actions on a document, oldest first.
    async fn for_document(
        &self,
        document: &DocumentRef,
    ) -> Result<Vec<WorkflowActionRecord>, RepositoryError>;

    /// Actions visible under `visibility`, optionally filtered by status,
    /// oldest first.
    async fn list(
        &self,
        visibility: &ActionVisibility,
        status: Option<ActionStatus>,
    ) -> Result<Vec<WorkflowActionRecord>, RepositoryError>;
}
