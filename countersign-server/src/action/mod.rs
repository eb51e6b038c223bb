//! Workflow action records and their reconciliation.

pub mod reconcile;
pub mod record;
pub mod repository;
pub mod visibility;

pub use reconcile::Reconciler;
pub use record::{
    ActionStatus, PlanOutcome, ReconcileKey, ReconciliationPlan, WorkflowActionRecord,
};
pub use repository::{ActionRepository, InMemoryRepository, RepositoryError, SqliteRepository};
pub use visibility::{can_read, ActionVisibility};
