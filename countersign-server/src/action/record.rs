//! Workflow action records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use countersign_core::DocumentRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionStatus {
    Open,
    Completed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Open => "Open",
            ActionStatus::Completed => "Completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Open" => Some(ActionStatus::Open),
            "Completed" => Some(ActionStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One approval task: `user` may act on a document in `workflow_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowActionRecord {
    pub id: String,
    pub reference_doctype: String,
    pub reference_name: String,
    pub workflow_state: String,
    pub user: String,
    pub status: ActionStatus,
    pub completed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowActionRecord {
    pub fn open(key: &ReconcileKey, user: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reference_doctype: key.document.doctype.clone(),
            reference_name: key.document.name.clone(),
            workflow_state: key.state.clone(),
            user: user.into(),
            status: ActionStatus::Open,
            completed_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(&self.reference_doctype, &self.reference_name)
    }

    pub fn is_open(&self) -> bool {
        self.status == ActionStatus::Open
    }

    pub fn is_for(&self, document: &DocumentRef) -> bool {
        self.reference_doctype == document.doctype && self.reference_name == document.name
    }
}

/// A document in a particular workflow state. Reconciliation runs at most
/// once per key while open actions exist for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileKey {
    pub document: DocumentRef,
    pub state: String,
}

impl ReconcileKey {
    pub fn new(document: DocumentRef, state: impl Into<String>) -> Self {
        Self {
            document,
            state: state.into(),
        }
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ '{}'", self.document, self.state)
    }
}

/// Record mutations of one reconciliation pass, applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub key: ReconcileKey,
    /// User whose save caused the state change.
    pub triggered_by: String,
    /// Users who get a new open action for `key.state`.
    pub assignees: Vec<String>,
}

/// Result of applying a [`ReconciliationPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Open actions already existed for the key; nothing changed.
    AlreadyReconciled,
    Applied {
        /// Other users' open actions deleted.
        removed: usize,
        /// Triggering user's open actions completed.
        completed: usize,
        created: usize,
    },
}
