//! Document store and the workflow-application routine.
//!
//! The store mirrors documents announced through state-change events and
//! owns the one write the workflow layer performs on documents: moving a
//! document along a transition.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use countersign_core::{Document, DocumentRef};

use crate::directory::UserDirectory;
use crate::identity::ActingUser;
use crate::workflow::{doc_workflow_state, WorkflowGraph};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("document {0} not found")]
    NotFound(DocumentRef),
    #[error("no active workflow for {0}")]
    NoWorkflow(String),
    #[error("document moved from '{expected}' to '{actual}'")]
    StateChanged { expected: String, actual: String },
    #[error("action '{action}' is not a transition out of state '{state}'")]
    TransitionNotAllowed { action: String, state: String },
    #[error("user {user} may not perform '{action}'")]
    NotPermitted { user: String, action: String },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, doc_ref: &DocumentRef) -> Result<Document, DocumentError>;

    /// Insert or replace a document snapshot.
    async fn upsert(&self, doc: Document);

    /// Apply `action` to the live document as `acting`, returning the saved
    /// document.
    ///
    /// The live state must still be `expected_state`, the action must leave
    /// it, and `acting` must hold the transition's allowed role. Read and
    /// write happen under one lock.
    async fn apply_transition(
        &self,
        doc_ref: &DocumentRef,
        expected_state: &str,
        action: &str,
        acting: &ActingUser,
    ) -> Result<Document, DocumentError>;
}

/// In-memory document store.
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocumentRef, Document>>,
    graph: Arc<dyn WorkflowGraph>,
    directory: Arc<dyn UserDirectory>,
}

impl MemoryDocumentStore {
    pub fn new(graph: Arc<dyn WorkflowGraph>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            graph,
            directory,
        }
    }

    pub async fn with_documents(self, documents: Vec<Document>) -> Self {
        {
            let mut stored = self.documents.write().await;
            for doc in documents {
                stored.insert(doc.doc_ref(), doc);
            }
        }
        self
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, doc_ref: &DocumentRef) -> Result<Document, DocumentError> {
        let documents = self.documents.read().await;
        documents
            .get(doc_ref)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(doc_ref.clone()))
    }

    async fn upsert(&self, doc: Document) {
        let mut documents = self.documents.write().await;
        documents.insert(doc.doc_ref(), doc);
    }

    async fn apply_transition(
        &self,
        doc_ref: &DocumentRef,
        expected_state: &str,
        action: &str,
        acting: &ActingUser,
    ) -> Result<Document, DocumentError> {
        let mut documents = self.documents.write().await;
        let doc = documents
            .get_mut(doc_ref)
            .ok_or_else(|| DocumentError::NotFound(doc_ref.clone()))?;

        let workflow = self
            .graph
            .workflow_name(&doc.doctype)
            .ok_or_else(|| DocumentError::NoWorkflow(doc.doctype.clone()))?;
        let state_field = self
            .graph
            .workflow_state_field(&workflow)
            .ok_or_else(|| DocumentError::NoWorkflow(doc.doctype.clone()))?;
        let state = doc_workflow_state(self.graph.as_ref(), doc).unwrap_or_default();
        if state != expected_state {
            return Err(DocumentError::StateChanged {
                expected: expected_state.to_string(),
                actual: state,
            });
        }

        let transition = self
            .graph
            .next_transitions(&workflow, &state)
            .into_iter()
            .find(|t| t.action == action)
            .ok_or_else(|| DocumentError::TransitionNotAllowed {
                action: action.to_string(),
                state: state.clone(),
            })?;

        if !acting.is_administrator()
            && !self.directory.has_role(acting.name(), &transition.allowed)
        {
            return Err(DocumentError::NotPermitted {
                user: acting.name().to_string(),
                action: action.to_string(),
            });
        }

        doc.set_field(state_field, transition.next_state.clone());
        doc.modified_by = acting.name().to_string();

        info!(
            "{} moved {} from '{}' to '{}' via '{}'",
            acting, doc_ref, state, transition.next_state, action
        );

        Ok(doc.clone())
    }
}
