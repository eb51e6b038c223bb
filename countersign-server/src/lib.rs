pub mod action;
pub mod apply;
pub mod config;
pub mod directory;
pub mod document;
pub mod fixture;
pub mod identity;
pub mod notify;
pub mod status;
pub mod webhook;
pub mod workflow;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use countersign_core::{LinkSigner, APPLY_ACTION_PATH};

use crate::action::{ActionRepository, Reconciler};
use crate::apply::{ActionApplier, ActionPages};
use crate::directory::{StaticDirectory, UserDirectory};
use crate::document::{DocumentStore, MemoryDocumentStore};
use crate::fixture::Fixture;
use crate::notify::{LoggingUiNotifier, NotificationQueue, RenderError};
use crate::workflow::{
    OwnerApprovalRule, PermissionGate, RoleBasedPermissions, StaticWorkflowGraph, WorkflowGraph,
};

/// The trusted super-user. Sees every action record and may take any
/// transition, but is never offered actions by role.
pub const ADMINISTRATOR: &str = "Administrator";

/// Identity of a caller without a session.
pub const GUEST: &str = "Guest";

pub struct AppState {
    pub signer: Arc<LinkSigner>,
    pub event_secret: String,
    pub graph: Arc<dyn WorkflowGraph>,
    pub directory: Arc<dyn UserDirectory>,
    pub documents: Arc<dyn DocumentStore>,
    pub actions: Arc<dyn ActionRepository>,
    pub reconciler: Arc<Reconciler>,
    pub applier: ActionApplier,
    pub pages: ActionPages,
    pub status_auth_token: Option<String>,
}

/// Inputs from which [`AppState::assemble`] wires the service together.
pub struct AppParts {
    pub fixture: Fixture,
    pub actions: Arc<dyn ActionRepository>,
    pub signer: LinkSigner,
    pub event_secret: String,
    pub status_auth_token: Option<String>,
    /// Where the reconciler queues notification jobs.
    pub queue: NotificationQueue,
}

impl AppState {
    pub async fn assemble(parts: AppParts) -> Result<Arc<Self>, RenderError> {
        let AppParts {
            fixture,
            actions,
            signer,
            event_secret,
            status_auth_token,
            queue,
        } = parts;

        let graph: Arc<dyn WorkflowGraph> = Arc::new(StaticWorkflowGraph::new(
            fixture.workflows,
            fixture.email_templates,
        ));
        let directory: Arc<dyn UserDirectory> = Arc::new(StaticDirectory::new(fixture.users));
        let documents: Arc<dyn DocumentStore> = Arc::new(
            MemoryDocumentStore::new(graph.clone(), directory.clone())
                .with_documents(fixture.documents)
                .await,
        );

        let gate = PermissionGate::new(
            Arc::new(RoleBasedPermissions::new(graph.clone(), directory.clone())),
            Arc::new(OwnerApprovalRule::new(graph.clone())),
        );
        let signer = Arc::new(signer);
        let reconciler = Arc::new(Reconciler::new(
            graph.clone(),
            directory.clone(),
            gate,
            actions.clone(),
            signer.clone(),
            Arc::new(LoggingUiNotifier),
            queue,
        ));
        let applier = ActionApplier::new(
            documents.clone(),
            graph.clone(),
            directory.clone(),
            reconciler.clone(),
        );

        Ok(Arc::new(Self {
            signer,
            event_secret,
            graph,
            directory,
            documents,
            actions,
            reconciler,
            applier,
            pages: ActionPages::new()?,
            status_auth_token,
        }))
    }
}

/// Every HTTP route of the service.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(status::health_check))
        .route("/status", get(status::status_handler))
        .route(
            APPLY_ACTION_PATH,
            get(apply::apply_action_get).post(apply::apply_action_post),
        )
        .merge(webhook::events_router(state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
