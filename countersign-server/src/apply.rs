//! Applying workflow actions from signed links.
//!
//! `GET|POST /api/apply_action` is reachable without a session. The link
//! signature is its only authentication. A verified request is applied as
//! the user the link was issued to, and only if the document is still in
//! the state the link was issued for.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use countersign_core::{Document, DocumentRef, SignedActionRequest};

use crate::action::{Reconciler, RepositoryError};
use crate::directory::UserDirectory;
use crate::document::{DocumentError, DocumentStore};
use crate::identity::{ActingUser, Caller};
use crate::notify::{RenderError, TemplateRenderer};
use crate::workflow::{doc_workflow_state, WorkflowGraph};
use crate::AppState;

const ACTION_PAGE_TEMPLATE: &str = include_str!("action_page.html");

const APPLIED_MESSAGE: &str =
    "{{ doctype | escape }}: <b>{{ docname | escape }}</b> is set to state <b>{{ state | escape }}</b>";
const LINK_EXPIRED_MESSAGE: &str = "Document <b>{{ docname | escape }}</b> has been set to state \
     <b>{{ state | escape }}</b> by <b>{{ modified_by | escape }}</b>";
const REJECTED_MESSAGE: &str = "{{ reason | escape }}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        doctype: String,
        docname: String,
        new_state: String,
    },
    /// The document left the state the link was issued for.
    LinkExpired {
        docname: String,
        current_state: String,
        /// Display name of whoever saved the document last.
        modified_by: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("document {0} not found")]
    NotFound(DocumentRef),
    #[error("transition rejected: {0}")]
    Rejected(DocumentError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct ActionApplier {
    documents: Arc<dyn DocumentStore>,
    graph: Arc<dyn WorkflowGraph>,
    directory: Arc<dyn UserDirectory>,
    reconciler: Arc<Reconciler>,
}

impl ActionApplier {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        graph: Arc<dyn WorkflowGraph>,
        directory: Arc<dyn UserDirectory>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            documents,
            graph,
            directory,
            reconciler,
        }
    }

    /// Apply a verified action request on behalf of `caller`.
    ///
    /// Runs as the link's user when `caller` is a guest. After the
    /// transition is saved, reconciliation runs with the same identity so
    /// that user's open action is completed.
    pub async fn apply(
        &self,
        request: &SignedActionRequest,
        caller: &Caller,
    ) -> Result<ApplyOutcome, ApplyError> {
        let params = &request.params;
        let acting = caller.acting_as(&params.user);
        let doc_ref = DocumentRef::new(&params.doctype, &params.docname);

        let doc = self.fetch(&doc_ref).await?;
        if !self.in_link_state(&doc, &params.current_state) {
            return Ok(self.link_expired(&doc));
        }

        let saved = match self
            .documents
            .apply_transition(&doc_ref, &params.current_state, &params.action, &acting)
            .await
        {
            Ok(saved) => saved,
            Err(DocumentError::StateChanged { .. }) => {
                // Someone else moved the document between our read and the write.
                let doc = self.fetch(&doc_ref).await?;
                return Ok(self.link_expired(&doc));
            }
            Err(e) => return Err(ApplyError::Rejected(e)),
        };

        self.after_save(&saved, &acting).await?;

        let new_state = doc_workflow_state(self.graph.as_ref(), &saved).unwrap_or_default();
        info!(
            "{} applied '{}' to {}, now '{}'",
            acting, params.action, doc_ref, new_state
        );

        Ok(ApplyOutcome::Applied {
            doctype: saved.doctype,
            docname: saved.name,
            new_state,
        })
    }

    async fn fetch(&self, doc_ref: &DocumentRef) -> Result<Document, ApplyError> {
        self.documents.get(doc_ref).await.map_err(|e| match e {
            DocumentError::NotFound(r) => ApplyError::NotFound(r),
            other => ApplyError::Rejected(other),
        })
    }

    fn in_link_state(&self, doc: &Document, link_state: &str) -> bool {
        doc_workflow_state(self.graph.as_ref(), doc).as_deref() == Some(link_state)
    }

    fn link_expired(&self, doc: &Document) -> ApplyOutcome {
        ApplyOutcome::LinkExpired {
            docname: doc.name.clone(),
            current_state: doc_workflow_state(self.graph.as_ref(), doc).unwrap_or_default(),
            modified_by: self.directory.full_name(&doc.modified_by),
        }
    }

    async fn after_save(&self, saved: &Document, acting: &ActingUser) -> Result<(), ApplyError> {
        self.reconciler.process_state_change(saved, acting).await?;
        Ok(())
    }
}

// =============================================================================
// HTTP handler
// =============================================================================

/// Handler: GET /api/apply_action
pub async fn apply_action_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    apply_action(&state, query).await
}

/// Handler: POST /api/apply_action
///
/// Accepts the link parameters in the query string, a form body, or both.
/// Body values win.
pub async fn apply_action_post(
    State(state): State<Arc<AppState>>,
    Query(mut query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if !body.is_empty() {
        match serde_urlencoded::from_bytes::<Vec<(String, String)>>(&body) {
            Ok(fields) => query.extend(fields),
            Err(e) => {
                warn!("Unparseable apply_action form body: {}", e);
                return state.pages.invalid_link();
            }
        }
    }
    apply_action(&state, query).await
}

async fn apply_action(state: &AppState, query: HashMap<String, String>) -> Response {
    let request = match state.signer.verify(&query, Utc::now().timestamp()) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected action link: {}", e);
            return state.pages.invalid_link();
        }
    };

    // No session layer: every caller of this endpoint is a guest.
    let pages = &state.pages;
    match state.applier.apply(&request, &Caller::Guest).await {
        Ok(ApplyOutcome::Applied {
            doctype,
            docname,
            new_state,
        }) => pages.render(
            StatusCode::OK,
            "Success",
            "green",
            APPLIED_MESSAGE,
            &[
                ("doctype", doctype.as_str()),
                ("docname", docname.as_str()),
                ("state", new_state.as_str()),
            ],
        ),
        Ok(ApplyOutcome::LinkExpired {
            docname,
            current_state,
            modified_by,
        }) => pages.render(
            StatusCode::OK,
            "Link Expired",
            "blue",
            LINK_EXPIRED_MESSAGE,
            &[
                ("docname", docname.as_str()),
                ("state", current_state.as_str()),
                ("modified_by", modified_by.as_str()),
            ],
        ),
        Err(ApplyError::NotFound(doc_ref)) => {
            warn!("Action link for missing document {}", doc_ref);
            pages.render(
                StatusCode::NOT_FOUND,
                "Not Found",
                "red",
                "The document this link refers to no longer exists.",
                &[],
            )
        }
        Err(ApplyError::Rejected(e)) => {
            warn!("Action from link rejected: {}", e);
            let reason = e.to_string();
            pages.render(
                StatusCode::FORBIDDEN,
                "Not Permitted",
                "red",
                REJECTED_MESSAGE,
                &[("reason", reason.as_str())],
            )
        }
        Err(ApplyError::Repository(e)) => {
            error!("Failed to record workflow actions after applying link: {}", e);
            pages.render(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error",
                "red",
                "Something went wrong while applying this action. Please try again later.",
                &[],
            )
        }
    }
}

/// The HTML pages the apply endpoint answers with.
///
/// Each message is a liquid template rendered over its values, then placed
/// into the shared page layout.
pub struct ActionPages {
    renderer: TemplateRenderer,
}

impl ActionPages {
    pub fn new() -> Result<Self, RenderError> {
        Ok(Self {
            renderer: TemplateRenderer::new()?,
        })
    }

    /// Same answer for every verification failure.
    pub fn invalid_link(&self) -> Response {
        self.render(
            StatusCode::FORBIDDEN,
            "Invalid Link",
            "red",
            "This link is invalid or expired. Please make sure you have pasted correctly.",
            &[],
        )
    }

    pub fn render(
        &self,
        status: StatusCode,
        title: &str,
        indicator: &str,
        message: &str,
        values: &[(&str, &str)],
    ) -> Response {
        match self.render_html(title, indicator, message, values) {
            Ok(html) => (status, Html(html)).into_response(),
            Err(e) => {
                error!("Failed to render '{}' action page: {}", title, e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render page").into_response()
            }
        }
    }

    fn render_html(
        &self,
        title: &str,
        indicator: &str,
        message: &str,
        values: &[(&str, &str)],
    ) -> Result<String, RenderError> {
        let message = self.renderer.render(message, &context(values))?;
        self.renderer.render(
            ACTION_PAGE_TEMPLATE,
            &context(&[
                ("title", title),
                ("indicator", indicator),
                ("message", message.as_str()),
            ]),
        )
    }
}

fn context(values: &[(&str, &str)]) -> Map<String, Value> {
    values
        .iter()
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect()
}
