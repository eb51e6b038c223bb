//! Builds and sends one action email per recipient.

use std::sync::Arc;

use tracing::{debug, error, warn};

use countersign_core::Document;

use super::mailer::{Attachment, Mailer, OutgoingEmail};
use super::render::TemplateRenderer;
use super::{DispatchJob, UserActionBundle};
use crate::workflow::WorkflowGraph;

const FALLBACK_SUBJECT: &str = "Workflow Action";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    /// Recipients without an email address.
    pub skipped: usize,
    pub failed: usize,
}

pub struct NotificationDispatcher {
    graph: Arc<dyn WorkflowGraph>,
    mailer: Arc<dyn Mailer>,
    renderer: TemplateRenderer,
}

/// Subject and message shared by every recipient of a job.
struct RenderedMessage {
    subject: String,
    message: String,
}

impl NotificationDispatcher {
    pub fn new(
        graph: Arc<dyn WorkflowGraph>,
        mailer: Arc<dyn Mailer>,
        renderer: TemplateRenderer,
    ) -> Self {
        Self {
            graph,
            mailer,
            renderer,
        }
    }

    /// Mail every bundle in `job`. Each recipient succeeds or fails on its own.
    pub async fn dispatch(&self, job: &DispatchJob) -> DispatchReport {
        let mut report = DispatchReport::default();
        let rendered = self.render_message(job);
        let printout = printout(&job.document);

        for bundle in &job.bundles {
            let Some(email) = bundle.email.clone() else {
                warn!("No email address for {}, skipping action email", bundle.user);
                report.skipped += 1;
                continue;
            };

            let outgoing = OutgoingEmail {
                recipients: vec![email],
                subject: rendered.subject.clone(),
                body: compose_body(&rendered.message, bundle),
                attachments: printout.iter().cloned().collect(),
                reference_doctype: job.document.doctype.clone(),
                reference_name: job.document.name.clone(),
            };

            match self.mailer.enqueue(outgoing).await {
                Ok(()) => {
                    debug!("Queued action email for {} on {}", bundle.user, job.document.doc_ref());
                    report.sent += 1;
                }
                Err(e) => {
                    error!(
                        "Failed to queue action email for {} on {}: {}",
                        bundle.user,
                        job.document.doc_ref(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn render_message(&self, job: &DispatchJob) -> RenderedMessage {
        let doc = &job.document;
        let fallback = || RenderedMessage {
            subject: FALLBACK_SUBJECT.to_string(),
            message: format!("{}: {}", doc.doctype, doc.name),
        };

        let Some(template) = self
            .graph
            .next_action_email_template(&job.workflow, &job.state)
        else {
            return fallback();
        };

        let context = doc.to_context();
        let subject = self.renderer.render(&template.subject, &context);
        let message = self.renderer.render(&template.response, &context);
        match (subject, message) {
            (Ok(subject), Ok(message)) => RenderedMessage { subject, message },
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    "Email template '{}' failed for {}, using default message: {}",
                    template.name,
                    doc.doc_ref(),
                    e
                );
                fallback()
            }
        }
    }
}

fn compose_body(message: &str, bundle: &UserActionBundle) -> String {
    let mut body = String::from(message);
    body.push_str("\n\n");
    for action in &bundle.possible_actions {
        body.push_str(&format!("{}: {}\n", action.action_name, action.action_link));
    }
    body
}

fn printout(doc: &Document) -> Option<Attachment> {
    match serde_json::to_string_pretty(doc) {
        Ok(content) => Some(Attachment {
            filename: format!("{}.json", doc.name),
            content_type: "application/json".to_string(),
            content,
        }),
        Err(e) => {
            warn!("Could not render printout of {}: {}", doc.doc_ref(), e);
            None
        }
    }
}
