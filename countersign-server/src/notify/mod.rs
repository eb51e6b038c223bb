//! Notifications to the users who may act next.
//!
//! The reconciler hands a [`DispatchJob`] to the [`NotificationQueue`] after
//! its record changes have committed. A worker spawned with
//! [`spawn_dispatch_worker`] drains the queue and mails each recipient
//! through the [`NotificationDispatcher`]. Nothing flows back: a failed
//! delivery never touches action records.

pub mod dispatcher;
pub mod mailer;
pub mod outbox;
pub mod render;

pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use mailer::{Attachment, MailError, Mailer, MemoryMailer, OutgoingEmail};
pub use outbox::JsonlOutbox;
pub use render::{RenderError, TemplateRenderer};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use countersign_core::{Document, DocumentRef};

/// One action a recipient may take, with the signed link that takes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PossibleAction {
    pub action_name: String,
    pub action_link: String,
}

/// Everything one recipient is told about a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActionBundle {
    pub user: String,
    /// `None` when the directory has no address; the recipient is skipped.
    pub email: Option<String>,
    pub possible_actions: Vec<PossibleAction>,
}

/// Notify the next actors of `document`, which just entered `state`.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchJob {
    pub workflow: String,
    pub state: String,
    pub document: Document,
    pub bundles: Vec<UserActionBundle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("notification queue closed")]
pub struct QueueClosed;

/// Producer half of the dispatch channel.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::UnboundedSender<DispatchJob>,
}

impl NotificationQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a job without waiting for it to run.
    pub fn enqueue(&self, job: DispatchJob) -> Result<(), QueueClosed> {
        self.sender.send(job).map_err(|_| QueueClosed)
    }
}

/// Drain `receiver` until every [`NotificationQueue`] is dropped.
pub fn spawn_dispatch_worker(
    mut receiver: mpsc::UnboundedReceiver<DispatchJob>,
    dispatcher: Arc<NotificationDispatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let report = dispatcher.dispatch(&job).await;
            info!(
                "Dispatched notifications for {} in '{}': {} sent, {} skipped, {} failed",
                job.document.doc_ref(),
                job.state,
                report.sent,
                report.skipped,
                report.failed
            );
        }
        info!("Notification worker shutting down");
    })
}

/// In-app notification counters derived from action records.
pub trait UiNotifier: Send + Sync {
    /// Invalidate cached action notifications after records for `document`
    /// changed.
    fn clear_action_notifications(&self, document: &DocumentRef);
}

/// `UiNotifier` for deployments without an in-app notification cache.
pub struct LoggingUiNotifier;

impl UiNotifier for LoggingUiNotifier {
    fn clear_action_notifications(&self, document: &DocumentRef) {
        debug!("Clearing workflow action notifications after change to {}", document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> DispatchJob {
        DispatchJob {
            workflow: "Leave Approval".to_string(),
            state: "Pending Approval".to_string(),
            document: Document::new("Leave Application", "LA-0001"),
            bundles: vec![],
        }
    }

    #[tokio::test]
    async fn test_queue_delivers_in_order() {
        let (queue, mut receiver) = NotificationQueue::channel();
        let mut second = job();
        second.state = "Approved".to_string();

        queue.enqueue(job()).unwrap();
        queue.enqueue(second).unwrap();

        assert_eq!(receiver.recv().await.unwrap().state, "Pending Approval");
        assert_eq!(receiver.recv().await.unwrap().state, "Approved");
    }

    #[tokio::test]
    async fn test_enqueue_after_worker_gone_fails() {
        let (queue, receiver) = NotificationQueue::channel();
        drop(receiver);
        assert_eq!(queue.enqueue(job()), Err(QueueClosed));
    }
}
