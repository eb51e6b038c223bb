//! Outgoing mail and the queue it is handed to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub reference_doctype: String,
    pub reference_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail queue closed")]
    QueueClosed,
    #[error("failed to serialize email: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Accepts mail for later delivery. Delivery itself happens elsewhere.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn enqueue(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// Keeps every message in memory.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn enqueue(&self, email: OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().await.push(email);
        Ok(())
    }
}
