//! JSONL mail outbox.
//!
//! Each accepted message becomes one JSON line appended to the outbox file
//! by a background writer task. An external relay picks the file up.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::mailer::{MailError, Mailer, OutgoingEmail};

pub struct JsonlOutbox {
    sender: mpsc::UnboundedSender<String>,
}

impl JsonlOutbox {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn new(outbox_path: PathBuf) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Err(e) = Self::writer_task(outbox_path, &mut receiver).await {
                error!("Mail outbox writer failed: {}", e);
            }
        });

        Self { sender }
    }

    async fn writer_task(
        outbox_path: PathBuf,
        receiver: &mut mpsc::UnboundedReceiver<String>,
    ) -> std::io::Result<()> {
        if let Some(parent) = outbox_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&outbox_path)
            .await?;

        info!("Writing outgoing mail to: {:?}", outbox_path);

        while let Some(line) = receiver.recv().await {
            if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
                error!("Failed to append email to outbox: {}", e);
                continue;
            }
            if let Err(e) = file.flush().await {
                error!("Failed to flush outbox file: {}", e);
            }
        }

        info!("Mail outbox writer shutting down");

        Ok(())
    }
}

#[async_trait]
impl Mailer for JsonlOutbox {
    async fn enqueue(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let line = serde_json::to_string(&email)?;
        self.sender.send(line).map_err(|_| MailError::QueueClosed)
    }
}
