//! Signed document state-change events.
//!
//! The document store announces every save that may have moved a document
//! between workflow states by POSTing a [`StateChangeEvent`]. The body is
//! authenticated with an HMAC-SHA256 signature carried in
//! [`EVENT_SIGNATURE_HEADER`] as `sha256=<hex>`.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::document::Document;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const EVENT_SIGNATURE_HEADER: &str = "x-countersign-signature";

/// A document was saved by `triggered_by`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub document: Document,
    pub triggered_by: String,
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcomeKind {
    /// No active workflow for the document type.
    NoWorkflow,
    /// The document has no value in its workflow state field.
    NoState,
    /// Open actions already exist for this document state.
    AlreadyReconciled,
    Reconciled,
}

/// Response body for a state-change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub outcome: ReconcileOutcomeKind,
    #[serde(default)]
    pub created: usize,
    #[serde(default)]
    pub completed: usize,
    #[serde(default)]
    pub removed: usize,
    /// Whether notification emails were queued.
    #[serde(default)]
    pub notified: bool,
}

impl ReconcileSummary {
    pub fn skipped(outcome: ReconcileOutcomeKind) -> Self {
        Self {
            outcome,
            created: 0,
            completed: 0,
            removed: 0,
            notified: false,
        }
    }
}

/// Signature header value for `body`.
pub fn sign_event_body(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` signature over `body` in constant time.
pub fn verify_event_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(body);

    mac.verify_slice(&signature_bytes).is_ok()
}
