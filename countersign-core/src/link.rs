//! Signed action links.
//!
//! An action link carries everything needed to apply one workflow action
//! without a session: the document, the action, the state the link was
//! issued for, the user it was issued to, and an expiry. All of it is
//! covered by an HMAC-SHA256 signature under a process-wide secret.
//!
//! Links are never stored. A link is valid when its signature matches and
//! it has not expired; whether it still *does* anything is decided later by
//! comparing `current_state` against the live document.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Path of the guest-accessible endpoint that applies an action link.
pub const APPLY_ACTION_PATH: &str = "/api/apply_action";

const SIGNATURE_PARAM: &str = "signature";
const EXPIRY_PARAM: &str = "expiry";

/// The action request encoded in a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLinkParams {
    pub action: String,
    pub doctype: String,
    pub docname: String,
    /// Workflow state of the document when the link was issued.
    pub current_state: String,
    /// User the link was issued to.
    pub user: String,
}

impl ActionLinkParams {
    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("action", self.action.as_str()),
            ("doctype", self.doctype.as_str()),
            ("docname", self.docname.as_str()),
            ("current_state", self.current_state.as_str()),
            ("user", self.user.as_str()),
        ]
    }
}

/// A link whose signature and expiry have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedActionRequest {
    pub params: ActionLinkParams,
    /// Unix seconds after which the link is rejected.
    pub expiry: i64,
}

/// Why a link was rejected.
///
/// The variants exist for logging. Callers must answer every one of them
/// the same way so a client learns nothing about which check failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("malformed expiry")]
    MalformedExpiry,
    #[error("signature mismatch")]
    BadSignature,
    #[error("link expired")]
    Expired,
}

/// Failure to construct a [`LinkSigner`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("signing secret must not be empty")]
    EmptySecret,
    #[error("signing secret rejected by HMAC")]
    InvalidKey,
}

/// Issues and verifies action links.
#[derive(Clone)]
pub struct LinkSigner {
    keyed: HmacSha256,
    base_url: String,
    ttl_secs: i64,
}

impl LinkSigner {
    pub fn new(
        secret: impl AsRef<[u8]>,
        base_url: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, SignerError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SignerError::EmptySecret);
        }
        let keyed = HmacSha256::new_from_slice(secret).map_err(|_| SignerError::InvalidKey)?;

        Ok(Self {
            keyed,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build an absolute link for `params`, valid until `now_secs + ttl`.
    pub fn issue(&self, params: &ActionLinkParams, now_secs: i64) -> String {
        let expiry = now_secs.saturating_add(self.ttl_secs);
        format!(
            "{}{}?{}",
            self.base_url,
            APPLY_ACTION_PATH,
            self.signed_query(params, expiry)
        )
    }

    /// Query string for `params` with an explicit expiry, signature last.
    pub fn signed_query(&self, params: &ActionLinkParams, expiry: i64) -> String {
        let payload = canonical_payload(params, expiry);
        let signature = hex::encode(self.mac(&payload).finalize().into_bytes());
        format!("{}&{}={}", payload, SIGNATURE_PARAM, signature)
    }

    /// Check the signature and expiry of received query parameters.
    ///
    /// Parameters other than the signed ones are ignored.
    pub fn verify(
        &self,
        query: &HashMap<String, String>,
        now_secs: i64,
    ) -> Result<SignedActionRequest, LinkError> {
        let param = |name: &'static str| {
            query
                .get(name)
                .cloned()
                .ok_or(LinkError::MissingParameter(name))
        };

        let params = ActionLinkParams {
            action: param("action")?,
            doctype: param("doctype")?,
            docname: param("docname")?,
            current_state: param("current_state")?,
            user: param("user")?,
        };
        let expiry: i64 = param(EXPIRY_PARAM)?
            .parse()
            .map_err(|_| LinkError::MalformedExpiry)?;
        let signature = param(SIGNATURE_PARAM)?;

        let signature_bytes = hex::decode(signature).map_err(|_| LinkError::BadSignature)?;

        // verify_slice performs constant-time comparison
        self.mac(&canonical_payload(&params, expiry))
            .verify_slice(&signature_bytes)
            .map_err(|_| LinkError::BadSignature)?;

        if now_secs > expiry {
            return Err(LinkError::Expired);
        }

        Ok(SignedActionRequest { params, expiry })
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(payload.as_bytes());
        mac
    }
}

/// The exact bytes that get signed: the five request fields then the
/// expiry, percent-encoded, in fixed order.
fn canonical_payload(params: &ActionLinkParams, expiry: i64) -> String {
    let expiry = expiry.to_string();
    params
        .fields()
        .into_iter()
        .chain(std::iter::once((EXPIRY_PARAM, expiry.as_str())))
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse the query part of a link (everything after `?`, or the whole
/// string when there is no `?`).
pub fn parse_link_query(link: &str) -> Result<HashMap<String, String>, serde_urlencoded::de::Error> {
    let query = link.split_once('?').map(|(_, q)| q).unwrap_or(link);
    serde_urlencoded::from_str(query)
}
