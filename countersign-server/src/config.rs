use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    /// HMAC secret for action links.
    pub link_secret: String,
    /// HMAC secret for inbound state-change events.
    pub event_secret: String,
    /// Absolute URL prefix placed in front of action links.
    pub base_url: String,
    pub link_ttl: Duration,
    /// JSON file with workflows, email templates, users and documents.
    pub workflows_path: PathBuf,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// JSONL file outgoing mail is appended to.
    pub mail_outbox_path: PathBuf,
    /// Optional bearer token for /status endpoint authentication.
    /// If set, requests to /status must include `Authorization: Bearer <token>`.
    /// If not set, /status endpoint is disabled (returns 503).
    pub status_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let link_secret = required_secret(&lookup, "COUNTERSIGN_LINK_SECRET")?;
        let event_secret = required_secret(&lookup, "COUNTERSIGN_EVENT_SECRET")?;

        let base_url = lookup("COUNTERSIGN_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        let link_ttl_hours = lookup("COUNTERSIGN_LINK_TTL_HOURS")
            .unwrap_or_else(|| "72".to_string())
            .parse::<u64>()
            .context("COUNTERSIGN_LINK_TTL_HOURS must be a whole number of hours")?;

        let workflows_path = lookup("COUNTERSIGN_WORKFLOWS")
            .map(PathBuf::from)
            .context("COUNTERSIGN_WORKFLOWS environment variable is required")?;

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = lookup("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let mail_outbox_path = lookup("MAIL_OUTBOX_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("mail-outbox.jsonl"));

        let status_auth_token = parse_status_auth_token(lookup("STATUS_AUTH_TOKEN"));

        Ok(Config {
            link_secret,
            event_secret,
            base_url,
            link_ttl: Duration::from_secs(link_ttl_hours.saturating_mul(3600)),
            workflows_path,
            port,
            state_dir,
            mail_outbox_path,
            status_auth_token,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("countersign-state.db")
    }
}

fn required_secret(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    let value = lookup(key).with_context(|| format!("{} environment variable is required", key))?;
    if value.trim().is_empty() {
        bail!("{} must not be blank", key);
    }
    Ok(value)
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace.
/// This prevents security issues where an empty token would allow unauthenticated access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
