use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use countersign_core::{
    parse_link_query, sign_event_body, ActionLinkParams, Document, LinkSigner, ReconcileSummary,
    StateChangeEvent, EVENT_SIGNATURE_HEADER,
};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Countersign: workflow action links and state-change events
#[derive(Parser, Debug)]
#[command(name = "countersign")]
#[command(about = "Issue and inspect workflow action links, push state-change events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a signed action link
    IssueLink(IssueLinkArgs),
    /// Check a link's signature and expiry and print what it would do
    VerifyLink(VerifyLinkArgs),
    /// Send a signed state-change event for a document to a running server
    PushEvent(PushEventArgs),
}

#[derive(Parser, Debug)]
struct IssueLinkArgs {
    /// Workflow action, e.g. "Approve"
    #[arg(long)]
    action: String,

    #[arg(long)]
    doctype: String,

    #[arg(long)]
    docname: String,

    /// Workflow state the document is in now
    #[arg(long)]
    state: String,

    /// User the link is issued to
    #[arg(long)]
    user: String,

    #[arg(long, env = "COUNTERSIGN_LINK_SECRET", hide_env_values = true)]
    secret: String,

    #[arg(long, env = "COUNTERSIGN_BASE_URL", default_value = "http://localhost:3000")]
    base_url: String,

    #[arg(long, env = "COUNTERSIGN_LINK_TTL_HOURS", default_value_t = 72)]
    ttl_hours: u64,
}

#[derive(Parser, Debug)]
struct VerifyLinkArgs {
    /// Full link or just its query string
    link: String,

    #[arg(long, env = "COUNTERSIGN_LINK_SECRET", hide_env_values = true)]
    secret: String,
}

#[derive(Parser, Debug)]
struct PushEventArgs {
    /// JSON file holding the saved document
    #[arg(long)]
    document: PathBuf,

    /// User who saved the document
    #[arg(long)]
    triggered_by: String,

    #[arg(long, env = "COUNTERSIGN_SERVER_URL", default_value = "http://localhost:3000")]
    server: String,

    #[arg(long, env = "COUNTERSIGN_EVENT_SECRET", hide_env_values = true)]
    secret: String,

    /// Print the signed request instead of sending it
    #[arg(long)]
    dry_run: bool,
}

fn now_secs() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the Unix epoch")?;
    i64::try_from(elapsed.as_secs()).context("System clock out of range")
}

fn run_issue_link(args: IssueLinkArgs) -> Result<()> {
    let signer = LinkSigner::new(
        &args.secret,
        args.base_url,
        Duration::from_secs(args.ttl_hours.saturating_mul(3600)),
    )
    .context("Invalid link secret")?;

    let params = ActionLinkParams {
        action: args.action,
        doctype: args.doctype,
        docname: args.docname,
        current_state: args.state,
        user: args.user,
    };

    println!("{}", signer.issue(&params, now_secs()?));
    Ok(())
}

fn run_verify_link(args: VerifyLinkArgs) -> Result<()> {
    // Base URL and TTL play no part in verification
    let signer = LinkSigner::new(&args.secret, "", Duration::ZERO).context("Invalid link secret")?;

    let query = parse_link_query(&args.link).context("Link query string is not valid")?;
    let request = signer
        .verify(&query, now_secs()?)
        .map_err(|e| anyhow!("Link rejected: {}", e))?;

    let params = &request.params;
    println!("Valid link");
    println!("  action:        {}", params.action);
    println!("  document:      {} {}", params.doctype, params.docname);
    println!("  issued for:    {}", params.current_state);
    println!("  user:          {}", params.user);
    println!("  expires (UTC): {}", request.expiry);
    Ok(())
}

async fn run_push_event(client: &reqwest::Client, args: PushEventArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.document)
        .with_context(|| format!("Failed to read {}", args.document.display()))?;
    let document: Document = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a document", args.document.display()))?;

    let body = serde_json::to_vec(&StateChangeEvent {
        document,
        triggered_by: args.triggered_by,
    })?;
    let signature =
        sign_event_body(&args.secret, &body).ok_or_else(|| anyhow!("Invalid event secret"))?;

    let url = format!("{}/events/state-change", args.server.trim_end_matches('/'));

    if args.dry_run {
        println!("POST {}", url);
        println!("{}: {}", EVENT_SIGNATURE_HEADER, signature);
        println!("{}", String::from_utf8_lossy(&body));
        return Ok(());
    }

    let response = client
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(EVENT_SIGNATURE_HEADER, signature)
        .body(body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("Server answered {}: {}", status, text);
    }

    let summary: ReconcileSummary = response
        .json()
        .await
        .context("Server response was not a reconcile summary")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    match cli.command {
        Commands::IssueLink(args) => run_issue_link(args),
        Commands::VerifyLink(args) => run_verify_link(args),
        Commands::PushEvent(args) => run_push_event(&client, args).await,
    }
}
