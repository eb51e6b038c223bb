use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use countersign_core::{get_version, LinkSigner};
use countersign_server::action::SqliteRepository;
use countersign_server::config::Config;
use countersign_server::fixture::Fixture;
use countersign_server::notify::{
    spawn_dispatch_worker, JsonlOutbox, NotificationDispatcher, NotificationQueue,
    TemplateRenderer,
};
use countersign_server::{app_router, AppParts, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting countersign {}", get_version());

    let config = Config::from_env().context("Failed to load configuration from environment variables")?;

    let fixture = Fixture::load(&config.workflows_path)?;
    info!(
        "Loaded {} workflow(s) and {} user(s) from {}",
        fixture.workflows.len(),
        fixture.users.len(),
        config.workflows_path.display()
    );

    let db_path = config.database_path();
    info!("Using state database: {}", db_path.display());
    let actions = SqliteRepository::new(&db_path).context("Failed to initialize SQLite database")?;

    let signer = LinkSigner::new(&config.link_secret, &config.base_url, config.link_ttl)
        .context("Invalid COUNTERSIGN_LINK_SECRET")?;

    let (queue, jobs) = NotificationQueue::channel();
    let app_state = AppState::assemble(AppParts {
        fixture,
        actions: Arc::new(actions),
        signer,
        event_secret: config.event_secret.clone(),
        status_auth_token: config.status_auth_token.clone(),
        queue,
    })
    .await
    .context("Failed to build action pages")?;

    let mailer = Arc::new(JsonlOutbox::new(config.mail_outbox_path.clone()));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        app_state.graph.clone(),
        mailer,
        TemplateRenderer::new()?,
    ));
    spawn_dispatch_worker(jobs, dispatcher);

    let app = app_router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
