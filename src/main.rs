/// Helpdesk Auth - account credential and session service

use anyhow::Context;
use helpdesk_auth::{config::ServerConfig, context::AppContext, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before logging so the log settings apply
    let config = ServerConfig::from_env().context("failed to load configuration")?;

    init_tracing(&config);

    tracing::info!(
        "helpdesk-auth v{} starting (database: {})",
        env!("CARGO_PKG_VERSION"),
        config.storage.account_db.display()
    );

    // Create application context
    let ctx = AppContext::new(config)
        .await
        .context("failed to initialise application context")?;
    let ctx = Arc::new(ctx);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("helpdesk_auth={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
