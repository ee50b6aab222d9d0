mod api;
mod auth;
mod auth_listener;
mod config;
mod dom;
mod extractor;
mod messages;
mod orchestrator;
mod platform;
mod popup;
mod relay;
mod scheduler;
mod storage;
mod tabs;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::InboxClient;
use crate::auth::AuthState;
use crate::config::Config;
use crate::orchestrator::Background;
use crate::platform::native::{self, Badge, HostNotifier, PageOverlay, WindowPhonePrompt};
use crate::popup::Popup;
use crate::scheduler::{tasks, Scheduler};
use crate::storage::ExtensionStorage;
use crate::tabs::TabRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging. Stdout carries host output, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wady_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Mode: {}", config.extension.mode);
    info!("  API: {}", config.api.base_url);
    info!("  Messaging host: {}", config.sites.messaging_host);
    info!("  Dashboard host: {}", config.sites.dashboard_host);
    info!("  Storage: {}", config.storage.database_path.display());

    let storage = ExtensionStorage::open(&config.storage.database_path)?;

    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let (close_output, output_closed) = oneshot::channel();
    let writer = tokio::spawn(native::write_outputs(
        output_rx,
        tokio::io::stdout(),
        output_closed,
    ));

    // Restore the badge from whatever survived the last run
    let auth = Arc::new(AuthState::new(
        storage,
        Arc::new(Badge::new(output_tx.clone())),
    ));
    auth.restore().await?;

    let (runtime_tx, runtime_rx) = mpsc::channel(32);
    let tabs = Arc::new(TabRegistry::new(
        config.sites.clone(),
        config.relay.clone(),
        runtime_tx,
        Arc::new(PageOverlay::new(output_tx.clone())),
    ));

    let api = InboxClient::new(config.api.clone()).context("Failed to build HTTP client")?;
    let background = Arc::new(Background::new(
        config,
        api,
        auth.clone(),
        tabs.clone(),
        Arc::new(HostNotifier::new(output_tx.clone())),
        Arc::new(WindowPhonePrompt::new(output_tx.clone())),
    ));

    // Start background tasks
    let mut scheduler = Scheduler::new().await?;
    tasks::register_builtin_tasks(&mut scheduler, auth.clone()).await?;
    scheduler.start().await?;

    info!("Extension background is starting...");
    let result = native::run(
        background,
        tabs,
        Popup::new(auth),
        runtime_rx,
        output_tx,
        BufReader::new(tokio::io::stdin()),
    )
    .await;

    if let Err(e) = scheduler.shutdown().await {
        error!("{:#}", e);
    }

    // Flush whatever the last events produced before the runtime goes away.
    let _ = close_output.send(());
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Host output writer stopped: {:#}", e),
        Err(e) => error!("Host output writer panicked: {}", e),
    }

    result
}
