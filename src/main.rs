//! Bridge Orchestrator - bridge-then-swap transfers over third-party providers
//!
//! Drives each user's bridge and swap dialogue, keeps a durable ledger of
//! every operation, and reconciles in-flight bridges in the background.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod amount;
mod api;
mod bridge;
mod commission;
mod config;
mod conversation;
mod error;
mod ledger;
mod metrics;
mod notify;
mod quote;
mod reconcile;
mod retry;
mod store;
mod swap;

use bridge::HttpBridgeClient;
use config::Settings;
use conversation::{Base58AddressValidator, ConversationMachine, MachineParts};
use ledger::{Ledger, MemoryLedger, PgLedger};
use metrics::MetricsServer;
use notify::{LogNotifier, Notifier, WebhookNotifier};
use reconcile::Reconciler;
use retry::RetryPolicy;
use store::{KeyValueStore, MemoryStore, PgKeyValueStore};
use swap::{HttpSwapClient, SwapService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Bridge Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {} ({} -> {}, swapping into {})",
        settings.orchestrator.instance_id,
        settings.bridge.from_chain,
        settings.bridge.to_chain,
        settings.swap.output_asset
    );

    // Initialize ledger and key-value store
    let (ledger, kv_store, pg_store) = if settings.database.url.is_empty() {
        warn!("No database configured, using the in-memory ledger and store");
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let kv_store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        (ledger, kv_store, None)
    } else {
        let pg_ledger = PgLedger::connect(&settings.database)
            .await
            .context("Failed to connect to the ledger database")?;
        info!("Database connection established");

        // Run migrations
        pg_ledger.run_migrations().await?;
        let pg_store = Arc::new(PgKeyValueStore::new(pg_ledger.pool()));
        pg_store.run_migrations().await?;
        info!("Database migrations complete");

        let ledger: Arc<dyn Ledger> = Arc::new(pg_ledger);
        let kv_store: Arc<dyn KeyValueStore> = pg_store.clone();
        (ledger, kv_store, Some(pg_store))
    };

    // Provider clients
    let retry = RetryPolicy::from_config(&settings.retry);
    let bridge = Arc::new(HttpBridgeClient::new(settings.bridge.clone(), retry)?);
    let swap_client = Arc::new(HttpSwapClient::new(settings.swap.clone())?);
    let swaps = Arc::new(SwapService::new(
        swap_client,
        ledger.clone(),
        settings.swap.clone(),
    ));
    info!("Provider clients initialized");

    let notifier: Arc<dyn Notifier> = match &settings.notifier.webhook_url {
        Some(url) => {
            info!("Notifications go to {}", url);
            Arc::new(WebhookNotifier::new(url.clone(), &settings.notifier)?)
        }
        None => {
            warn!("No notifier webhook configured, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    // Initialize reconciler and conversation machine
    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        bridge.clone(),
        notifier.clone(),
        &settings.orchestrator,
    ));
    let machine = Arc::new(ConversationMachine::new(
        MachineParts {
            store: kv_store,
            ledger: ledger.clone(),
            bridge,
            swaps,
            reconciler: reconciler.clone(),
            notifier,
            validator: Arc::new(Base58AddressValidator),
        },
        &settings.orchestrator,
    ));
    info!("Conversation machine initialized");

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = api::AppState {
            ledger: ledger.clone(),
            machine,
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start reconciliation loop
    let reconcile_handle = tokio::spawn({
        let reconciler = reconciler.clone();
        async move {
            if let Err(e) = reconciler.run().await {
                error!("Reconciler error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let ledger = ledger.clone();
        let pg_store = pg_store.clone();
        let interval = settings.orchestrator.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                // Check database connection
                if let Err(e) = ledger.health_check().await {
                    warn!("Database health check failed: {}", e);
                    metrics::record_health_check_failure();
                    continue;
                }

                if let Some(store) = &pg_store {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(n) => info!("Purged {} expired store entries", n),
                        Err(e) => warn!("Failed to purge expired store entries: {}", e),
                    }
                }

                metrics::record_health_check();
            }
        }
    });

    info!("Bridge Orchestrator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    reconciler.stop().await;
    if let Err(e) = reconcile_handle.await {
        warn!("Reconciler task ended abnormally: {}", e);
    }

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Bridge Orchestrator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_orchestrator=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
