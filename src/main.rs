use bingo_payment_relay::config::Settings;
use bingo_payment_relay::gateway::ChapaClient;
use bingo_payment_relay::handlers::AppState;
use bingo_payment_relay::memory::MemoryLedgerStore;
use bingo_payment_relay::reconciler::Reconciler;
use bingo_payment_relay::repository::PgLedgerStore;
use bingo_payment_relay::retry::RetryPolicy;
use bingo_payment_relay::revenue::{RevenueService, RevenueWorker};
use bingo_payment_relay::store::LedgerStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REVENUE_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;

    // Initialize tracing (structured logging)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bingo_payment_relay=debug,tower_http=debug".into());
    if settings.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Bingo Payment Relay");
    tracing::info!("Gateway: {}", settings.chapa_base_url);
    tracing::info!("Public URL: {}", settings.public_base_url);

    let store: Arc<dyn LedgerStore> = match &settings.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(settings.database_max_connections)
                .connect(database_url)
                .await?;

            let store = PgLedgerStore::new(pool);
            tracing::info!("Running database migrations...");
            store.migrate().await?;
            tracing::info!("Migrations completed successfully");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory ledger (state is lost on exit)");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let gateway = Arc::new(ChapaClient::new(
        settings.chapa_base_url.clone(),
        settings.chapa_secret_key.clone(),
        settings.gateway_timeout,
        RetryPolicy::for_gateway(settings.gateway_max_attempts),
    )?);

    // Revenue bookkeeping runs beside the request path; `serve` drains it on shutdown
    let (revenue, worker) = RevenueWorker::spawn(
        RevenueService::new(Arc::clone(&store)),
        REVENUE_QUEUE_CAPACITY,
    );
    let state = AppState {
        reconciler: Reconciler::new(Arc::clone(&store), revenue.clone()),
        store,
        gateway,
        revenue,
        settings: Arc::new(settings.clone()),
    };

    // Start the server
    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Bingo Payment Relay listening on {}", addr);
    tracing::info!("  POST   /api/wallet/deposit          - Start a deposit");
    tracing::info!("  GET|POST /api/payment-callback      - Gateway webhook");
    tracing::info!("  POST   /api/game/join-with-payment  - Pay entry fee and join");
    tracing::info!("  GET    /api/admin/revenue           - Last 30 days of revenue");
    tracing::info!("  GET    /health                      - Health check");

    bingo_payment_relay::serve(listener, state, worker, shutdown_signal()).await?;

    tracing::info!("Bingo Payment Relay stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
}
