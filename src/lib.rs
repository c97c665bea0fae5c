pub mod analytics;
pub mod config;
pub mod errors;
pub mod games;
pub mod gateway;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod reconciler;
pub mod repository;
pub mod retry;
pub mod revenue;
pub mod store;

use crate::handlers::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the HTTP surface around an assembled `AppState`.
pub fn app(state: AppState) -> Router {
    Router::new()
        // Liveness / info
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/api/test", get(handlers::api_test))
        // Payments
        .route("/api/create-payment", post(handlers::create_payment))
        .route("/api/wallet/deposit", post(handlers::deposit))
        .route("/api/wallet/withdraw", post(handlers::withdraw))
        .route(
            "/api/payment-callback",
            get(handlers::payment_callback_get).post(handlers::payment_callback_post),
        )
        .route("/api/verify-payment/:tx_ref", get(handlers::verify_payment))
        // Games and users
        .route("/api/game/join-with-payment", post(handlers::join_with_payment))
        .route("/api/update-user", post(handlers::update_user))
        // Admin
        .route("/api/admin/revenue", get(handlers::admin_revenue))
        .route("/api/admin/revenue/:date", get(handlers::admin_revenue_day))
        .route("/api/admin/game-stats", get(handlers::admin_game_stats))
        .route("/api/admin/games", post(handlers::admin_create_game))
        // Add state and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves, then wait for the revenue worker.
///
/// `state` must hold the last revenue handles: once in-flight requests finish
/// and the router is dropped, the worker drains its queue and exits, so jobs
/// from already acknowledged callbacks are written before this returns.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    worker: JoinHandle<()>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await;

    tracing::info!("HTTP server stopped, draining revenue jobs");
    match worker.await {
        Ok(()) => tracing::info!("Revenue queue drained"),
        Err(e) => tracing::error!(error = %e, "Revenue worker terminated abnormally"),
    }

    served
}
