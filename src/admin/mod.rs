//! Read-only operator API.
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::balances::BalanceTracker;
use crate::orchestrator::ChainOrchestrator;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub orchestrator: Arc<ChainOrchestrator>,
    pub balances: Arc<BalanceTracker>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/balances", get(get_balances))
        .route("/admin/transactions", get(get_transactions))
        .route("/admin/nonces", get(get_nonces))
        .route("/admin/fees/{chain_id}", get(get_fees))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `listener` until shutdown fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
